//! Polling element waits.
//!
//! One fixed-interval loop drives every wait. The predicate is checked
//! before the deadline so a condition that becomes true exactly as time
//! runs out still counts as satisfied, and the final sleep is clamped to
//! the remaining budget so a timeout is reported within one interval of the
//! configured duration, never before it.

use std::time::Duration;

use cdp_driver::Driver;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::errors::{ToolError, ToolResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WaitCondition {
    Attached,
    Detached,
    Visible,
    Hidden,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::Attached => "attached",
            WaitCondition::Detached => "detached",
            WaitCondition::Visible => "visible",
            WaitCondition::Hidden => "hidden",
        }
    }

    fn js_check(&self) -> &'static str {
        match self {
            WaitCondition::Attached => "nodes.length > 0",
            WaitCondition::Detached => "nodes.length === 0",
            WaitCondition::Visible => "anyVisible",
            // No matches at all also counts as hidden.
            WaitCondition::Hidden => "!anyVisible",
        }
    }
}

/// Poll until `condition` holds for `selector` or `timeout` elapses.
pub async fn wait_for(
    driver: &Driver,
    selector: &str,
    condition: WaitCondition,
    timeout: Duration,
    poll_interval: Duration,
) -> ToolResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if check(driver, selector, condition).await? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ToolError::WaitTimeout {
                selector: selector.to_string(),
                state: condition.as_str(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

async fn check(driver: &Driver, selector: &str, condition: WaitCondition) -> ToolResult<bool> {
    let literal = serde_json::to_string(selector)
        .map_err(|err| ToolError::Unknown(err.to_string()))?;
    let expression = format!(
        r#"(() => {{
    let nodes;
    try {{
        nodes = document.querySelectorAll({literal});
    }} catch (err) {{
        return {{ error: String(err) }};
    }}
    let anyVisible = false;
    for (const el of nodes) {{
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        if (rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none') {{
            anyVisible = true;
            break;
        }}
    }}
    return {{ matched: {check} }};
}})()"#,
        literal = literal,
        check = condition.js_check(),
    );

    let outcome = driver.evaluate(&expression).await?;
    if let Some(exception) = outcome.exception {
        return Err(ToolError::Unknown(format!("wait predicate failed: {exception}")));
    }
    let value = outcome.value.unwrap_or(Value::Null);
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(ToolError::Validation(format!(
            "invalid selector '{selector}': {err}"
        )));
    }
    Ok(value
        .get("matched")
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}
