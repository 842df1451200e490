//! Native element interactions: click, fill, key press, text read.
//!
//! Every action resolves its selector fresh, pre-checks actionability via
//! the wait engine, then dispatches real input events through the driver.
//! There is no post-verification beyond action completion and a liveness
//! check; callers re-explore the DOM to confirm effects.

use std::time::Duration;

use cdp_driver::Driver;
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::{ToolError, ToolResult};
use crate::keys::KeyChord;
use crate::locate;
use crate::wait::{self, WaitCondition};

/// Timing knobs shared by all interactions.
#[derive(Clone, Copy, Debug)]
pub struct InteractionTimeouts {
    pub action: Duration,
    pub poll_interval: Duration,
}

pub async fn click(
    driver: &Driver,
    selector: &str,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    let index = resolve_single(driver, selector).await?;
    require_visible(driver, selector, timeouts).await?;
    let (x, y) = locate::center_of(driver, selector, index).await?;

    for kind in ["mousePressed", "mouseReleased"] {
        driver
            .dispatch_mouse(json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": "left",
                "buttons": 1,
                "clickCount": 1,
                "pointerType": "mouse",
            }))
            .await?;
    }
    confirm_alive(driver, "click")
}

pub async fn fill(
    driver: &Driver,
    selector: &str,
    value: &str,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    let index = resolve_single(driver, selector).await?;
    require_visible(driver, selector, timeouts).await?;
    focus_and_clear(driver, selector, index, timeouts).await?;
    driver.insert_text(value).await?;
    confirm_alive(driver, "fill")
}

pub async fn press_key(
    driver: &Driver,
    selector: &str,
    chord: &KeyChord,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    let index = resolve_single(driver, selector).await?;
    require_visible(driver, selector, timeouts).await?;
    focus_element(driver, selector, index, timeouts).await?;

    let (down, up) = chord.payloads();
    driver.dispatch_key(down).await?;
    driver.dispatch_key(up).await?;
    confirm_alive(driver, "press_key")
}

/// Read an element's text content, waiting for it to attach first.
pub async fn text_content(
    driver: &Driver,
    selector: &str,
    timeouts: InteractionTimeouts,
) -> ToolResult<String> {
    wait::wait_for(
        driver,
        selector,
        WaitCondition::Attached,
        timeouts.action,
        timeouts.poll_interval,
    )
    .await
    .map_err(|err| match err {
        ToolError::WaitTimeout { .. } => ToolError::ElementNotFound(selector.to_string()),
        other => other,
    })?;

    let literal = serde_json::to_string(selector)
        .map_err(|err| ToolError::Unknown(err.to_string()))?;
    let expression = format!(
        r#"(() => {{
    const el = document.querySelector({literal});
    if (!el) {{ return null; }}
    if ('value' in el && typeof el.value === 'string' && el.value.length) {{
        return el.value;
    }}
    return el.textContent || '';
}})()"#,
        literal = literal,
    );
    let outcome = driver.evaluate(&expression).await?;
    match outcome.value {
        Some(Value::String(text)) => Ok(text),
        Some(Value::Null) | None => Err(ToolError::ElementNotFound(selector.to_string())),
        Some(other) => Err(ToolError::Unknown(format!(
            "text content query returned {other}"
        ))),
    }
}

/// Resolve to exactly one element. Multiple matches are allowed: the first
/// wins, with a warning so callers can tighten the selector.
async fn resolve_single(driver: &Driver, selector: &str) -> ToolResult<usize> {
    let matches = locate::resolve(driver, selector).await?;
    match matches.len() {
        0 => Err(ToolError::ElementNotFound(selector.to_string())),
        1 => Ok(0),
        count => {
            warn!(
                target: "browserd::interact",
                selector,
                count,
                "selector is ambiguous; using first match"
            );
            Ok(0)
        }
    }
}

async fn require_visible(
    driver: &Driver,
    selector: &str,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    wait::wait_for(
        driver,
        selector,
        WaitCondition::Visible,
        timeouts.action,
        timeouts.poll_interval,
    )
    .await
    .map_err(|err| match err {
        ToolError::WaitTimeout { timeout_ms, .. } => ToolError::ElementNotInteractable {
            selector: selector.to_string(),
            timeout_ms,
        },
        other => other,
    })
}

async fn focus_and_clear(
    driver: &Driver,
    selector: &str,
    index: usize,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    run_focus_script(driver, selector, index, true, timeouts).await
}

async fn focus_element(
    driver: &Driver,
    selector: &str,
    index: usize,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    run_focus_script(driver, selector, index, false, timeouts).await
}

async fn run_focus_script(
    driver: &Driver,
    selector: &str,
    index: usize,
    clear: bool,
    timeouts: InteractionTimeouts,
) -> ToolResult<()> {
    let literal = serde_json::to_string(selector)
        .map_err(|err| ToolError::Unknown(err.to_string()))?;
    let expression = format!(
        r#"(() => {{
    const nodes = document.querySelectorAll({literal});
    if (nodes.length <= {index}) {{ return {{ status: 'not-found' }}; }}
    const el = nodes[{index}];
    if (typeof el.focus === 'function') {{ el.focus(); }}
    if (!{clear}) {{ return {{ status: 'ready' }}; }}
    if ('value' in el) {{
        el.value = '';
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    }} else if (el.isContentEditable) {{
        el.textContent = '';
    }} else {{
        return {{ status: 'not-editable' }};
    }}
    return {{ status: 'ready' }};
}})()"#,
        literal = literal,
        index = index,
        clear = clear,
    );

    let outcome = driver.evaluate(&expression).await?;
    if let Some(exception) = outcome.exception {
        return Err(ToolError::Unknown(format!("focus script failed: {exception}")));
    }
    let status = outcome
        .value
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    match status {
        "ready" => Ok(()),
        "not-found" => Err(ToolError::ElementNotFound(selector.to_string())),
        "not-editable" => Err(ToolError::ElementNotInteractable {
            selector: selector.to_string(),
            timeout_ms: timeouts.action.as_millis() as u64,
        }),
        other => Err(ToolError::Unknown(format!("focus script returned '{other}'"))),
    }
}

fn confirm_alive(driver: &Driver, action: &str) -> ToolResult<()> {
    if driver.is_alive() {
        Ok(())
    } else {
        Err(ToolError::Session(format!(
            "browser died while performing {action}"
        )))
    }
}
