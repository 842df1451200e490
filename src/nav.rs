//! Navigation and reload with readiness polling.
//!
//! CDP acknowledges `Page.navigate` before the document exists, so
//! completion is defined as the document reaching `interactive` or
//! `complete` within the deadline.

use std::time::Duration;

use cdp_driver::Driver;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::errors::{ToolError, ToolResult};

pub async fn navigate(
    driver: &Driver,
    url: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> ToolResult<()> {
    driver.start_navigation(url).await?;
    debug!(target: "browserd::nav", %url, "navigation started");
    match wait_document_ready(driver, timeout, poll_interval).await {
        Ok(()) => Ok(()),
        Err(ReadyWaitFailure::TimedOut) => Err(ToolError::NavigationTimeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(ReadyWaitFailure::Driver(err)) => Err(err),
    }
}

pub async fn reload(
    driver: &Driver,
    timeout: Duration,
    poll_interval: Duration,
) -> ToolResult<()> {
    driver.start_reload().await?;
    match wait_document_ready(driver, timeout, poll_interval).await {
        Ok(()) => Ok(()),
        Err(ReadyWaitFailure::TimedOut) => Err(ToolError::NavigationTimeout {
            url: "about:reload".to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(ReadyWaitFailure::Driver(err)) => Err(err),
    }
}

enum ReadyWaitFailure {
    TimedOut,
    Driver(ToolError),
}

async fn wait_document_ready(
    driver: &Driver,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ReadyWaitFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        let outcome = driver
            .evaluate("document.readyState")
            .await
            .map_err(|err| ReadyWaitFailure::Driver(ToolError::from(err)))?;
        let ready = outcome
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .map(|state| matches!(state, "interactive" | "complete"))
            .unwrap_or(false);
        if ready {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ReadyWaitFailure::TimedOut);
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}
