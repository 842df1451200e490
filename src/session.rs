//! Session lifecycle: one browser, one page, owned here and nowhere else.
//!
//! The manager is the only component that creates or destroys drivers.
//! Other components borrow the driver for the duration of a single tool
//! call via [`SessionManager::ensure_ready`]. A crashed session is
//! relaunched at most once per `ensure_ready` call; repeated failures keep
//! surfacing instead of being masked by silent retries.

use std::sync::Arc;

use cdp_driver::{Driver, DriverConfig, DriverError, PageEvent};
use futures::future::BoxFuture;
use serde::Serialize;
use telemetry_tap::{ConsoleLevel, TelemetryTap};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::{ToolError, ToolResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Closed,
    Launching,
    Ready,
    Crashed,
}

/// Factory producing a launched driver; swapped out in tests for scripted
/// transports.
pub type DriverLauncher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<Driver>, DriverError>> + Send + Sync>;

struct Slot {
    state: SessionState,
    driver: Option<Arc<Driver>>,
    pump: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    launcher: DriverLauncher,
    tap: Arc<TelemetryTap>,
    slot: Mutex<Slot>,
}

impl SessionManager {
    pub fn new(driver_cfg: DriverConfig, tap: Arc<TelemetryTap>) -> Self {
        let launcher: DriverLauncher = Arc::new(move || {
            let cfg = driver_cfg.clone();
            Box::pin(async move { Driver::launch(&cfg).await })
        });
        Self::with_launcher(launcher, tap)
    }

    /// Construct with a custom launcher. Tests inject scripted drivers here.
    pub fn with_launcher(launcher: DriverLauncher, tap: Arc<TelemetryTap>) -> Self {
        Self {
            launcher,
            tap,
            slot: Mutex::new(Slot {
                state: SessionState::Closed,
                driver: None,
                pump: None,
            }),
        }
    }

    /// Current state. A `Ready` session whose browser has since died
    /// reports `Crashed`; recovery happens on the next `ensure_ready`.
    pub async fn state(&self) -> SessionState {
        let slot = self.slot.lock().await;
        if slot.state == SessionState::Ready {
            if let Some(driver) = &slot.driver {
                if !driver.is_alive() {
                    return SessionState::Crashed;
                }
            }
        }
        slot.state
    }

    /// Return a ready driver, launching or recovering as needed. From
    /// `Crashed` (or a `Ready` session whose browser died underneath us)
    /// exactly one relaunch is attempted before the error surfaces.
    pub async fn ensure_ready(&self) -> ToolResult<Arc<Driver>> {
        let mut slot = self.slot.lock().await;

        if slot.state == SessionState::Ready {
            match &slot.driver {
                Some(driver) if driver.is_alive() => return Ok(Arc::clone(driver)),
                _ => {
                    warn!(target: "browserd::session", "session marked ready but browser is gone");
                    slot.state = SessionState::Crashed;
                }
            }
        }

        if slot.state == SessionState::Crashed {
            Self::teardown(&mut slot).await;
        }
        self.launch_into(&mut slot).await
    }

    /// Tear down whatever exists (ignoring teardown errors) and launch a
    /// fresh session. Ends `Ready` or fails with a session error.
    pub async fn restart(&self) -> ToolResult<()> {
        let mut slot = self.slot.lock().await;
        Self::teardown(&mut slot).await;
        self.launch_into(&mut slot).await.map(|_| ())
    }

    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        Self::teardown(&mut slot).await;
    }

    async fn launch_into(&self, slot: &mut Slot) -> ToolResult<Arc<Driver>> {
        slot.state = SessionState::Launching;
        // The buffers describe the session being replaced.
        self.tap.reset();

        match (self.launcher)().await {
            Ok(driver) => {
                slot.pump = Some(spawn_telemetry_pump(&driver, Arc::clone(&self.tap)));
                slot.driver = Some(Arc::clone(&driver));
                slot.state = SessionState::Ready;
                info!(target: "browserd::session", "browser session ready");
                Ok(driver)
            }
            Err(err) => {
                slot.driver = None;
                slot.state = SessionState::Closed;
                Err(ToolError::Session(format!("browser launch failed: {err}")))
            }
        }
    }

    async fn teardown(slot: &mut Slot) {
        if let Some(pump) = slot.pump.take() {
            pump.abort();
        }
        if let Some(driver) = slot.driver.take() {
            driver.close().await;
        }
        slot.state = SessionState::Closed;
    }
}

/// Forward page events into the telemetry buffers. Runs outside the tool
/// execution lock so capture never blocks on (or delays) an in-flight call.
fn spawn_telemetry_pump(driver: &Arc<Driver>, tap: Arc<TelemetryTap>) -> JoinHandle<()> {
    let mut events = driver.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PageEvent::Console { level, text }) => {
                    tap.record_console(ConsoleLevel::from_cdp(&level), text);
                }
                Ok(PageEvent::Request {
                    request_id,
                    url,
                    method,
                }) => {
                    tap.record_request(request_id, url, method);
                }
                Ok(PageEvent::Response { request_id, status }) => {
                    tap.record_response(&request_id, status);
                }
                Ok(PageEvent::Crashed { reason }) => {
                    warn!(target: "browserd::session", %reason, "browser crashed");
                }
                Ok(PageEvent::Closed) => break,
                Err(RecvError::Lagged(missed)) => {
                    warn!(target: "browserd::session", missed, "telemetry pump lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
