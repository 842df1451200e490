//! The driver proper: one browser process, one attached page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverErrorKind};
use crate::events::PageEvent;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
use crate::DriverConfig;

const ATTACH_POLL: Duration = Duration::from_millis(50);

/// Result of a `Runtime.evaluate` round trip, before the tool layer decides
/// which failures count as script errors versus serialization errors.
#[derive(Clone, Debug, Default)]
pub struct EvalOutcome {
    /// The by-value result, when the protocol could produce one.
    pub value: Option<Value>,
    /// CDP `RemoteObject.type` of the result (`function`, `object`, ...).
    pub object_type: Option<String>,
    /// Set when the result had an `objectId` but no by-value representation.
    pub unserializable: bool,
    /// Exception description when the evaluated code threw.
    pub exception: Option<String>,
}

#[derive(Clone, Debug)]
struct AttachedPage {
    target_id: String,
    session_id: String,
}

/// Owns the transport and exactly one page target. Dropping the driver (or
/// calling [`Driver::close`]) tears the browser down with it.
pub struct Driver {
    transport: Arc<dyn CdpTransport>,
    events: broadcast::Sender<PageEvent>,
    page: RwLock<Option<AttachedPage>>,
    // target id -> cdp session id, filled by the pump as attach events arrive
    attachments: DashMap<String, String>,
    crashed: AtomicBool,
    shutdown: CancellationToken,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    attach_deadline: Duration,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("page", &*self.page.read())
            .field("crashed", &self.crashed.load(Ordering::Relaxed))
            .field("attach_deadline", &self.attach_deadline)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Launch a browser process and attach its initial page.
    pub async fn launch(cfg: &DriverConfig) -> Result<Arc<Self>, DriverError> {
        let transport = Arc::new(ChromiumTransport::launch(cfg).await?);
        Self::start(cfg, transport).await
    }

    /// Start on a caller-supplied transport. This is the entry point tests
    /// use with a scripted transport.
    pub async fn start(
        cfg: &DriverConfig,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<Arc<Self>, DriverError> {
        transport.handshake().await?;

        let (events, _) = broadcast::channel(512);
        let driver = Arc::new(Self {
            transport,
            events,
            page: RwLock::new(None),
            attachments: DashMap::new(),
            crashed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            pump: parking_lot::Mutex::new(None),
            attach_deadline: Duration::from_millis(cfg.attach_deadline_ms),
        });

        let handle = tokio::spawn(Self::pump(Arc::clone(&driver)));
        *driver.pump.lock() = Some(handle);

        driver.open_page().await?;
        Ok(driver)
    }

    /// Subscribe to page events. Receivers that lag are allowed to drop
    /// messages; telemetry capture keeps its own bounds.
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive() && !self.crashed.load(Ordering::Relaxed)
    }

    /// Tear down the browser. Errors are logged, not surfaced; callers are
    /// replacing or abandoning this driver either way.
    pub async fn close(&self) {
        let _ = self
            .transport
            .send(CommandTarget::Browser, "Browser.close", Value::Object(Default::default()))
            .await;
        self.shutdown.cancel();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// Send a command scoped to the attached page session.
    pub async fn page_command(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let session = self
            .page
            .read()
            .as_ref()
            .map(|p| p.session_id.clone())
            .ok_or_else(|| DriverError::new(DriverErrorKind::NotAttached))?;
        self.transport
            .send(CommandTarget::Session(session), method, params)
            .await
    }

    /// Evaluate an expression in the page, returning the raw outcome.
    pub async fn evaluate(&self, expression: &str) -> Result<EvalOutcome, DriverError> {
        let response = self
            .page_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        let mut outcome = EvalOutcome::default();
        if let Some(details) = response.get("exceptionDetails") {
            outcome.exception = Some(describe_exception(details));
            return Ok(outcome);
        }
        if let Some(result) = response.get("result") {
            outcome.object_type = result
                .get("type")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            match result.get("value") {
                Some(value) => outcome.value = Some(value.clone()),
                None => {
                    // A remote object with an id but no value could not be
                    // marshalled by value (cyclic, a node handle, ...).
                    outcome.unserializable = result.get("objectId").is_some();
                }
            }
        }
        Ok(outcome)
    }

    pub async fn dispatch_mouse(&self, payload: Value) -> Result<(), DriverError> {
        self.page_command("Input.dispatchMouseEvent", payload)
            .await
            .map(|_| ())
    }

    pub async fn dispatch_key(&self, payload: Value) -> Result<(), DriverError> {
        self.page_command("Input.dispatchKeyEvent", payload)
            .await
            .map(|_| ())
    }

    pub async fn insert_text(&self, text: &str) -> Result<(), DriverError> {
        self.page_command("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    pub async fn start_navigation(&self, url: &str) -> Result<(), DriverError> {
        self.page_command("Page.navigate", json!({ "url": url }))
            .await
            .map(|_| ())
    }

    pub async fn start_reload(&self) -> Result<(), DriverError> {
        self.page_command("Page.reload", Value::Object(Default::default()))
            .await
            .map(|_| ())
    }

    async fn open_page(&self) -> Result<(), DriverError> {
        let response = self
            .transport
            .send(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Protocol)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + self.attach_deadline;
        let session_id = loop {
            if let Some(entry) = self.attachments.get(&target_id) {
                break entry.value().clone();
            }
            if Instant::now() >= deadline {
                return Err(DriverError::new(DriverErrorKind::NotAttached)
                    .with_hint("timed out waiting for page target to attach"));
            }
            sleep(ATTACH_POLL).await;
        };

        *self.page.write() = Some(AttachedPage {
            target_id: target_id.clone(),
            session_id: session_id.clone(),
        });
        info!(target: "cdp-driver", %target_id, "page target attached");

        for domain in ["Page.enable", "Runtime.enable", "Network.enable", "Inspector.enable"] {
            self.page_command(domain, Value::Object(Default::default()))
                .await?;
        }
        Ok(())
    }

    fn page_session_matches(&self, session: Option<&String>) -> bool {
        match (session, self.page.read().as_ref()) {
            (Some(sid), Some(page)) => *sid == page.session_id,
            // Browser-level events (target lifecycle) carry no session.
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    async fn pump(driver: Arc<Self>) {
        loop {
            tokio::select! {
                _ = driver.shutdown.cancelled() => break,
                event = driver.transport.next_event() => {
                    match event {
                        Some(ev) => driver.handle_event(ev),
                        None => {
                            driver.crashed.store(true, Ordering::Relaxed);
                            let _ = driver.events.send(PageEvent::Closed);
                            break;
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-driver", "event pump exiting");
    }

    fn handle_event(&self, event: TransportEvent) {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let target_type = event
                    .params
                    .pointer("/targetInfo/type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if target_type != "page" {
                    return;
                }
                let target_id = event
                    .params
                    .pointer("/targetInfo/targetId")
                    .and_then(|v| v.as_str());
                let session_id = event.params.get("sessionId").and_then(|v| v.as_str());
                if let (Some(target), Some(session)) = (target_id, session_id) {
                    self.attachments
                        .insert(target.to_string(), session.to_string());
                }
            }
            "Target.targetDestroyed" => {
                let destroyed = event.params.get("targetId").and_then(|v| v.as_str());
                let ours = self.page.read().as_ref().map(|p| p.target_id.clone());
                if let (Some(tid), Some(page_tid)) = (destroyed, ours) {
                    if tid == page_tid {
                        warn!(target: "cdp-driver", "page target destroyed");
                        self.crashed.store(true, Ordering::Relaxed);
                        let _ = self.events.send(PageEvent::Closed);
                    }
                }
            }
            "Target.detachedFromTarget" => {
                let detached = event.params.get("sessionId").and_then(|v| v.as_str());
                let ours = self.page.read().as_ref().map(|p| p.session_id.clone());
                if let (Some(sid), Some(page_sid)) = (detached, ours) {
                    if sid == page_sid {
                        warn!(target: "cdp-driver", "page session detached");
                        self.crashed.store(true, Ordering::Relaxed);
                        let _ = self.events.send(PageEvent::Closed);
                    }
                }
            }
            "Inspector.targetCrashed" => {
                if self.page_session_matches(event.session_id.as_ref()) {
                    self.crashed.store(true, Ordering::Relaxed);
                    let _ = self.events.send(PageEvent::Crashed {
                        reason: "renderer crashed".to_string(),
                    });
                }
            }
            "Runtime.consoleAPICalled" => {
                if !self.page_session_matches(event.session_id.as_ref()) {
                    return;
                }
                let level = event
                    .params
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("log")
                    .to_string();
                let text = console_text(&event.params);
                let _ = self.events.send(PageEvent::Console { level, text });
            }
            "Runtime.exceptionThrown" => {
                if !self.page_session_matches(event.session_id.as_ref()) {
                    return;
                }
                let text = event
                    .params
                    .get("exceptionDetails")
                    .map(describe_exception)
                    .unwrap_or_else(|| "uncaught exception".to_string());
                let _ = self.events.send(PageEvent::Console {
                    level: "error".to_string(),
                    text,
                });
            }
            "Network.requestWillBeSent" => {
                if !self.page_session_matches(event.session_id.as_ref()) {
                    return;
                }
                let request_id = event
                    .params
                    .get("requestId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let url = event
                    .params
                    .pointer("/request/url")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let method = event
                    .params
                    .pointer("/request/method")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let _ = self.events.send(PageEvent::Request {
                    request_id,
                    url,
                    method,
                });
            }
            "Network.responseReceived" => {
                if !self.page_session_matches(event.session_id.as_ref()) {
                    return;
                }
                let request_id = event
                    .params
                    .get("requestId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let status = event
                    .params
                    .pointer("/response/status")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u16;
                let _ = self.events.send(PageEvent::Response { request_id, status });
            }
            other => {
                debug!(target: "cdp-driver", method = %other, "unhandled cdp event");
            }
        }
    }
}

/// Flatten console call arguments into one display string.
fn console_text(params: &Value) -> String {
    let args = params
        .get("args")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let parts: Vec<String> = args
        .iter()
        .map(|arg| match arg.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => arg
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("<object>")
                .to_string(),
        })
        .collect();
    parts.join(" ")
}

fn describe_exception(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(|v| v.as_str())
        .or_else(|| details.get("text").and_then(|v| v.as_str()))
        .unwrap_or("uncaught exception")
        .to_string()
}
