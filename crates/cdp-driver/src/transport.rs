//! Websocket transport to the browser process.
//!
//! `ChromiumTransport` launches a Chromium child, pulls the DevTools
//! websocket URL off its stderr, and runs a single loop that multiplexes
//! outgoing commands (matched to responses by `CallId`) with incoming
//! protocol events. The `CdpTransport` trait is the seam test code mocks.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{DriverError, DriverErrorKind};
use crate::DriverConfig;

/// One decoded protocol event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Addressing for an outgoing command.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Post-connect handshake: enable target discovery and auto-attach.
    async fn handshake(&self) -> Result<(), DriverError>;
    /// Next protocol event, or `None` once the connection is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError>;
    /// Whether the underlying connection is still believed to be up.
    fn is_alive(&self) -> bool;
}

struct Outbound {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, DriverError>>,
}

/// Real transport over a launched Chromium child process.
pub struct ChromiumTransport {
    command_tx: mpsc::Sender<Outbound>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    command_deadline: Duration,
    alive: Arc<AtomicBool>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl ChromiumTransport {
    pub async fn launch(cfg: &DriverConfig) -> Result<Self, DriverError> {
        let browser_cfg = build_browser_config(cfg)?;
        let mut child = browser_cfg.launch().map_err(|err| {
            DriverError::new(DriverErrorKind::Launch)
                .with_hint(format!("failed to spawn chromium: {err}"))
        })?;

        let ws_url = extract_ws_url(&mut child).await?;
        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| DriverError::new(DriverErrorKind::Io).with_hint(err.to_string()))?;

        info!(target: "cdp-driver", url = %ws_url, "chromium connection established");
        Ok(Self::from_connection(conn, Some(child), cfg.command_deadline_ms))
    }

    fn from_connection(
        conn: Connection<CdpEventMessage>,
        child: Option<Child>,
        command_deadline_ms: u64,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);
        let alive = Arc::new(AtomicBool::new(true));

        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            if let Err(err) = run_loop(conn, command_rx, events_tx).await {
                error!(target: "cdp-driver", ?err, "transport loop terminated with error");
            }
            loop_alive.store(false, Ordering::Relaxed);
        });

        Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            command_deadline: Duration::from_millis(command_deadline_ms),
            alive,
            loop_task,
            child: Mutex::new(child),
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn handshake(&self) -> Result<(), DriverError> {
        self.send(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
        )
        .await?;
        self.send(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let outbound = Outbound {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };
        self.command_tx
            .send(outbound)
            .await
            .map_err(|err| DriverError::new(DriverErrorKind::Io).with_hint(err.to_string()))?;

        match timeout(self.command_deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::new(DriverErrorKind::Io)
                .with_hint("command response channel closed")),
            Err(_) => Err(DriverError::new(DriverErrorKind::Timeout)
                .with_hint(format!("{method} response not received in time"))),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl Drop for ChromiumTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-driver", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-driver", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), DriverError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, DriverError>>> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                let session = match cmd.target {
                    CommandTarget::Browser => None,
                    CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
                };
                let method: MethodId = cmd.method.clone().into();
                match conn.submit_command(method, session, cmd.params) {
                    Ok(call_id) => {
                        inflight.insert(call_id, cmd.responder);
                    }
                    Err(err) => {
                        let _ = cmd.responder.send(Err(
                            DriverError::new(DriverErrorKind::Io).with_hint(err.to_string()),
                        ));
                    }
                }
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(sender) = inflight.remove(&resp.id) {
                            let _ = sender.send(extract_payload(resp));
                        }
                    }
                    Some(Ok(Message::Event(event))) => {
                        match decode_event(event) {
                            Ok(decoded) => {
                                if event_tx.send(decoded).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(err) => {
                                warn!(target: "cdp-driver", ?err, "failed to decode cdp event");
                            }
                        }
                    }
                    Some(Err(err)) => {
                        let mapped = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(mapped.clone()));
                        }
                        return Err(mapped);
                    }
                    None => {
                        let gone = DriverError::new(DriverErrorKind::Io)
                            .with_hint("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(gone.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn decode_event(event: CdpEventMessage) -> Result<TransportEvent, DriverError> {
    let raw: CdpJsonEventMessage = event
        .try_into()
        .map_err(|err| DriverError::new(DriverErrorKind::Protocol).with_hint(format!("{err}")))?;
    Ok(TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    })
}

fn extract_payload(resp: Response) -> Result<Value, DriverError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        Err(DriverError::new(DriverErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message)))
    } else {
        Err(DriverError::new(DriverErrorKind::Protocol).with_hint("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> DriverError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => DriverError::new(DriverErrorKind::Timeout).with_hint(hint),
        CdpError::JavascriptException(_) | CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
            DriverError::new(DriverErrorKind::Protocol).with_hint(hint)
        }
        _ => DriverError::new(DriverErrorKind::Io).with_hint(hint),
    }
}

fn build_browser_config(cfg: &DriverConfig) -> Result<BrowserConfig, DriverError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(DriverError::new(DriverErrorKind::Launch).with_hint(format!(
            "chromium executable not found at {} (set BROWSERD_CHROME)",
            cfg.executable.display()
        )));
    }
    if cfg.executable.as_os_str().is_empty() {
        return Err(DriverError::new(DriverErrorKind::Launch)
            .with_hint("no chromium executable detected; set BROWSERD_CHROME"));
    }

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                DriverError::new(DriverErrorKind::Launch)
                    .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        DriverError::new(DriverErrorKind::Launch)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.command_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }
    if std::env::var("BROWSERD_DISABLE_SANDBOX")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder
        .args(args)
        .chrome_executable(cfg.executable.clone())
        .user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        DriverError::new(DriverErrorKind::Launch).with_hint(format!("browser config error: {err}"))
    })
}

/// Pull the DevTools websocket URL off the chromium child's stderr.
async fn extract_ws_url(child: &mut Child) -> Result<String, DriverError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        DriverError::new(DriverErrorKind::Launch).with_hint("chromium process missing stderr")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                DriverError::new(DriverErrorKind::Launch).with_hint(err.to_string())
            })?;
            preview.push(line.clone());
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(
            DriverError::new(DriverErrorKind::Launch).with_hint(format!(
                "chromium exited before exposing devtools url. stderr preview: {}",
                preview.iter().take(8).cloned().collect::<Vec<_>>().join(" | ")
            )),
        )
    };

    timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| {
            DriverError::new(DriverErrorKind::Launch)
                .with_hint("timed out waiting for chromium devtools websocket url")
        })?
}
