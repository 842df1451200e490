//! Shared test support: a scripted CDP transport and session wiring.
//!
//! The transport answers commands from substring-matched rules instead of a
//! live browser, synthesizes the page-attach handshake, and records every
//! command it sees so tests can assert on ordering.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use browserd::config::ServerConfig;
use browserd::dispatch::Dispatcher;
use browserd::session::{DriverLauncher, SessionManager};
use cdp_driver::{
    CdpTransport, CommandTarget, Driver, DriverConfig, DriverError, TransportEvent,
};
use serde_json::{json, Value};
use telemetry_tap::{TapConfig, TelemetryTap};
use tokio::sync::{mpsc, Mutex};

enum Reply {
    Value(Value),
    Error(DriverError),
}

struct Rule {
    marker: String,
    reply: Reply,
    once: bool,
}

pub struct ScriptedTransport {
    alive: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    rules: Mutex<VecDeque<Rule>>,
    pub sent: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(64);
        Arc::new(Self {
            alive: AtomicBool::new(true),
            events_tx: tx,
            events_rx: Mutex::new(rx),
            rules: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Persistent rule: any `Runtime.evaluate` whose expression contains
    /// `marker` evaluates to `value`.
    pub async fn eval_value(&self, marker: &str, value: Value) {
        self.add_rule(marker, Reply::Value(wrap_eval(value)), false).await;
    }

    /// One-shot variant of [`eval_value`].
    pub async fn eval_value_once(&self, marker: &str, value: Value) {
        self.add_rule(marker, Reply::Value(wrap_eval(value)), true).await;
    }

    /// Persistent rule returning a raw CDP response body (for scripting
    /// exceptionDetails, objectId-only results, ...). Matches on the method
    /// name or on an expression substring.
    pub async fn raw_response(&self, marker: &str, response: Value) {
        self.add_rule(marker, Reply::Value(response), false).await;
    }

    /// Rule that fails the command with a driver error.
    pub async fn fail_with(&self, marker: &str, error: DriverError) {
        self.add_rule(marker, Reply::Error(error), false).await;
    }

    async fn add_rule(&self, marker: &str, reply: Reply, once: bool) {
        self.rules.lock().await.push_front(Rule {
            marker: marker.to_string(),
            reply,
            once,
        });
    }

    /// Feed a protocol event into the driver's pump, as if the browser sent it.
    pub async fn feed(&self, method: &str, params: Value, session_id: Option<&str>) {
        self.events_tx
            .send(TransportEvent {
                method: method.to_string(),
                params,
                session_id: session_id.map(|s| s.to_string()),
            })
            .await
            .expect("event channel open");
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub async fn sent_methods(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(m, _)| m.clone()).collect()
    }
}

fn command_matches(method: &str, params: &Value, marker: &str) -> bool {
    if method.contains(marker) {
        return true;
    }
    params
        .get("expression")
        .and_then(|v| v.as_str())
        .is_some_and(|expr| expr.contains(marker))
}

fn wrap_eval(value: Value) -> Value {
    let kind = match &value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        _ => "object",
    };
    json!({ "result": { "type": kind, "value": value } })
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn handshake(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn send(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        self.sent
            .lock()
            .await
            .push((method.to_string(), params.clone()));

        if method == "Target.createTarget" {
            self.events_tx
                .send(TransportEvent {
                    method: "Target.attachedToTarget".into(),
                    params: json!({
                        "sessionId": "sess-1",
                        "targetInfo": { "targetId": "target-1", "type": "page" },
                    }),
                    session_id: None,
                })
                .await
                .ok();
            return Ok(json!({ "targetId": "target-1" }));
        }

        let mut rules = self.rules.lock().await;
        if let Some(pos) = rules
            .iter()
            .position(|rule| command_matches(method, &params, &rule.marker))
        {
            let reply = match &rules[pos].reply {
                Reply::Value(value) => Ok(value.clone()),
                Reply::Error(err) => Err(err.clone()),
            };
            if rules[pos].once {
                let _ = rules.remove(pos);
            }
            return reply;
        }

        if method == "Runtime.evaluate" {
            // Unscripted evaluation: behave like `undefined`.
            return Ok(json!({ "result": { "type": "undefined" } }));
        }
        Ok(Value::Null)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Session manager whose launcher starts drivers on the given transport.
pub fn scripted_session(
    transport: &Arc<ScriptedTransport>,
    tap: &Arc<TelemetryTap>,
) -> Arc<SessionManager> {
    let transport = Arc::clone(transport);
    let launcher: DriverLauncher = Arc::new(move || {
        let transport = Arc::clone(&transport);
        Box::pin(async move {
            Driver::start(&DriverConfig::default(), transport as Arc<dyn CdpTransport>).await
        })
    });
    Arc::new(SessionManager::with_launcher(launcher, Arc::clone(tap)))
}

pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.default_timeout_ms = 500;
    config.navigation_timeout_ms = 500;
    config.poll_interval_ms = 20;
    config
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub tap: Arc<TelemetryTap>,
    pub session: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn harness() -> Harness {
    harness_with_config(fast_config())
}

pub fn harness_with_config(config: ServerConfig) -> Harness {
    let transport = ScriptedTransport::new();
    let tap = Arc::new(TelemetryTap::new(TapConfig {
        console_capacity: config.console_capacity,
        network_capacity: config.network_capacity,
    }));
    let session = scripted_session(&transport, &tap);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&session),
        Arc::clone(&tap),
        config,
    ));
    Harness {
        transport,
        tap,
        session,
        dispatcher,
    }
}

/// Script a full successful single-element interaction flow for `selector`.
pub async fn script_single_element(transport: &ScriptedTransport) {
    transport
        .eval_value(
            "classes:",
            json!({ "elements": [ {
                "index": 0, "tag": "button", "id": "go", "classes": [], "text": "Go", "visible": true,
            } ] }),
        )
        .await;
    transport
        .eval_value("anyVisible", json!({ "matched": true }))
        .await;
    transport
        .eval_value("scrollIntoView", json!({ "x": 40.0, "y": 60.0 }))
        .await;
    transport
        .eval_value("not-editable", json!({ "status": "ready" }))
        .await;
}
