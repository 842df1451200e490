//! Tool dispatch: the single entry point for every operation.
//!
//! A call moves through `Received -> Validated -> Executing -> outcome`.
//! Argument shapes are checked before any session work, so malformed input
//! never launches a browser. Execution is serialized through one FIFO-fair
//! lock: at most one call touches the page at a time, and queued calls run
//! in arrival order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::dom;
use crate::errors::{ToolError, ToolResult};
use crate::interact::{self, InteractionTimeouts};
use crate::keys::KeyChord;
use crate::locate;
use crate::metrics;
use crate::nav;
use crate::script;
use crate::session::SessionManager;
use crate::wait::{self, WaitCondition};

const DEFAULT_MAX_DEPTH: u32 = 10;

/// One incoming tool call, as delivered by the transport.
#[derive(Clone, Debug, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// The uniform response envelope: a success payload or a typed error,
/// never both.
#[derive(Clone, Debug, Serialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorBody>,
}

impl ToolResponse {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(err: &ToolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ToolErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExplorePageParams {
    pub selector: Option<String>,
    pub max_depth: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExploreElementParams {
    pub selector: String,
    pub max_depth: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectorParams {
    pub selector: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    pub selector: String,
    pub state: WaitCondition,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FillParams {
    pub selector: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteParams {
    pub code: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadTelemetryParams {
    #[serde(default)]
    pub clear: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PressKeyParams {
    pub selector: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

/// A validated call: tool identity plus typed arguments. Construction is
/// the `Received -> Validated` transition and touches no session state.
#[derive(Clone, Debug)]
pub enum ToolInvocation {
    RestartBrowser,
    NavigateToUrl(NavigateParams),
    ExplorePageDom(ExplorePageParams),
    ExploreElementDom(ExploreElementParams),
    FindElements(SelectorParams),
    WaitForElement(WaitParams),
    ClickOnElement(SelectorParams),
    GetElementTextContent(SelectorParams),
    FillInput(FillParams),
    ReloadPage,
    ExecuteJs(ExecuteParams),
    GetConsoleLogs(ReadTelemetryParams),
    GetNetworkRequests(ReadTelemetryParams),
    PressKey(PressKeyParams, KeyChord),
}

impl ToolInvocation {
    pub fn parse(call: &ToolCall) -> ToolResult<Self> {
        let args = match &call.arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };

        match call.name.as_str() {
            "restart_browser" => {
                decode::<EmptyParams>(args)?;
                Ok(Self::RestartBrowser)
            }
            "navigate_to_url" => {
                let params: NavigateParams = decode(args)?;
                validate_url(&params.url)?;
                Ok(Self::NavigateToUrl(params))
            }
            "explore_page_dom" => {
                let params: ExplorePageParams = decode(args)?;
                if let Some(selector) = &params.selector {
                    validate_selector(selector)?;
                }
                Ok(Self::ExplorePageDom(params))
            }
            "explore_element_dom" => {
                let params: ExploreElementParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::ExploreElementDom(params))
            }
            "find_elements" => {
                let params: SelectorParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::FindElements(params))
            }
            "wait_for_element" => {
                let params: WaitParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::WaitForElement(params))
            }
            "click_on_element" => {
                let params: SelectorParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::ClickOnElement(params))
            }
            "get_element_text_content" => {
                let params: SelectorParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::GetElementTextContent(params))
            }
            "fill_input" => {
                let params: FillParams = decode(args)?;
                validate_selector(&params.selector)?;
                Ok(Self::FillInput(params))
            }
            "reload_page" => {
                decode::<EmptyParams>(args)?;
                Ok(Self::ReloadPage)
            }
            "execute_js" => {
                let params: ExecuteParams = decode(args)?;
                if params.code.trim().is_empty() {
                    return Err(ToolError::Validation("code must not be empty".into()));
                }
                Ok(Self::ExecuteJs(params))
            }
            "get_console_logs" => Ok(Self::GetConsoleLogs(decode(args)?)),
            "get_network_requests" => Ok(Self::GetNetworkRequests(decode(args)?)),
            "press_key" => {
                let params: PressKeyParams = decode(args)?;
                validate_selector(&params.selector)?;
                let chord = KeyChord::parse(&params.key)?;
                Ok(Self::PressKey(params, chord))
            }
            other => Err(ToolError::Validation(format!("unknown tool '{other}'"))),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::RestartBrowser => "restart_browser",
            Self::NavigateToUrl(_) => "navigate_to_url",
            Self::ExplorePageDom(_) => "explore_page_dom",
            Self::ExploreElementDom(_) => "explore_element_dom",
            Self::FindElements(_) => "find_elements",
            Self::WaitForElement(_) => "wait_for_element",
            Self::ClickOnElement(_) => "click_on_element",
            Self::GetElementTextContent(_) => "get_element_text_content",
            Self::FillInput(_) => "fill_input",
            Self::ReloadPage => "reload_page",
            Self::ExecuteJs(_) => "execute_js",
            Self::GetConsoleLogs(_) => "get_console_logs",
            Self::GetNetworkRequests(_) => "get_network_requests",
            Self::PressKey(..) => "press_key",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args).map_err(|err| ToolError::Validation(err.to_string()))
}

fn validate_selector(selector: &str) -> ToolResult<()> {
    if selector.trim().is_empty() {
        return Err(ToolError::Validation("selector must not be empty".into()));
    }
    Ok(())
}

fn validate_url(raw: &str) -> ToolResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|err| ToolError::Validation(format!("invalid url '{raw}': {err}")))?;
    match parsed.scheme() {
        "http" | "https" | "file" | "about" | "data" => Ok(()),
        other => Err(ToolError::Validation(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}

pub struct Dispatcher {
    session: Arc<SessionManager>,
    tap: Arc<telemetry_tap::TelemetryTap>,
    config: ServerConfig,
    exec_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<SessionManager>,
        tap: Arc<telemetry_tap::TelemetryTap>,
        config: ServerConfig,
    ) -> Self {
        Self {
            session,
            tap,
            config,
            exec_lock: Mutex::new(()),
        }
    }

    /// Run one call to completion and fold the outcome into the envelope.
    /// Nothing escapes as a raw panic or error; `Unknown` outcomes are
    /// logged before they are returned.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let started = Instant::now();
        let tool = call.name.clone();
        metrics::record_call(&tool);

        let outcome = self.run(call).await;
        metrics::record_duration(&tool, started.elapsed());

        match outcome {
            Ok(result) => ToolResponse::success(result),
            Err(err) => {
                if let ToolError::Unknown(message) = &err {
                    error!(target: "browserd::dispatch", %tool, %message, "tool call hit an unexpected failure");
                } else {
                    debug!(target: "browserd::dispatch", %tool, error = %err, "tool call failed");
                }
                metrics::record_failure(&tool, err.kind());
                ToolResponse::failure(&err)
            }
        }
    }

    async fn run(&self, call: ToolCall) -> ToolResult<Value> {
        // Validation happens before the lock and before any session work.
        let invocation = ToolInvocation::parse(&call)?;
        debug!(target: "browserd::dispatch", tool = invocation.tool_name(), "executing");

        // Serialize page access; waiters queue in arrival order.
        let _guard = self.exec_lock.lock().await;
        self.execute(invocation).await
    }

    async fn execute(&self, invocation: ToolInvocation) -> ToolResult<Value> {
        if let ToolInvocation::RestartBrowser = invocation {
            self.session.restart().await?;
            return Ok(json!({ "status": "restarted" }));
        }

        let driver = self.session.ensure_ready().await?;
        let timeouts = self.timeouts(None);

        match invocation {
            ToolInvocation::RestartBrowser => unreachable!("handled above"),
            ToolInvocation::NavigateToUrl(params) => {
                let timeout = self.navigation_timeout(params.timeout_ms);
                nav::navigate(&driver, &params.url, timeout, self.poll_interval()).await?;
                Ok(json!({ "status": "navigated", "url": params.url }))
            }
            ToolInvocation::ExplorePageDom(params) => {
                let depth = params.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
                let tree = dom::explore(&driver, params.selector.as_deref(), depth).await?;
                serde_json::to_value(tree).map_err(|err| ToolError::Unknown(err.to_string()))
            }
            ToolInvocation::ExploreElementDom(params) => {
                let depth = params.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
                let tree = dom::explore(&driver, Some(&params.selector), depth).await?;
                serde_json::to_value(tree).map_err(|err| ToolError::Unknown(err.to_string()))
            }
            ToolInvocation::FindElements(params) => {
                let elements = locate::resolve(&driver, &params.selector).await?;
                serde_json::to_value(elements).map_err(|err| ToolError::Unknown(err.to_string()))
            }
            ToolInvocation::WaitForElement(params) => {
                let timeout = self.action_timeout(params.timeout_ms);
                wait::wait_for(
                    &driver,
                    &params.selector,
                    params.state,
                    timeout,
                    self.poll_interval(),
                )
                .await?;
                Ok(json!({
                    "status": "satisfied",
                    "selector": params.selector,
                    "state": params.state.as_str(),
                }))
            }
            ToolInvocation::ClickOnElement(params) => {
                interact::click(&driver, &params.selector, timeouts).await?;
                Ok(json!({ "status": "clicked", "selector": params.selector }))
            }
            ToolInvocation::GetElementTextContent(params) => {
                let text = interact::text_content(&driver, &params.selector, timeouts).await?;
                Ok(Value::String(text))
            }
            ToolInvocation::FillInput(params) => {
                interact::fill(&driver, &params.selector, &params.value, timeouts).await?;
                Ok(json!({ "status": "filled", "selector": params.selector }))
            }
            ToolInvocation::ReloadPage => {
                nav::reload(&driver, self.navigation_timeout(None), self.poll_interval()).await?;
                Ok(json!({ "status": "reloaded" }))
            }
            ToolInvocation::ExecuteJs(params) => {
                script::evaluate(&driver, &params.code, &params.args).await
            }
            ToolInvocation::GetConsoleLogs(params) => {
                let entries = self.tap.console_snapshot(params.clear);
                serde_json::to_value(entries).map_err(|err| ToolError::Unknown(err.to_string()))
            }
            ToolInvocation::GetNetworkRequests(params) => {
                let entries = self.tap.network_snapshot(params.clear);
                serde_json::to_value(entries).map_err(|err| ToolError::Unknown(err.to_string()))
            }
            ToolInvocation::PressKey(params, chord) => {
                interact::press_key(&driver, &params.selector, &chord, timeouts).await?;
                Ok(json!({ "status": "pressed", "selector": params.selector, "key": params.key }))
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn action_timeout(&self, override_ms: Option<u64>) -> Duration {
        Duration::from_millis(override_ms.unwrap_or(self.config.default_timeout_ms))
    }

    fn navigation_timeout(&self, override_ms: Option<u64>) -> Duration {
        Duration::from_millis(override_ms.unwrap_or(self.config.navigation_timeout_ms))
    }

    fn timeouts(&self, override_ms: Option<u64>) -> InteractionTimeouts {
        InteractionTimeouts {
            action: self.action_timeout(override_ms),
            poll_interval: self.poll_interval(),
        }
    }
}

/// Static description of one tool, served from `GET /tools`.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: schemars::schema::RootSchema,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "restart_browser",
            description: "Tear down the current browser session and launch a fresh one",
            input_schema: schema_for!(EmptyParams),
        },
        ToolSpec {
            name: "navigate_to_url",
            description: "Navigate the page to a URL and wait for the document to load",
            input_schema: schema_for!(NavigateParams),
        },
        ToolSpec {
            name: "explore_page_dom",
            description: "Serialize the page DOM (optionally rooted at a selector) to a bounded depth",
            input_schema: schema_for!(ExplorePageParams),
        },
        ToolSpec {
            name: "explore_element_dom",
            description: "Serialize the DOM subtree rooted at the selector's first match",
            input_schema: schema_for!(ExploreElementParams),
        },
        ToolSpec {
            name: "find_elements",
            description: "List descriptors for every element matching a selector",
            input_schema: schema_for!(SelectorParams),
        },
        ToolSpec {
            name: "wait_for_element",
            description: "Wait for a selector to become attached, detached, visible or hidden",
            input_schema: schema_for!(WaitParams),
        },
        ToolSpec {
            name: "click_on_element",
            description: "Click the element matching a selector",
            input_schema: schema_for!(SelectorParams),
        },
        ToolSpec {
            name: "get_element_text_content",
            description: "Read the text content (or input value) of the matching element",
            input_schema: schema_for!(SelectorParams),
        },
        ToolSpec {
            name: "fill_input",
            description: "Replace the content of an input field with the given value",
            input_schema: schema_for!(FillParams),
        },
        ToolSpec {
            name: "reload_page",
            description: "Reload the current page",
            input_schema: schema_for!(EmptyParams),
        },
        ToolSpec {
            name: "execute_js",
            description: "Evaluate script in the page and return its JSON-representable result",
            input_schema: schema_for!(ExecuteParams),
        },
        ToolSpec {
            name: "get_console_logs",
            description: "Snapshot captured console messages, optionally clearing the buffer",
            input_schema: schema_for!(ReadTelemetryParams),
        },
        ToolSpec {
            name: "get_network_requests",
            description: "Snapshot captured network requests, optionally clearing the buffer",
            input_schema: schema_for!(ReadTelemetryParams),
        },
        ToolSpec {
            name: "press_key",
            description: "Send a key press (optionally with modifiers) to the matching element",
            input_schema: schema_for!(PressKeyParams),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn unknown_tool_is_a_validation_error() {
        let err = ToolInvocation::parse(&call("take_screenshot", json!({}))).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn missing_required_arguments_fail_fast() {
        let err = ToolInvocation::parse(&call("navigate_to_url", json!({}))).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        let err = ToolInvocation::parse(&call("fill_input", json!({ "selector": "#a" })))
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn unexpected_arguments_are_rejected() {
        let err = ToolInvocation::parse(&call(
            "find_elements",
            json!({ "selector": "#a", "limit": 5 }),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn null_arguments_mean_empty() {
        assert!(ToolInvocation::parse(&call("reload_page", Value::Null)).is_ok());
        assert!(ToolInvocation::parse(&call("get_console_logs", Value::Null)).is_ok());
    }

    #[test]
    fn bad_urls_never_reach_the_session() {
        for bad in ["not a url", "ftp://example.com/", "javascript:alert(1)"] {
            let err = ToolInvocation::parse(&call("navigate_to_url", json!({ "url": bad })))
                .unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "url: {bad}");
        }
        assert!(ToolInvocation::parse(&call(
            "navigate_to_url",
            json!({ "url": "https://example.com/" })
        ))
        .is_ok());
    }

    #[test]
    fn press_key_validates_the_key_upfront() {
        let err = ToolInvocation::parse(&call(
            "press_key",
            json!({ "selector": "#a", "key": "NotAKey" }),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        assert!(ToolInvocation::parse(&call(
            "press_key",
            json!({ "selector": "#a", "key": "Control+Enter" }),
        ))
        .is_ok());
    }

    #[test]
    fn wait_state_parses_from_lowercase_names() {
        let parsed = ToolInvocation::parse(&call(
            "wait_for_element",
            json!({ "selector": "#a", "state": "hidden", "timeout_ms": 500 }),
        ))
        .unwrap();
        match parsed {
            ToolInvocation::WaitForElement(params) => {
                assert_eq!(params.state, WaitCondition::Hidden);
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[test]
    fn tool_specs_cover_the_whole_surface() {
        let valid_args = [
            ("restart_browser", json!({})),
            ("navigate_to_url", json!({ "url": "https://example.com/" })),
            ("explore_page_dom", json!({ "max_depth": 2 })),
            ("explore_element_dom", json!({ "selector": "#a", "max_depth": 1 })),
            ("find_elements", json!({ "selector": ".item" })),
            ("wait_for_element", json!({ "selector": "#a", "state": "visible" })),
            ("click_on_element", json!({ "selector": "#a" })),
            ("get_element_text_content", json!({ "selector": "#a" })),
            ("fill_input", json!({ "selector": "#a", "value": "hi" })),
            ("reload_page", json!({})),
            ("execute_js", json!({ "code": "1 + 1" })),
            ("get_console_logs", json!({ "clear": true })),
            ("get_network_requests", json!({})),
            ("press_key", json!({ "selector": "#a", "key": "Enter" })),
        ];

        let specs = tool_specs();
        assert_eq!(specs.len(), valid_args.len());
        for (name, args) in valid_args {
            assert!(
                specs.iter().any(|s| s.name == name),
                "{name} missing from tool_specs"
            );
            let parsed = ToolInvocation::parse(&call(name, args)).unwrap();
            assert_eq!(parsed.tool_name(), name);
        }
    }
}
