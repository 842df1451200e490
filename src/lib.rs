//! browserd: a stateful browser-automation tool server.
//!
//! One long-lived Chromium session, one page, a fixed set of imperative
//! tools (navigate, explore DOM, interact, evaluate script, read captured
//! telemetry) behind a uniform request/response envelope. Calls are
//! serialized through a single execution lock; telemetry capture runs
//! beside it.

pub mod config;
pub mod dispatch;
pub mod dom;
pub mod errors;
pub mod interact;
pub mod keys;
pub mod locate;
pub mod metrics;
pub mod nav;
pub mod script;
pub mod server;
pub mod session;
pub mod wait;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, ToolCall, ToolResponse};
pub use errors::{ToolError, ToolResult};
pub use session::{SessionManager, SessionState};
