//! Tool-level error taxonomy.
//!
//! Every failure a caller can observe is one of these variants; the
//! dispatcher converts them into the uniform error envelope. Driver
//! failures collapse into `Session` (the browser is unusable) except for
//! protocol-level surprises, which stay `Unknown` so they are never
//! silently reclassified.

use cdp_driver::{DriverError, DriverErrorKind};
use thiserror::Error;

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Clone, Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("browser session failure: {0}")]
    Session(String),
    #[error("no element matches selector '{0}'")]
    ElementNotFound(String),
    #[error("element '{selector}' did not become interactable within {timeout_ms}ms")]
    ElementNotInteractable { selector: String, timeout_ms: u64 },
    #[error("wait for '{selector}' to become {state} timed out after {timeout_ms}ms")]
    WaitTimeout {
        selector: String,
        state: &'static str,
        timeout_ms: u64,
    },
    #[error("navigation to '{url}' timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },
    #[error("script error: {0}")]
    Script(String),
    #[error("result not representable: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Unknown(String),
}

impl ToolError {
    /// Stable kind tag carried in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "ValidationError",
            ToolError::Session(_) => "SessionError",
            ToolError::ElementNotFound(_) => "ElementNotFound",
            ToolError::ElementNotInteractable { .. } => "ElementNotInteractable",
            ToolError::WaitTimeout { .. } => "WaitTimeout",
            ToolError::NavigationTimeout { .. } => "NavigationTimeout",
            ToolError::Script(_) => "ScriptError",
            ToolError::Serialization(_) => "SerializationError",
            ToolError::Unknown(_) => "Unknown",
        }
    }
}

impl From<DriverError> for ToolError {
    fn from(err: DriverError) -> Self {
        match err.kind {
            DriverErrorKind::Launch
            | DriverErrorKind::Io
            | DriverErrorKind::Timeout
            | DriverErrorKind::NotAttached => ToolError::Session(err.to_string()),
            DriverErrorKind::Protocol => ToolError::Unknown(err.to_string()),
        }
    }
}
