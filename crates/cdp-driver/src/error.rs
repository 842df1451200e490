use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced by the driver.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum DriverErrorKind {
    #[error("chromium launch failed")]
    Launch,
    #[error("cdp i/o failure")]
    Io,
    #[error("command timed out")]
    Timeout,
    #[error("no page target attached")]
    NotAttached,
    #[error("cdp protocol error")]
    Protocol,
}

/// Driver error with an optional human-oriented hint. Mirrors the shape the
/// tool layer converts into its own taxonomy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub hint: Option<String>,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind) -> Self {
        Self { kind, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// The raw protocol message, when this error carries one.
    pub fn message(&self) -> &str {
        self.hint.as_deref().unwrap_or("")
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for DriverError {}
