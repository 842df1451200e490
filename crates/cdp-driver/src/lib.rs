//! Chromium DevTools Protocol driver for browserd.
//!
//! The driver is the capability boundary around the native browser: it
//! launches a Chromium process, speaks raw CDP over the DevTools websocket,
//! and keeps exactly one page target attached. Everything above it (session
//! lifecycle, waits, DOM serialization, dispatch) lives in the `browserd`
//! crate and consumes this surface.

pub mod driver;
pub mod error;
pub mod events;
pub mod transport;

pub use driver::{Driver, EvalOutcome};
pub use error::{DriverError, DriverErrorKind};
pub use events::PageEvent;
pub use transport::{ChromiumTransport, CdpTransport, CommandTarget, TransportEvent};

use std::{
    env,
    path::{Path, PathBuf},
};

use which::which;

/// Configuration for launching and driving the browser process.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Per-command deadline applied at the transport.
    pub command_deadline_ms: u64,
    /// How long to wait for the initial page target to attach.
    pub attach_deadline_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            executable: detect_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            command_deadline_ms: 30_000,
            attach_deadline_ms: 5_000,
        }
    }
}

fn resolve_headless_default() -> bool {
    match env::var("BROWSERD_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("BROWSERD_CHROME_PROFILE") {
        return PathBuf::from(path);
    }
    Path::new("./.browserd-profile").into()
}

/// Locate a Chromium-family executable: explicit env override first, then
/// PATH lookup, then the usual installation directories.
pub fn detect_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("BROWSERD_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                }
            }
        }
        paths
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}
