//! Server configuration.
//!
//! Defaults are usable out of the box; every knob can be overridden via a
//! `BROWSERD_*` environment variable, and a few have CLI flags on top.

use std::env;
use std::net::SocketAddr;

use cdp_driver::DriverConfig;
use telemetry_tap::TapConfig;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub headless: bool,
    /// Default deadline for waits, interactions and script evaluation.
    pub default_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Fixed interval for the element wait / readiness poll loops.
    pub poll_interval_ms: u64,
    pub console_capacity: usize,
    pub network_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8931".parse().expect("static addr"),
            headless: true,
            default_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            poll_interval_ms: 100,
            console_capacity: telemetry_tap::DEFAULT_CAPACITY,
            network_capacity: telemetry_tap::DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("BROWSERD_BIND", defaults.bind_addr),
            headless: env_flag("BROWSERD_HEADLESS", defaults.headless),
            default_timeout_ms: env_parse("BROWSERD_DEFAULT_TIMEOUT_MS", defaults.default_timeout_ms),
            navigation_timeout_ms: env_parse("BROWSERD_NAV_TIMEOUT_MS", defaults.navigation_timeout_ms),
            poll_interval_ms: env_parse("BROWSERD_POLL_INTERVAL_MS", defaults.poll_interval_ms).max(10),
            console_capacity: env_parse("BROWSERD_CONSOLE_CAPACITY", defaults.console_capacity),
            network_capacity: env_parse("BROWSERD_NETWORK_CAPACITY", defaults.network_capacity),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            headless: self.headless,
            ..DriverConfig::default()
        }
    }

    pub fn tap_config(&self) -> TapConfig {
        TapConfig {
            console_capacity: self.console_capacity,
            network_capacity: self.network_capacity,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}
