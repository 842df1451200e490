//! Bounded telemetry buffers for a single browser session.
//!
//! The tap keeps two independent ring buffers, one for console messages and
//! one for network requests. Appends come from the session event pump and
//! must never contend with the tool execution lock, so each buffer sits
//! behind its own short-lived mutex. Snapshots are taken in arrival order;
//! a snapshot with `clear` set is atomic with respect to concurrent appends.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default capacity applied to each buffer when none is configured.
pub const DEFAULT_CAPACITY: usize = 512;

/// Severity levels reported by the page's console API.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map a CDP `Runtime.consoleAPICalled` type string onto a level.
    /// Unrecognized types (`table`, `dir`, ...) collapse to `Log`.
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "debug" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "warning" | "warn" => ConsoleLevel::Warning,
            "error" | "assert" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }
}

/// One captured console message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One captured network request. `status` stays empty until the matching
/// response arrives; requests that never resolve keep it empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEntry {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    request_id: String,
}

struct Ring<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    fn snapshot(&mut self, clear: bool) -> Vec<T>
    where
        T: Clone,
    {
        if clear {
            self.entries.drain(..).collect()
        } else {
            self.entries.iter().cloned().collect()
        }
    }
}

/// Capacity settings for the two buffers.
#[derive(Clone, Copy, Debug)]
pub struct TapConfig {
    pub console_capacity: usize,
    pub network_capacity: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            console_capacity: DEFAULT_CAPACITY,
            network_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// The session telemetry tap. One instance lives for the whole process; its
/// contents describe the current session only and are wiped on relaunch.
pub struct TelemetryTap {
    console: Mutex<Ring<ConsoleEntry>>,
    network: Mutex<Ring<RequestEntry>>,
}

impl TelemetryTap {
    pub fn new(config: TapConfig) -> Self {
        Self {
            console: Mutex::new(Ring::new(config.console_capacity)),
            network: Mutex::new(Ring::new(config.network_capacity)),
        }
    }

    pub fn record_console(&self, level: ConsoleLevel, text: String) {
        let entry = ConsoleEntry {
            level,
            text,
            timestamp: Utc::now(),
        };
        self.console.lock().push(entry);
    }

    pub fn record_request(&self, request_id: String, url: String, method: String) {
        let entry = RequestEntry {
            url,
            method,
            status: None,
            timestamp: Utc::now(),
            request_id,
        };
        self.network.lock().push(entry);
    }

    /// Attach a response status to the buffered request it answers. The scan
    /// runs newest-first because responses trail their requests closely; a
    /// request already evicted is silently dropped.
    pub fn record_response(&self, request_id: &str, status: u16) {
        let mut guard = self.network.lock();
        for entry in guard.entries.iter_mut().rev() {
            if entry.request_id == request_id {
                entry.status = Some(status);
                return;
            }
        }
        debug!(target: "telemetry-tap", request_id, "response for evicted or unknown request");
    }

    pub fn console_snapshot(&self, clear: bool) -> Vec<ConsoleEntry> {
        self.console.lock().snapshot(clear)
    }

    pub fn network_snapshot(&self, clear: bool) -> Vec<RequestEntry> {
        self.network.lock().snapshot(clear)
    }

    /// Wipe both buffers. Called when the session they describe is replaced.
    pub fn reset(&self) {
        self.console.lock().entries.clear();
        self.network.lock().entries.clear();
    }

    /// Total entries evicted due to capacity, for diagnostics.
    pub fn evicted(&self) -> (u64, u64) {
        (self.console.lock().evicted, self.network.lock().evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap_with_capacity(capacity: usize) -> TelemetryTap {
        TelemetryTap::new(TapConfig {
            console_capacity: capacity,
            network_capacity: capacity,
        })
    }

    #[test]
    fn keeps_arrival_order() {
        let tap = tap_with_capacity(8);
        for i in 0..5 {
            tap.record_console(ConsoleLevel::Log, format!("line {i}"));
        }
        let snapshot = tap.console_snapshot(false);
        let texts: Vec<&str> = snapshot.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let tap = tap_with_capacity(3);
        for i in 0..5 {
            tap.record_console(ConsoleLevel::Log, format!("line {i}"));
        }
        let snapshot = tap.console_snapshot(false);
        let texts: Vec<&str> = snapshot.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(tap.evicted().0, 2);
    }

    #[test]
    fn snapshot_with_clear_drains_exactly_once() {
        let tap = tap_with_capacity(8);
        tap.record_console(ConsoleLevel::Error, "boom".into());
        let first = tap.console_snapshot(true);
        assert_eq!(first.len(), 1);
        assert!(tap.console_snapshot(false).is_empty());
    }

    #[test]
    fn response_status_binds_to_matching_request() {
        let tap = tap_with_capacity(8);
        tap.record_request("r1".into(), "https://a.example/".into(), "GET".into());
        tap.record_request("r2".into(), "https://b.example/".into(), "POST".into());
        tap.record_response("r1", 200);
        tap.record_response("r2", 404);
        let snapshot = tap.network_snapshot(false);
        assert_eq!(snapshot[0].status, Some(200));
        assert_eq!(snapshot[1].status, Some(404));
    }

    #[test]
    fn response_for_evicted_request_is_dropped() {
        let tap = tap_with_capacity(1);
        tap.record_request("r1".into(), "https://a.example/".into(), "GET".into());
        tap.record_request("r2".into(), "https://b.example/".into(), "GET".into());
        tap.record_response("r1", 200);
        let snapshot = tap.network_snapshot(false);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, None);
    }

    #[test]
    fn reset_wipes_both_buffers() {
        let tap = tap_with_capacity(8);
        tap.record_console(ConsoleLevel::Log, "hello".into());
        tap.record_request("r1".into(), "https://a.example/".into(), "GET".into());
        tap.reset();
        assert!(tap.console_snapshot(false).is_empty());
        assert!(tap.network_snapshot(false).is_empty());
    }

    #[test]
    fn console_level_mapping_covers_cdp_aliases() {
        assert_eq!(ConsoleLevel::from_cdp("warning"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from_cdp("assert"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_cdp("table"), ConsoleLevel::Log);
    }
}
