//! Dispatch metrics, prometheus-backed.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounterVec, Registry,
};
use tracing::error;

lazy_static! {
    static ref TOOL_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("browserd_tool_calls_total", "Total tool calls received"),
        &["tool"]
    )
    .unwrap();
    static ref TOOL_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "browserd_tool_failures_total",
            "Total tool calls that returned an error envelope"
        ),
        &["tool", "kind"]
    )
    .unwrap();
    static ref TOOL_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "browserd_tool_duration_seconds",
            "Tool call latency, validation through envelope",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["tool"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register dispatch metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, TOOL_CALLS_TOTAL.clone());
    register(registry, TOOL_FAILURES_TOTAL.clone());
    register(registry, TOOL_DURATION.clone());
}

pub fn record_call(tool: &str) {
    TOOL_CALLS_TOTAL.with_label_values(&[tool]).inc();
}

pub fn record_failure(tool: &str, kind: &str) {
    TOOL_FAILURES_TOTAL.with_label_values(&[tool, kind]).inc();
}

pub fn record_duration(tool: &str, duration: Duration) {
    TOOL_DURATION
        .with_label_values(&[tool])
        .observe(duration.as_secs_f64());
}
