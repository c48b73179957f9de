//! Injectable metrics sink
//!
//! Components take an `Arc<dyn MetricsSink>` instead of touching a global
//! registry. Recording a metric never fails the operation that emits it.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Prompt tokens reported by successful external calls
pub const LLM_PROMPT_TOKENS: &str = "llm_prompt_tokens";
/// External call failures that reached the caller
pub const PIPELINE_ERRORS_TOTAL: &str = "pipeline_errors_total";
/// Files removed by the retention sweep
pub const RETENTION_DELETED_FILES: &str = "retention_deleted_files";
/// Directories removed by the retention sweep
pub const RETENTION_DELETED_DIRS: &str = "retention_deleted_dirs";
/// Attempts made against the external service
pub const EXTERNAL_CALL_ATTEMPTS: &str = "external_call_attempts";
/// Latency of a single external call attempt, in milliseconds
pub const EXTERNAL_CALL_LATENCY_MS: &str = "external_call_latency_ms";

/// Receiver for counters and histograms
pub trait MetricsSink: Send + Sync {
    /// Add `value` to a counter
    fn counter(&self, name: &'static str, value: u64, labels: &[(&'static str, &str)]);

    /// Record one observation
    fn histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &'static str, _value: u64, _labels: &[(&'static str, &str)]) {}

    fn histogram(&self, _name: &'static str, _value: f64, _labels: &[(&'static str, &str)]) {}
}

/// Emits each metric as a `tracing` debug event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn counter(&self, name: &'static str, value: u64, labels: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, value, labels = ?labels, "counter");
    }

    fn histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, value, labels = ?labels, "histogram");
    }
}

/// Keeps counter totals in memory, ignoring labels
///
/// Useful for tests and for end-of-run summaries.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<BTreeMap<&'static str, u64>>,
    histograms: Mutex<BTreeMap<&'static str, Vec<f64>>>,
}

impl MemoryMetrics {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total of a counter (0 if never incremented)
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// All observations recorded for a histogram
    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.histograms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for MemoryMetrics {
    fn counter(&self, name: &'static str, value: u64, _labels: &[(&'static str, &str)]) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counters.entry(name).or_insert(0) += value;
    }

    fn histogram(&self, name: &'static str, value: f64, _labels: &[(&'static str, &str)]) {
        self.histograms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name)
            .or_default()
            .push(value);
    }
}
