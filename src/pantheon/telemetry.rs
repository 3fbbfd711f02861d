//! Per-component call telemetry.
//!
//! Tracks total/success/failure counts, an error-class histogram, and a sliding window of the
//! last 100 latencies (avg/min/max/p95) for every named component. Recording is guarded by a
//! fine-grained per-component lock rather than one global lock, so a hot component never blocks
//! an unrelated one.
//!
//! # Example
//!
//! ```
//! use pantheon_core::pantheon::telemetry::Telemetry;
//! use std::time::Duration;
//!
//! let telemetry = Telemetry::new();
//! telemetry.record("gateway.openai", Duration::from_millis(120), true, None);
//! telemetry.record("gateway.openai", Duration::from_millis(80), false, Some("timeout"));
//!
//! let snapshot = telemetry.snapshot();
//! let stats = &snapshot["gateway.openai"];
//! assert_eq!(stats.total, 2);
//! assert_eq!(stats.successes, 1);
//! assert_eq!(stats.failures, 1);
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Window size over which latency statistics (avg/min/max/p95) are computed.
const LATENCY_WINDOW: usize = 100;

/// Point-in-time latency and outcome statistics for a single component.
#[derive(Debug, Clone)]
pub struct ComponentStats {
    /// Total calls recorded, success or failure.
    pub total: u64,
    /// Calls that completed successfully.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Count per error class string (e.g. `"timeout"`, `"5xx"`).
    pub error_histogram: HashMap<String, u64>,
    /// Timestamp of the most recent `record` call.
    pub last_seen: Option<DateTime<Utc>>,
    /// Average latency over the sliding window, in milliseconds.
    pub avg_latency_ms: f64,
    /// Minimum latency over the sliding window, in milliseconds.
    pub min_latency_ms: f64,
    /// Maximum latency over the sliding window, in milliseconds.
    pub max_latency_ms: f64,
    /// 95th percentile latency over the sliding window, in milliseconds.
    pub p95_latency_ms: f64,
}

struct ComponentState {
    total: u64,
    successes: u64,
    failures: u64,
    error_histogram: HashMap<String, u64>,
    last_seen: Option<DateTime<Utc>>,
    /// Ring buffer of the last `LATENCY_WINDOW` latencies, in milliseconds.
    latencies: Vec<f64>,
}

impl ComponentState {
    fn new() -> Self {
        ComponentState {
            total: 0,
            successes: 0,
            failures: 0,
            error_histogram: HashMap::new(),
            last_seen: None,
            latencies: Vec::with_capacity(LATENCY_WINDOW),
        }
    }

    fn push_latency(&mut self, ms: f64) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.remove(0);
        }
        self.latencies.push(ms);
    }

    fn stats(&self) -> ComponentStats {
        let mut sorted = self.latencies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let (avg, min, max, p95) = if sorted.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let sum: f64 = sorted.iter().sum();
            let avg = sum / sorted.len() as f64;
            let min = sorted[0];
            let max = sorted[sorted.len() - 1];
            let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
            let idx = idx.saturating_sub(1).min(sorted.len() - 1);
            let p95 = sorted[idx];
            (avg, min, max, p95)
        };

        ComponentStats {
            total: self.total,
            successes: self.successes,
            failures: self.failures,
            error_histogram: self.error_histogram.clone(),
            last_seen: self.last_seen,
            avg_latency_ms: avg,
            min_latency_ms: min,
            max_latency_ms: max,
            p95_latency_ms: p95,
        }
    }
}

/// Process-wide (or, in tests, per-instance) telemetry aggregator.
///
/// Intended to be held behind an `Arc` and passed to every component that needs to record a
/// call outcome, rather than reached for as a free-floating singleton — this keeps tests
/// isolated from one another.
pub struct Telemetry {
    components: Mutex<HashMap<String, ComponentState>>,
}

impl Telemetry {
    /// Create an empty telemetry aggregator.
    pub fn new() -> Self {
        Telemetry {
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Record the outcome of one call against `component`.
    ///
    /// `error_class` is ignored when `success` is `true`.
    pub fn record(&self, component: &str, latency: Duration, success: bool, error_class: Option<&str>) {
        let mut components = self.components.lock().expect("telemetry lock poisoned");
        let state = components
            .entry(component.to_string())
            .or_insert_with(ComponentState::new);

        state.total += 1;
        if success {
            state.successes += 1;
        } else {
            state.failures += 1;
            if let Some(class) = error_class {
                *state.error_histogram.entry(class.to_string()).or_insert(0) += 1;
            }
        }
        state.last_seen = Some(Utc::now());
        state.push_latency(latency.as_secs_f64() * 1000.0);
    }

    /// Structured, point-in-time snapshot of every component's stats.
    pub fn snapshot(&self) -> HashMap<String, ComponentStats> {
        let components = self.components.lock().expect("telemetry lock poisoned");
        components.iter().map(|(name, state)| (name.clone(), state.stats())).collect()
    }

    /// Human-readable multiline report, one line per component.
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let mut names: Vec<&String> = snapshot.keys().collect();
        names.sort();

        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            let stats = &snapshot[name];
            lines.push(format!(
                "{name}: total={} success={} failure={} avg={:.1}ms min={:.1}ms max={:.1}ms p95={:.1}ms",
                stats.total, stats.successes, stats.failures,
                stats.avg_latency_ms, stats.min_latency_ms, stats.max_latency_ms, stats.p95_latency_ms,
            ));
        }
        lines.join("\n")
    }

    /// Export the structured snapshot to `path` as JSON.
    pub fn export(&self, path: &std::path::Path) -> std::io::Result<()> {
        let snapshot = self.snapshot();
        let serializable: HashMap<String, serde_json::Value> = snapshot
            .into_iter()
            .map(|(name, stats)| {
                (
                    name,
                    serde_json::json!({
                        "total": stats.total,
                        "successes": stats.successes,
                        "failures": stats.failures,
                        "error_histogram": stats.error_histogram,
                        "last_seen": stats.last_seen,
                        "avg_latency_ms": stats.avg_latency_ms,
                        "min_latency_ms": stats.min_latency_ms,
                        "max_latency_ms": stats.max_latency_ms,
                        "p95_latency_ms": stats.p95_latency_ms,
                    }),
                )
            })
            .collect();
        let body = serde_json::to_string_pretty(&serializable)?;
        std::fs::write(path, body)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
