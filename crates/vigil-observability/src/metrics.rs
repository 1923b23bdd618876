//! Sweep metrics as an explicit, injected sink.
//!
//! Evaluators take a `&dyn MetricsSink` scoped to one sweep invocation
//! instead of writing to a process-global facade, so tests see exactly the
//! counters their sweep produced and nothing else.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Receives counters and observations from a sweep.
pub trait MetricsSink: Send + Sync {
    /// Adds to a named counter.
    fn incr(&self, name: &str, by: u64);

    /// Records one observation of a named value (e.g. a duration in
    /// seconds).
    fn observe(&self, name: &str, value: f64);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn incr(&self, _name: &str, _by: u64) {}
    fn observe(&self, _name: &str, _value: f64) {}
}

/// In-memory sink, used by tests and for sweep-summary snapshots.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    observations: Mutex<HashMap<String, Vec<f64>>>,
}

/// Point-in-time snapshot of an [`InMemoryMetrics`] sink.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Counter values by name.
    pub counters: HashMap<String, u64>,
    /// Observation series by name.
    pub observations: HashMap<String, Vec<f64>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of everything recorded so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().unwrap().clone(),
            observations: self.observations.lock().unwrap().clone(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr(&self, name: &str, by: u64) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += by;
    }

    fn observe(&self, name: &str, value: f64) {
        self.observations
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
