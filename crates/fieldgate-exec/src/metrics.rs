//! Lightweight counters for engine lifecycle and fetch activity.
//!
//! Counters are plain atomics; every update is also emitted as a `tracing`
//! event so a subscriber in the binary layer can forward them.

use std::sync::atomic::{AtomicU64, Ordering};

pub fn emit_event(event: &str, key_values: &[(&str, String)]) {
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub engine_starts: u64,
    pub idle_stops: u64,
    pub fetches: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    engine_starts: AtomicU64,
    idle_stops: AtomicU64,
    fetches: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64, event: &str) {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        emit_event(event, &[("total", n.to_string())]);
    }

    pub fn engine_started(&self) {
        Self::bump(&self.engine_starts, "engine_start");
    }

    pub fn engine_idle_stopped(&self) {
        Self::bump(&self.idle_stops, "engine_idle_stop");
    }

    pub fn fetch(&self) {
        Self::bump(&self.fetches, "fetch");
    }

    pub fn retry(&self) {
        Self::bump(&self.retries, "retry");
    }

    pub fn failure(&self) {
        Self::bump(&self.failures, "failure");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            engine_starts: self.engine_starts.load(Ordering::Relaxed),
            idle_stops: self.idle_stops.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
