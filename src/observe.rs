// src/observe.rs

use std::sync::atomic::{AtomicU64, Ordering};

/// Fire-and-forget observability counters.
///
/// Incrementing never blocks and never fails; a metrics exporter is outside
/// this service, so the counters are only read back by tests and log lines.
#[derive(Debug, Default)]
pub struct Metrics {
    assignments_created: AtomicU64,
    assignments_skipped: AtomicU64,
    grader_calls_ok: AtomicU64,
    grader_calls_failed: AtomicU64,
    attempts_started: AtomicU64,
    attempts_submitted: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub assignments_created: u64,
    pub assignments_skipped: u64,
    pub grader_calls_ok: u64,
    pub grader_calls_failed: u64,
    pub attempts_started: u64,
    pub attempts_submitted: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignments(&self, created: u64, skipped: u64) {
        self.assignments_created.fetch_add(created, Ordering::Relaxed);
        self.assignments_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_grader_call(&self, ok: bool) {
        if ok {
            self.grader_calls_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.grader_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_attempt_started(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt_submitted(&self) {
        self.attempts_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            assignments_created: self.assignments_created.load(Ordering::Relaxed),
            assignments_skipped: self.assignments_skipped.load(Ordering::Relaxed),
            grader_calls_ok: self.grader_calls_ok.load(Ordering::Relaxed),
            grader_calls_failed: self.grader_calls_failed.load(Ordering::Relaxed),
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            attempts_submitted: self.attempts_submitted.load(Ordering::Relaxed),
        }
    }
}
