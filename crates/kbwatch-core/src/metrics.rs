//! Global atomic counters for kbwatch observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the orchestrator does so at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    rows_scanned: AtomicU64,
    failures_detected: AtomicU64,
    remediations_triggered: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            rows_scanned: AtomicU64::new(0),
            failures_detected: AtomicU64::new(0),
            remediations_triggered: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    /// Add `n` to the rows-scanned counter.
    pub fn add_rows_scanned(&self, n: u64) {
        self.rows_scanned.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "rows_scanned", n, "counter incremented");
    }

    pub fn inc_failures_detected(&self) {
        self.failures_detected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures_detected", "counter incremented");
    }

    pub fn inc_remediations_triggered(&self) {
        self.remediations_triggered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "remediations_triggered", "counter incremented");
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_sent", "counter incremented");
    }

    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            rows_scanned = self.rows_scanned(),
            failures_detected = self.failures_detected(),
            remediations_triggered = self.remediations_triggered(),
            notifications_sent = self.notifications_sent(),
            notifications_failed = self.notifications_failed(),
        );
    }

    pub fn rows_scanned(&self) -> u64 {
        self.rows_scanned.load(Ordering::Relaxed)
    }

    pub fn failures_detected(&self) -> u64 {
        self.failures_detected.load(Ordering::Relaxed)
    }

    pub fn remediations_triggered(&self) -> u64 {
        self.remediations_triggered.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.rows_scanned.store(0, Ordering::Relaxed);
        self.failures_detected.store(0, Ordering::Relaxed);
        self.remediations_triggered.store(0, Ordering::Relaxed);
        self.notifications_sent.store(0, Ordering::Relaxed);
        self.notifications_failed.store(0, Ordering::Relaxed);
    }
}
