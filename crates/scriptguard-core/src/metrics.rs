//! Global atomic counters for sandbox runs.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`]
//! to emit the current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    policy_rejections: AtomicU64,
    capability_denials: AtomicU64,
    runs_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            policy_rejections: AtomicU64::new(0),
            capability_denials: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_policy_rejections(&self) {
        self.policy_rejections.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_rejections", "counter incremented");
    }

    pub fn inc_capability_denials(&self) {
        self.capability_denials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "capability_denials", "counter incremented");
    }

    /// A run that returned a value.
    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            policy_rejections = self.policy_rejections(),
            capability_denials = self.capability_denials(),
            runs_completed = self.runs_completed(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn policy_rejections(&self) -> u64 {
        self.policy_rejections.load(Ordering::Relaxed)
    }

    pub fn capability_denials(&self) -> u64 {
        self.capability_denials.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.policy_rejections.store(0, Ordering::Relaxed);
        self.capability_denials.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_runs_started();
        m.inc_runs_started();
        m.inc_policy_rejections();
        m.inc_capability_denials();
        m.inc_runs_completed();
        assert_eq!(m.runs_started(), 2);
        assert_eq!(m.policy_rejections(), 1);
        assert_eq!(m.capability_denials(), 1);
        assert_eq!(m.runs_completed(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_runs_started();
        m.inc_capability_denials();
        m.reset();
        assert_eq!(m.runs_started(), 0);
        assert_eq!(m.capability_denials(), 0);
    }
}
