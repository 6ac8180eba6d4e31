//! Structured lifecycle events for sandbox runs.
//!
//! - Run-scoped spans via the [`RunSpan`] RAII guard
//! - `emit_*` functions for start, rejection, denial and finish
//!
//! Events are emitted at `info!` (denials at `warn!`).

use sha2::{Digest, Sha256};
use tracing::info;

use crate::guard::GuardViolation;

/// RAII guard that keeps a run-scoped span entered for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter(&run_id, "main");
/// // every event below carries run_id and entry
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str, entry: &str) -> Self {
        let span = tracing::info_span!("scriptguard.run", run_id = %run_id, entry = %entry);
        Self {
            _span: span.entered(),
        }
    }
}

/// Fresh identifier for one run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Hex SHA-256 of the script text, so logs can name a script without
/// carrying its source.
pub fn script_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn emit_run_started(run_id: &str, entry: &str, digest: &str) {
    info!(event = "run.started", run_id = %run_id, entry = %entry, script_sha256 = %digest);
}

/// The script failed policy checks; nothing was executed.
pub fn emit_run_rejected(run_id: &str, diagnostics: usize) {
    info!(event = "run.rejected", run_id = %run_id, diagnostics = diagnostics);
}

pub fn emit_run_denied(run_id: &str, violation: &GuardViolation, function: &str, line: u32) {
    tracing::warn!(
        event = "run.denied",
        run_id = %run_id,
        violation = %violation,
        function = %function,
        line = line,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool, output_bytes: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
        output_bytes = output_bytes,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id", "main");
    }

    #[test]
    fn test_script_digest_is_stable_hex() {
        let a = script_digest("def main():\n    return 1\n");
        let b = script_digest("def main():\n    return 1\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, script_digest("def main():\n    return 2\n"));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
