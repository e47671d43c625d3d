//! Tagged diagnostics handle held by the orchestrator.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dana_core::{ItemName, Phase, DEFAULT_TAG};
use tracing::{error, info, warn};

use crate::types::CycleOutcome;

/// Emits leveled records carrying a fixed domain tag.
///
/// Critical records are `error!` events with `severity = "critical"`. The
/// handle counts what it emitted so callers can assert on escalation.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tag: Arc<str>,
    counts: Arc<Counts>,
}

#[derive(Debug, Default)]
struct Counts {
    info: AtomicU64,
    warn: AtomicU64,
    critical: AtomicU64,
}

impl Diagnostics {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self {
            tag: Arc::from(tag.as_ref()),
            counts: Arc::new(Counts::default()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn info(&self, message: impl Display) {
        self.counts.info.fetch_add(1, Ordering::Relaxed);
        info!(tag = %self.tag, "{}", message);
    }

    pub fn critical(&self, message: impl Display) {
        self.counts.critical.fetch_add(1, Ordering::Relaxed);
        error!(tag = %self.tag, severity = "critical", "{}", message);
    }

    /// Report a per-item failure; saving failures are escalated.
    pub fn item_failed(&self, name: &ItemName, phase: Phase, failure: impl Display) {
        if phase.is_critical() {
            self.counts.critical.fetch_add(1, Ordering::Relaxed);
            error!(
                tag = %self.tag,
                severity = "critical",
                item = %name,
                phase = %phase,
                "Failed to save results: {}",
                failure
            );
        } else {
            self.counts.warn.fetch_add(1, Ordering::Relaxed);
            warn!(
                tag = %self.tag,
                item = %name,
                phase = %phase,
                "Item failed: {}",
                failure
            );
        }
    }

    pub fn cycle_started(&self) {
        self.info("Running Data ANAlysis");
    }

    /// Log the end of a cycle; a failed cycle is raised at critical severity.
    pub fn cycle_finished(&self, outcome: &CycleOutcome) {
        let report = &outcome.report;
        self.info(format_args!(
            "Done Running Data ANAlysis: fetched={}, completed={}, invalid={}, skipped={}, failed={}, duration={}ms",
            report.items_fetched,
            report.completed,
            report.invalid,
            report.skipped_processed,
            report.total_failures(),
            report.duration_ms
        ));
        if !outcome.is_success() {
            self.critical(format_args!("computation cycle failed: {}", outcome.message));
        }
    }

    pub fn info_count(&self) -> u64 {
        self.counts.info.load(Ordering::Relaxed)
    }

    pub fn warn_count(&self) -> u64 {
        self.counts.warn.load(Ordering::Relaxed)
    }

    pub fn critical_count(&self) -> u64 {
        self.counts.critical.load(Ordering::Relaxed)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CycleReport;

    #[test]
    fn test_saving_failures_escalate() {
        let diagnostics = Diagnostics::default();
        diagnostics.item_failed(&"a".to_string(), Phase::PreProcessing, "bad header");
        diagnostics.item_failed(&"b".to_string(), Phase::Saving, "disk full");
        assert_eq!(diagnostics.warn_count(), 1);
        assert_eq!(diagnostics.critical_count(), 1);
    }

    #[test]
    fn test_failed_cycle_is_critical() {
        let diagnostics = Diagnostics::new("THERMAL");
        assert_eq!(diagnostics.tag(), "THERMAL");

        diagnostics.cycle_finished(&CycleOutcome::success(CycleReport::default()));
        assert_eq!(diagnostics.critical_count(), 0);

        diagnostics.cycle_finished(&CycleOutcome::failed("boom", CycleReport::default()));
        assert_eq!(diagnostics.critical_count(), 1);
        assert_eq!(diagnostics.info_count(), 2);
    }

    #[test]
    fn test_clones_share_counts() {
        let diagnostics = Diagnostics::default();
        let clone = diagnostics.clone();
        clone.critical("late save");
        assert_eq!(diagnostics.critical_count(), 1);
    }
}
