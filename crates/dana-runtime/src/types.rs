//! Runtime types.

use std::collections::HashMap;

use dana_core::Phase;
use serde::Serialize;

/// Terminal state of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Success,
    Failed,
}

/// Tallies of one cycle over the fetched items.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    #[serde(rename = "itemsFetched")]
    pub items_fetched: usize,
    /// Skipped because already processed (fan-out, not forced).
    #[serde(rename = "skippedProcessed")]
    pub skipped_processed: usize,
    pub invalid: usize,
    /// Items that went through save without a failure.
    pub completed: usize,
    /// Successful compute calls across all items.
    pub computations: usize,
    /// Items routed to the error handler, by phase.
    pub failures: HashMap<Phase, usize>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn record_failure(&mut self, phase: Phase) {
        *self.failures.entry(phase).or_insert(0) += 1;
    }

    pub fn failures_in(&self, phase: Phase) -> usize {
        self.failures.get(&phase).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Result of one cycle: status plus diagnostic message (empty on success).
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub message: String,
    pub report: CycleReport,
}

impl CycleOutcome {
    pub fn success(report: CycleReport) -> Self {
        Self {
            status: CycleStatus::Success,
            message: String::new(),
            report,
        }
    }

    pub fn failed(message: impl Into<String>, report: CycleReport) -> Self {
        Self {
            status: CycleStatus::Failed,
            message: message.into(),
            report,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Success
    }
}

/// How a run loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    /// The execution guard was held elsewhere; no cycle ran.
    LockUnavailable(String),
    /// Stopped through the shutdown hook.
    Stopped { cycles: u64, failed_cycles: u64 },
}

impl RunExit {
    pub fn cycles(&self) -> u64 {
        match self {
            Self::LockUnavailable(_) => 0,
            Self::Stopped { cycles, .. } => *cycles,
        }
    }
}
