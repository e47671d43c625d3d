//! Orchestrator — one analysis cycle over every fetched item.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use anyhow::Context;
use tracing::debug;

use dana_core::ItemName;

use crate::diagnostics::Diagnostics;
use crate::pipeline::{FailureOf, ItemOf, Pipeline, Shape};
use crate::types::{CycleOutcome, CycleReport};

/// Drives a pipeline shape through fetch → validate → process for each item,
/// isolating per-item failures from the rest of the cycle.
pub struct Orchestrator<S: Shape> {
    shape: S,
    diagnostics: Diagnostics,
}

impl<S: Shape> Orchestrator<S> {
    pub fn new(shape: S, diagnostics: Diagnostics) -> Self {
        debug!("Orchestrator initialized: shape={}, tag={}", shape.label(), diagnostics.tag());
        Self { shape, diagnostics }
    }

    pub fn pipeline(&self) -> &S::Pipeline {
        self.shape.pipeline()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Run one cycle.
    ///
    /// Phase failures are handed to the pipeline's error handler and never
    /// fail the cycle. Any other failure (fetch, validation, the error
    /// handler itself, a panic) aborts the rest of the cycle and yields a
    /// failed outcome carrying the full error chain.
    pub fn run_cycle(&self, force: bool) -> CycleOutcome {
        let start = Instant::now();
        let mut report = CycleReport::default();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.scan(force, &mut report)));
        report.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => CycleOutcome::success(report),
            Ok(Err(err)) => CycleOutcome::failed(format!("{:?}", err), report),
            Err(payload) => CycleOutcome::failed(
                format!("cycle panicked: {}", panic_message(payload.as_ref())),
                report,
            ),
        }
    }

    fn scan(&self, force: bool, report: &mut CycleReport) -> anyhow::Result<()> {
        let pipeline = self.shape.pipeline();
        let items = pipeline.fetch_items().context("failed to fetch items")?;

        for mut item in items {
            report.items_fetched += 1;

            if self.shape.is_done(&item, force)? {
                report.skipped_processed += 1;
                continue;
            }

            if !pipeline.is_valid(&mut item)? {
                report.invalid += 1;
                continue;
            }

            let name = pipeline.item_name(&item);
            let context = self
                .shape
                .prepare(&item)
                .with_context(|| format!("failed to prepare {}", name))?;

            match self.shape.process(&name, &item, &context, report) {
                Ok(()) => {
                    report.completed += 1;
                    debug!("Processed {}", name);
                }
                Err(failure) => self.route_failure(&name, &item, failure, report)?,
            }
        }

        Ok(())
    }

    fn route_failure(
        &self,
        name: &ItemName,
        item: &ItemOf<S>,
        failure: FailureOf<S>,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let phase = failure.phase();
        report.record_failure(phase);
        self.diagnostics.item_failed(name, phase, &failure);

        self.shape
            .pipeline()
            .on_error(name, item, phase, &failure)
            .with_context(|| format!("error handler failed for {} ({})", name, phase))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
