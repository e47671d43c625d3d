//! Pipeline contract and the two pipeline shapes the orchestrator drives.
//!
//! A concrete analysis implements [`Pipeline`] plus exactly one of
//! [`FanOutPipeline`] (one pre-processing result computed under a sequence of
//! calibrations) or [`LinearPipeline`] (configured pre-processing, a single
//! calibration). Wrapping it in [`FanOut`] or [`Linear`] selects the
//! [`Shape`] strategy the orchestrator uses for the per-item sub-sequence.

use anyhow::Result as AnyResult;
use dana_core::{Epoch, ItemName, Phase};

use crate::failure::*;
use crate::types::CycleReport;

/// Failure type of a pipeline.
pub type PipelineFailure<P> =
    StageFailure<<P as Pipeline>::PreProcessed, <P as Pipeline>::Output>;

/// Item type driven by a shape.
pub type ItemOf<S> = <<S as Shape>::Pipeline as Pipeline>::Item;

/// Failure type of the pipeline behind a shape.
pub type FailureOf<S> = PipelineFailure<<S as Shape>::Pipeline>;

/// Capabilities shared by every pipeline shape.
pub trait Pipeline {
    /// One unit of work. Opaque to the orchestrator.
    type Item;
    /// Collection returned by a fetch. Must be finite.
    type Items: IntoIterator<Item = Self::Item>;
    /// Artifact produced by pre-processing.
    type PreProcessed;
    /// Artifact produced by computation, consumed by save.
    type Output;

    /// Fetch the items of this cycle from the repository.
    fn fetch_items(&self) -> AnyResult<Self::Items>;

    /// Domain validation. May flag the item invalid and persist the reason.
    /// Returning `false` skips the item without reporting an error.
    fn is_valid(&self, item: &mut Self::Item) -> AnyResult<bool>;

    fn item_name(&self, item: &Self::Item) -> ItemName;

    /// Record a per-item failure, e.g. by flagging the item failed.
    fn on_error(
        &self,
        name: &ItemName,
        item: &Self::Item,
        phase: Phase,
        failure: &StageFailure<Self::PreProcessed, Self::Output>,
    ) -> AnyResult<()>;
}

/// One pre-processing result fanned out over many calibrations, followed by
/// a single save.
pub trait FanOutPipeline: Pipeline {
    type Calibration;

    /// Whether the item was already analyzed. Skipped unless forced.
    fn is_processed(&self, item: &Self::Item) -> AnyResult<bool>;

    fn current_epoch(&self, item: &Self::Item) -> AnyResult<Epoch>;

    fn pre_process(
        &self,
        name: &ItemName,
        item: &Self::Item,
        epoch: Epoch,
    ) -> Result<Self::PreProcessed, PreProcessingError<Self::PreProcessed>>;

    /// Known calibrations for the item, including any newly available ones.
    fn resolve_calibrations(
        &self,
        name: &ItemName,
        item: &Self::Item,
        pre_processed: &Self::PreProcessed,
    ) -> Result<Vec<Self::Calibration>, ComputationConfigurationError<Self::PreProcessed>>;

    fn compute(
        &self,
        name: &ItemName,
        item: &Self::Item,
        epoch: Epoch,
        calibration: &Self::Calibration,
        pre_processed: &Self::PreProcessed,
    ) -> Result<Self::Output, ComputationError<Self::PreProcessed, Self::Output>>;

    /// Persist the results of every calibration, in calibration order.
    fn save(
        &self,
        name: &ItemName,
        item: &Self::Item,
        epoch: Epoch,
        pre_processed: &Self::PreProcessed,
        results: Vec<Self::Output>,
    ) -> Result<(), SavingError>;
}

/// Configured pre-processing followed by a single calibrated computation.
pub trait LinearPipeline: Pipeline {
    type PreProcessingConfig;
    type Calibration;

    fn resolve_pre_processing_configuration(
        &self,
        name: &ItemName,
        item: &Self::Item,
    ) -> Result<Self::PreProcessingConfig, PreProcessingConfigurationError>;

    fn pre_process(
        &self,
        name: &ItemName,
        item: &Self::Item,
        config: &Self::PreProcessingConfig,
    ) -> Result<Self::PreProcessed, PreProcessingError<Self::PreProcessed>>;

    fn resolve_calibration(
        &self,
        name: &ItemName,
        item: &Self::Item,
        pre_processed: &Self::PreProcessed,
    ) -> Result<Self::Calibration, ComputationConfigurationError<Self::PreProcessed>>;

    fn compute(
        &self,
        name: &ItemName,
        item: &Self::Item,
        pre_processed: &Self::PreProcessed,
        calibration: &Self::Calibration,
    ) -> Result<Self::Output, ComputationError<Self::PreProcessed, Self::Output>>;

    fn save(
        &self,
        name: &ItemName,
        item: &Self::Item,
        pre_processed: &Self::PreProcessed,
        output: &Self::Output,
    ) -> Result<(), SavingError>;
}

/// Shape-specific part of the per-item sequence.
///
/// The orchestrator owns fetch, validation, naming and failure routing; a
/// shape decides whether an item is skipped, what per-item context it needs
/// and how the configuration/compute/save sub-sequence runs.
pub trait Shape {
    type Pipeline: Pipeline;
    /// Per-item context resolved after naming (the epoch for fan-out).
    type Context;

    fn pipeline(&self) -> &Self::Pipeline;

    fn label(&self) -> &'static str;

    /// Whether to skip the item before validation.
    fn is_done(&self, item: &<Self::Pipeline as Pipeline>::Item, force: bool) -> AnyResult<bool>;

    fn prepare(&self, item: &<Self::Pipeline as Pipeline>::Item) -> AnyResult<Self::Context>;

    /// Run pre-processing through save for one item.
    fn process(
        &self,
        name: &ItemName,
        item: &<Self::Pipeline as Pipeline>::Item,
        context: &Self::Context,
        report: &mut CycleReport,
    ) -> Result<(), PipelineFailure<Self::Pipeline>>;
}

/// Fan-out (multi-calibration) shape.
pub struct FanOut<P>(pub P);

impl<P: FanOutPipeline> Shape for FanOut<P> {
    type Pipeline = P;
    type Context = Epoch;

    fn pipeline(&self) -> &P {
        &self.0
    }

    fn label(&self) -> &'static str {
        "fan-out"
    }

    fn is_done(&self, item: &P::Item, force: bool) -> AnyResult<bool> {
        if force {
            return Ok(false);
        }
        self.0.is_processed(item)
    }

    fn prepare(&self, item: &P::Item) -> AnyResult<Epoch> {
        self.0.current_epoch(item)
    }

    fn process(
        &self,
        name: &ItemName,
        item: &P::Item,
        epoch: &Epoch,
        report: &mut CycleReport,
    ) -> Result<(), PipelineFailure<P>> {
        let epoch = *epoch;
        let pipeline = &self.0;

        let pre_processed = pipeline.pre_process(name, item, epoch)?;
        let calibrations = pipeline.resolve_calibrations(name, item, &pre_processed)?;

        let mut results = Vec::with_capacity(calibrations.len());
        for (index, calibration) in calibrations.iter().enumerate() {
            let output = pipeline
                .compute(name, item, epoch, calibration, &pre_processed)
                .map_err(|mut e| {
                    e.configuration.get_or_insert(index);
                    e
                })?;
            report.computations += 1;
            results.push(output);
        }

        pipeline.save(name, item, epoch, &pre_processed, results)?;
        Ok(())
    }
}

/// Linear (single-calibration) shape.
pub struct Linear<P>(pub P);

impl<P: LinearPipeline> Shape for Linear<P> {
    type Pipeline = P;
    type Context = ();

    fn pipeline(&self) -> &P {
        &self.0
    }

    fn label(&self) -> &'static str {
        "linear"
    }

    fn is_done(&self, _item: &P::Item, _force: bool) -> AnyResult<bool> {
        Ok(false)
    }

    fn prepare(&self, _item: &P::Item) -> AnyResult<()> {
        Ok(())
    }

    fn process(
        &self,
        name: &ItemName,
        item: &P::Item,
        _context: &(),
        report: &mut CycleReport,
    ) -> Result<(), PipelineFailure<P>> {
        let pipeline = &self.0;

        let config = pipeline.resolve_pre_processing_configuration(name, item)?;
        let pre_processed = pipeline.pre_process(name, item, &config)?;
        let calibration = pipeline.resolve_calibration(name, item, &pre_processed)?;
        let output = pipeline.compute(name, item, &pre_processed, &calibration)?;
        report.computations += 1;
        pipeline.save(name, item, &pre_processed, &output)?;
        Ok(())
    }
}
