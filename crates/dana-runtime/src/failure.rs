//! Phase-specific pipeline failures.
//!
//! Each stage of the pipeline fails with its own error type, carrying the
//! underlying cause plus whatever intermediate artifacts existed when the
//! stage gave up. [`StageFailure`] unifies them so the orchestrator can tag
//! the failure with its [`Phase`] and hand it to the pipeline's error handler.

use anyhow::Error as AnyError;
use dana_core::Phase;
use thiserror::Error;

/// The configuration pre-processing depends on could not be resolved.
#[derive(Debug, Error)]
#[error("pre-processing configuration unavailable: {cause}")]
pub struct PreProcessingConfigurationError {
    #[source]
    pub cause: AnyError,
}

impl PreProcessingConfigurationError {
    pub fn new(cause: impl Into<AnyError>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Pre-processing of an item's uploaded data failed.
#[derive(Debug, Error)]
#[error("pre-processing failed: {reason}: {cause}")]
pub struct PreProcessingError<P> {
    /// Why pre-processing stopped, suitable for an invalid-reason field.
    pub reason: String,
    /// Whatever part of the result had been built.
    pub partial: Option<P>,
    #[source]
    pub cause: AnyError,
}

impl<P> PreProcessingError<P> {
    pub fn new(reason: impl Into<String>, cause: impl Into<AnyError>) -> Self {
        Self {
            reason: reason.into(),
            partial: None,
            cause: cause.into(),
        }
    }

    pub fn with_partial(mut self, partial: P) -> Self {
        self.partial = Some(partial);
        self
    }
}

/// The calibration(s) computation runs under could not be resolved.
#[derive(Debug, Error)]
#[error("calibration unavailable: {cause}")]
pub struct ComputationConfigurationError<P> {
    #[source]
    pub cause: AnyError,
    /// Pre-processing result the resolution was attempted with.
    pub pre_processed: Option<P>,
}

impl<P> ComputationConfigurationError<P> {
    pub fn new(cause: impl Into<AnyError>) -> Self {
        Self {
            cause: cause.into(),
            pre_processed: None,
        }
    }

    pub fn with_pre_processed(mut self, pre_processed: P) -> Self {
        self.pre_processed = Some(pre_processed);
        self
    }
}

/// Computing a result under one calibration failed.
#[derive(Debug, Error)]
#[error("computation failed: {cause}")]
pub struct ComputationError<P, R> {
    #[source]
    pub cause: AnyError,
    pub pre_processed: Option<P>,
    /// Whatever part of the result had been computed.
    pub partial: Option<R>,
    /// Position of the failing calibration in the resolved sequence. Filled
    /// in by the orchestrator when the pipeline leaves it unset.
    pub configuration: Option<usize>,
}

impl<P, R> ComputationError<P, R> {
    pub fn new(cause: impl Into<AnyError>) -> Self {
        Self {
            cause: cause.into(),
            pre_processed: None,
            partial: None,
            configuration: None,
        }
    }

    pub fn with_pre_processed(mut self, pre_processed: P) -> Self {
        self.pre_processed = Some(pre_processed);
        self
    }

    pub fn with_partial(mut self, partial: R) -> Self {
        self.partial = Some(partial);
        self
    }
}

/// Persisting computed results failed. Always escalated to critical.
#[derive(Debug, Error)]
#[error("saving results failed: {cause}")]
pub struct SavingError {
    #[source]
    pub cause: AnyError,
}

impl SavingError {
    pub fn new(cause: impl Into<AnyError>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Any phase-specific failure of one item's pipeline.
#[derive(Debug, Error)]
pub enum StageFailure<P, R> {
    #[error(transparent)]
    PreProcessingConfiguration(#[from] PreProcessingConfigurationError),
    #[error(transparent)]
    PreProcessing(#[from] PreProcessingError<P>),
    #[error(transparent)]
    ComputationConfiguration(#[from] ComputationConfigurationError<P>),
    #[error(transparent)]
    Computation(#[from] ComputationError<P, R>),
    #[error(transparent)]
    Saving(#[from] SavingError),
}

impl<P, R> StageFailure<P, R> {
    pub fn phase(&self) -> Phase {
        match self {
            Self::PreProcessingConfiguration(_) => Phase::PreProcessingCalibration,
            Self::PreProcessing(_) => Phase::PreProcessing,
            Self::ComputationConfiguration(_) => Phase::ComputationCalibration,
            Self::Computation(_) => Phase::Computation,
            Self::Saving(_) => Phase::Saving,
        }
    }

    /// The underlying error the stage reported.
    pub fn cause(&self) -> &AnyError {
        match self {
            Self::PreProcessingConfiguration(e) => &e.cause,
            Self::PreProcessing(e) => &e.cause,
            Self::ComputationConfiguration(e) => &e.cause,
            Self::Computation(e) => &e.cause,
            Self::Saving(e) => &e.cause,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.phase().is_critical()
    }
}
