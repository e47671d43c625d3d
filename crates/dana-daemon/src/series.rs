//! Series analysis — summary statistics of a numeric upload under every
//! active linear calibration.

use std::sync::Arc;

use anyhow::Context;
use dana_core::{Epoch, ItemName, Phase};
use dana_runtime::{
    ComputationConfigurationError, ComputationError, FanOutPipeline, Pipeline, PreProcessingError,
    SavingError, StageFailure,
};
use dana_store::{Calibration, SqliteStore, Upload};
use serde::Serialize;
use tracing::debug;

/// Summary of one series under one calibration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    #[serde(rename = "calibrationId")]
    pub calibration_id: i64,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

pub struct SeriesPipeline {
    store: Arc<SqliteStore>,
}

impl SeriesPipeline {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}

/// Split a payload on whitespace and commas into numbers.
pub fn parse_series(payload: &str) -> Result<Vec<f64>, String> {
    let values = payload
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| format!("non-numeric value '{}'", token))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.is_empty() {
        return Err("empty series".to_string());
    }
    Ok(values)
}

fn summarize(calibration: &Calibration, series: &[f64]) -> Option<SeriesSummary> {
    let calibrated: Vec<f64> = series
        .iter()
        .map(|x| calibration.gain * x + calibration.offset)
        .collect();
    if calibrated.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let min = calibrated.iter().copied().fold(f64::INFINITY, f64::min);
    let max = calibrated.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = calibrated.iter().sum::<f64>() / calibrated.len() as f64;
    if !mean.is_finite() {
        return None;
    }

    Some(SeriesSummary {
        calibration_id: calibration.id,
        count: calibrated.len(),
        min,
        max,
        mean,
    })
}

impl Pipeline for SeriesPipeline {
    type Item = Upload;
    type Items = Vec<Upload>;
    type PreProcessed = Vec<f64>;
    type Output = SeriesSummary;

    fn fetch_items(&self) -> anyhow::Result<Vec<Upload>> {
        let uploads = self.store.list_valid_uploads()?;
        debug!("Fetched {} uploads", uploads.len());
        Ok(uploads)
    }

    fn is_valid(&self, item: &mut Upload) -> anyhow::Result<bool> {
        match parse_series(&item.payload) {
            Ok(_) => Ok(true),
            Err(reason) => {
                self.store
                    .mark_invalid(item.id, &reason)
                    .with_context(|| format!("failed to flag upload {} invalid", item.id))?;
                item.valid = false;
                item.invalid_reason = Some(reason);
                Ok(false)
            }
        }
    }

    fn item_name(&self, item: &Upload) -> ItemName {
        format!("{} (#{})", item.name, item.id)
    }

    fn on_error(
        &self,
        name: &ItemName,
        item: &Upload,
        phase: Phase,
        failure: &StageFailure<Vec<f64>, SeriesSummary>,
    ) -> anyhow::Result<()> {
        if let StageFailure::PreProcessing(e) = failure {
            self.store.mark_invalid(item.id, &e.reason)?;
        }
        self.store
            .record_failure(item.id, item.epoch, phase, &failure.to_string())
            .with_context(|| format!("failed to log failure of {}", name))?;
        Ok(())
    }
}

impl FanOutPipeline for SeriesPipeline {
    type Calibration = Calibration;

    fn is_processed(&self, item: &Upload) -> anyhow::Result<bool> {
        Ok(item.processed)
    }

    fn current_epoch(&self, item: &Upload) -> anyhow::Result<Epoch> {
        Ok(item.epoch)
    }

    fn pre_process(
        &self,
        _name: &ItemName,
        item: &Upload,
        _epoch: Epoch,
    ) -> Result<Vec<f64>, PreProcessingError<Vec<f64>>> {
        let series = parse_series(&item.payload)
            .map_err(|reason| PreProcessingError::new(reason.clone(), anyhow::anyhow!(reason)))?;

        if let Some(position) = series.iter().position(|v| !v.is_finite()) {
            let partial = series[..position].to_vec();
            return Err(PreProcessingError::new(
                "non-finite value",
                anyhow::anyhow!("value {} at position {} is not finite", series[position], position),
            )
            .with_partial(partial));
        }
        Ok(series)
    }

    fn resolve_calibrations(
        &self,
        _name: &ItemName,
        _item: &Upload,
        pre_processed: &Vec<f64>,
    ) -> Result<Vec<Calibration>, ComputationConfigurationError<Vec<f64>>> {
        let calibrations = self.store.list_active_calibrations().map_err(|e| {
            ComputationConfigurationError::new(e).with_pre_processed(pre_processed.clone())
        })?;
        if calibrations.is_empty() {
            return Err(ComputationConfigurationError::new(anyhow::anyhow!(
                "no active calibrations"
            ))
            .with_pre_processed(pre_processed.clone()));
        }
        Ok(calibrations)
    }

    fn compute(
        &self,
        _name: &ItemName,
        _item: &Upload,
        _epoch: Epoch,
        calibration: &Calibration,
        pre_processed: &Vec<f64>,
    ) -> Result<SeriesSummary, ComputationError<Vec<f64>, SeriesSummary>> {
        summarize(calibration, pre_processed).ok_or_else(|| {
            ComputationError::new(anyhow::anyhow!(
                "calibration '{}' overflows the series",
                calibration.name
            ))
        })
    }

    fn save(
        &self,
        name: &ItemName,
        item: &Upload,
        epoch: Epoch,
        _pre_processed: &Vec<f64>,
        results: Vec<SeriesSummary>,
    ) -> Result<(), SavingError> {
        let rows = results
            .iter()
            .map(|summary| serde_json::to_value(summary).map(|json| (summary.calibration_id, json)))
            .collect::<serde_json::Result<Vec<_>>>()
            .map_err(SavingError::new)?;

        self.store
            .record_results(item.id, epoch, &rows)
            .map_err(SavingError::new)?;
        let next = self.store.mark_processed(item.id).map_err(SavingError::new)?;
        debug!("Saved {} results for {}, next epoch {}", rows.len(), name, next);
        Ok(())
    }
}
