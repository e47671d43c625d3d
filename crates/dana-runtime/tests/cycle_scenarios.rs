//! End-to-end cycle scenarios over a recording fan-out pipeline.

use dana_core::{Epoch, ItemName, Phase};
use dana_runtime::*;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Upload {
    name: String,
    values: Vec<f64>,
}

fn upload(name: &str, values: &[f64]) -> Upload {
    Upload {
        name: name.to_string(),
        values: values.to_vec(),
    }
}

/// Records handler calls; behaviors are toggled per test.
#[derive(Default)]
struct Recorder {
    uploads: Vec<Upload>,
    gains: Vec<f64>,
    handler_fails: bool,
    panic_on: Option<&'static str>,
    handled: Mutex<Vec<(ItemName, Phase, Option<usize>)>>,
    saved: Mutex<Vec<(ItemName, Vec<f64>)>>,
}

impl Pipeline for Recorder {
    type Item = Upload;
    type Items = Vec<Upload>;
    type PreProcessed = Vec<f64>;
    type Output = f64;

    fn fetch_items(&self) -> anyhow::Result<Vec<Upload>> {
        Ok(self.uploads.clone())
    }

    fn is_valid(&self, item: &mut Upload) -> anyhow::Result<bool> {
        Ok(!item.values.is_empty())
    }

    fn item_name(&self, item: &Upload) -> ItemName {
        item.name.clone()
    }

    fn on_error(
        &self,
        name: &ItemName,
        _item: &Upload,
        phase: Phase,
        failure: &StageFailure<Vec<f64>, f64>,
    ) -> anyhow::Result<()> {
        if self.handler_fails {
            anyhow::bail!("failure log is read-only");
        }
        let index = match failure {
            StageFailure::Computation(e) => e.configuration,
            _ => None,
        };
        self.handled.lock().push((name.clone(), phase, index));
        Ok(())
    }
}

impl FanOutPipeline for Recorder {
    type Calibration = f64;

    fn is_processed(&self, _item: &Upload) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn current_epoch(&self, _item: &Upload) -> anyhow::Result<Epoch> {
        Ok(1)
    }

    fn pre_process(
        &self,
        name: &ItemName,
        item: &Upload,
        _epoch: Epoch,
    ) -> Result<Vec<f64>, PreProcessingError<Vec<f64>>> {
        if self.panic_on == Some(name.as_str()) {
            panic!("corrupt upload {}", name);
        }
        if item.values.iter().any(|v| v.is_nan()) {
            return Err(PreProcessingError::new("NaN in series", anyhow::anyhow!("value is NaN")));
        }
        Ok(item.values.clone())
    }

    fn resolve_calibrations(
        &self,
        _name: &ItemName,
        _item: &Upload,
        _pre: &Vec<f64>,
    ) -> Result<Vec<f64>, ComputationConfigurationError<Vec<f64>>> {
        Ok(self.gains.clone())
    }

    fn compute(
        &self,
        _name: &ItemName,
        _item: &Upload,
        _epoch: Epoch,
        gain: &f64,
        pre: &Vec<f64>,
    ) -> Result<f64, ComputationError<Vec<f64>, f64>> {
        if *gain == 0.0 {
            return Err(ComputationError::new(anyhow::anyhow!("zero gain")));
        }
        Ok(pre.iter().sum::<f64>() * gain)
    }

    fn save(
        &self,
        name: &ItemName,
        _item: &Upload,
        _epoch: Epoch,
        _pre: &Vec<f64>,
        results: Vec<f64>,
    ) -> Result<(), SavingError> {
        self.saved.lock().push((name.clone(), results));
        Ok(())
    }
}

fn orchestrator(recorder: Recorder) -> Orchestrator<FanOut<Recorder>> {
    Orchestrator::new(FanOut(recorder), Diagnostics::new("TEST"))
}

#[test]
fn test_results_saved_in_calibration_order() {
    let orch = orchestrator(Recorder {
        uploads: vec![upload("a", &[1.0, 2.0])],
        gains: vec![1.0, 2.0, 3.0],
        ..Default::default()
    });

    let outcome = orch.run_cycle(false);

    assert!(outcome.is_success());
    assert_eq!(
        *orch.pipeline().saved.lock(),
        vec![("a".to_string(), vec![3.0, 6.0, 9.0])]
    );
}

#[test]
fn test_failing_calibration_index_is_reported() {
    let orch = orchestrator(Recorder {
        uploads: vec![upload("a", &[1.0]), upload("b", &[2.0])],
        gains: vec![1.0, 0.0, 3.0],
        ..Default::default()
    });

    let outcome = orch.run_cycle(false);

    assert!(outcome.is_success());
    assert_eq!(
        *orch.pipeline().handled.lock(),
        vec![
            ("a".to_string(), Phase::Computation, Some(1)),
            ("b".to_string(), Phase::Computation, Some(1)),
        ]
    );
    // The remaining calibrations and the save are skipped.
    assert!(orch.pipeline().saved.lock().is_empty());
    assert_eq!(outcome.report.computations, 2);
}

#[test]
fn test_invalid_and_failing_items_do_not_block_others() {
    let orch = orchestrator(Recorder {
        uploads: vec![
            upload("empty", &[]),
            upload("nan", &[1.0, f64::NAN]),
            upload("ok", &[4.0]),
        ],
        gains: vec![0.5],
        ..Default::default()
    });

    let outcome = orch.run_cycle(false);

    assert!(outcome.is_success());
    assert_eq!(outcome.report.items_fetched, 3);
    assert_eq!(outcome.report.invalid, 1);
    assert_eq!(outcome.report.failures_in(Phase::PreProcessing), 1);
    assert_eq!(outcome.report.completed, 1);
    assert_eq!(
        *orch.pipeline().saved.lock(),
        vec![("ok".to_string(), vec![2.0])]
    );
    assert_eq!(orch.diagnostics().warn_count(), 1);
}

#[test]
fn test_failing_error_handler_fails_cycle() {
    let orch = orchestrator(Recorder {
        uploads: vec![upload("a", &[1.0]), upload("b", &[2.0])],
        gains: vec![0.0],
        handler_fails: true,
        ..Default::default()
    });

    let outcome = orch.run_cycle(false);

    assert!(!outcome.is_success());
    assert!(outcome.message.contains("error handler failed for a"));
    assert!(outcome.message.contains("failure log is read-only"));
    // The cycle stops at the first escaped failure.
    assert_eq!(outcome.report.failures_in(Phase::Computation), 1);
}

#[test]
fn test_panic_is_contained_to_the_cycle() {
    let orch = orchestrator(Recorder {
        uploads: vec![upload("a", &[1.0]), upload("boom", &[2.0])],
        gains: vec![1.0],
        panic_on: Some("boom"),
        ..Default::default()
    });

    let outcome = orch.run_cycle(false);

    assert!(!outcome.is_success());
    assert!(outcome.message.contains("corrupt upload boom"));
    assert_eq!(outcome.report.completed, 1);

    // The orchestrator stays usable for the next cycle.
    let outcome = orch.run_cycle(false);
    assert_eq!(outcome.report.completed, 1);
}
