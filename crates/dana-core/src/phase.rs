//! Pipeline phase tags attached to every per-item failure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Display identifier of an item, derived once per item per cycle.
pub type ItemName = String;

/// Processing generation of an item. `epoch - 1` is the number of times the
/// item was processed already.
pub type Epoch = u64;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Resolving the configuration that pre-processing depends on.
    #[serde(rename = "PPROC_CALIB")]
    PreProcessingCalibration,
    /// Pre-processing the uploaded data.
    #[serde(rename = "PPROC")]
    PreProcessing,
    /// Resolving the calibration(s) computation runs under.
    #[serde(rename = "COMPU_CALIB")]
    ComputationCalibration,
    /// Computing a result under one calibration.
    #[serde(rename = "COMPU")]
    Computation,
    /// Persisting computed results.
    #[serde(rename = "SAVE")]
    Saving,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Self::PreProcessingCalibration,
            Self::PreProcessing,
            Self::ComputationCalibration,
            Self::Computation,
            Self::Saving,
        ]
    }

    /// Canonical tag, as written to logs and failure records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreProcessingCalibration => "PPROC_CALIB",
            Self::PreProcessing => "PPROC",
            Self::ComputationCalibration => "COMPU_CALIB",
            Self::Computation => "COMPU",
            Self::Saving => "SAVE",
        }
    }

    /// Whether a failure in this phase must be raised at critical severity.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Saving)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    /// Accepts the canonical tags plus the older spellings still found in
    /// failure logs (`CALIB`, `COMPUCALIB`, `PPROCCALIB`, `SAVIN`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PPROC_CALIB" | "PPROCCALIB" => Ok(Self::PreProcessingCalibration),
            "PPROC" => Ok(Self::PreProcessing),
            "COMPU_CALIB" | "COMPUCALIB" | "CALIB" => Ok(Self::ComputationCalibration),
            "COMPU" => Ok(Self::Computation),
            "SAVE" | "SAVIN" => Ok(Self::Saving),
            other => Err(Error::NotFound(format!("phase tag '{}'", other))),
        }
    }
}
