//! Row types for uploads, calibrations, results and failures.

use dana_core::{Epoch, Phase};
use serde::{Deserialize, Serialize};

/// One uploaded data set awaiting (or done with) analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub name: String,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    pub processed: bool,
    pub epoch: Epoch,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// A linear calibration: `gain * x + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub id: i64,
    pub name: String,
    pub gain: f64,
    pub offset: f64,
    pub active: bool,
    pub created_at: i64,
}

/// A computed result for one upload under one calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: i64,
    pub upload_id: i64,
    pub calibration_id: i64,
    pub epoch: Epoch,
    pub summary: serde_json::Value,
    pub created_at: i64,
}

/// A per-item pipeline failure, as reported to the error handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: i64,
    pub upload_id: i64,
    pub epoch: Epoch,
    pub phase: Phase,
    pub message: String,
    pub created_at: i64,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_uploads: i64,
    pub invalid_uploads: i64,
    pub processed_uploads: i64,
    pub pending_uploads: i64,
    pub active_calibrations: i64,
    pub results: i64,
    pub failures: i64,
    pub db_path: String,
    pub db_size_mb: f64,
}

/// Options for adding an upload.
#[derive(Debug, Clone, Default)]
pub struct AddUploadOptions {
    pub content_hash: Option<String>,
    pub created_at: Option<i64>,
}
