//! SQLite-backed item repository for the analysis pipeline.
//!
//! Holds uploads together with their validity flag, processed marker and
//! epoch, the calibration catalogue, computed results and the failure log
//! written by pipeline error handlers.

use std::path::{Path, PathBuf};

use dana_core::{Epoch, Error, Phase, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::schema::SCHEMA_SQL;
use crate::types::*;

const UPLOAD_COLUMNS: &str = "id, name, payload, content_hash, valid, invalid_reason, processed, epoch, created_at, updated_at";
const CALIBRATION_COLUMNS: &str = "id, name, gain, offset_val, active, created_at";

/// SQLite store for uploads and their analysis state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the SQLite store.
    ///
    /// `db_dir` is the data directory. The file will be `db_dir/dana.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("dana.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let stats = store.get_stats()?;
        info!(
            "SqliteStore initialized: {} uploads ({} pending), {} calibrations, path={}",
            stats.total_uploads,
            stats.pending_uploads,
            stats.active_calibrations,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Uploads
    // ---------------------------------------------------------------

    /// Insert an upload. Returns the new upload ID.
    pub fn add_upload(&self, name: &str, payload: &str, opts: AddUploadOptions) -> Result<i64> {
        let now = opts.created_at.unwrap_or_else(now_millis);

        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO uploads (name, payload, content_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .insert(params![name, payload, opts.content_hash, now])
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    Error::DuplicateContent(opts.content_hash.clone().unwrap_or_default())
                } else {
                    Error::Database(e.to_string())
                }
            })?;
        debug!("Added upload {} ({})", id, name);
        Ok(id)
    }

    /// Insert an upload keyed by the SHA-256 of its payload.
    pub fn ingest_upload(&self, name: &str, payload: &str) -> Result<i64> {
        let hash = content_hash(payload);
        if self.find_upload_by_hash(&hash)?.is_some() {
            return Err(Error::DuplicateContent(hash));
        }
        self.add_upload(
            name,
            payload,
            AddUploadOptions {
                content_hash: Some(hash),
                ..Default::default()
            },
        )
    }

    /// Find an upload by content hash.
    pub fn find_upload_by_hash(&self, hash: &str) -> Result<Option<Upload>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM uploads WHERE content_hash = ?1", UPLOAD_COLUMNS);
        let row = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![hash], Self::row_to_upload)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// Get an upload by ID.
    pub fn get_upload(&self, id: i64) -> Result<Option<Upload>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM uploads WHERE id = ?1", UPLOAD_COLUMNS);
        let row = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![id], Self::row_to_upload)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// All uploads that are still flagged valid, oldest first.
    pub fn list_valid_uploads(&self) -> Result<Vec<Upload>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM uploads WHERE valid = 1 ORDER BY id ASC",
            UPLOAD_COLUMNS
        );
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_upload)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    /// Flag an upload invalid and record why.
    pub fn mark_invalid(&self, id: i64, reason: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE uploads SET valid = 0, invalid_reason = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, reason, now_millis()],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Mark an upload processed and advance its epoch. Returns the new epoch.
    pub fn mark_processed(&self, id: i64) -> Result<Epoch> {
        let conn = self.conn.lock();
        let epoch: Option<i64> = conn
            .query_row(
                "UPDATE uploads SET processed = 1, epoch = epoch + 1, updated_at = ?2
                 WHERE id = ?1 RETURNING epoch",
                params![id, now_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        epoch
            .map(|e| e as Epoch)
            .ok_or_else(|| Error::NotFound(format!("upload {}", id)))
    }

    /// Clear the processed marker on one upload, or on all when `id` is `None`.
    pub fn reset_processed(&self, id: Option<i64>) -> Result<usize> {
        let conn = self.conn.lock();
        let count = match id {
            Some(id) => conn.execute(
                "UPDATE uploads SET processed = 0, updated_at = ?2 WHERE id = ?1",
                params![id, now_millis()],
            ),
            None => conn.execute(
                "UPDATE uploads SET processed = 0, updated_at = ?1",
                params![now_millis()],
            ),
        }
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Calibrations
    // ---------------------------------------------------------------

    /// Register a calibration. Returns its ID.
    pub fn add_calibration(&self, name: &str, gain: f64, offset: f64) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO calibrations (name, gain, offset_val, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .insert(params![name, gain, offset, now_millis()])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(id)
    }

    /// Enable or disable a calibration.
    pub fn set_calibration_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE calibrations SET active = ?2 WHERE id = ?1",
                params![id, active],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Active calibrations in registration order.
    pub fn list_active_calibrations(&self) -> Result<Vec<Calibration>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM calibrations WHERE active = 1 ORDER BY id ASC",
            CALIBRATION_COLUMNS
        );
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_calibration)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Results & failures
    // ---------------------------------------------------------------

    /// Store the results of one epoch atomically, replacing any earlier rows
    /// for the same upload and epoch.
    pub fn record_results(
        &self,
        upload_id: i64,
        epoch: Epoch,
        results: &[(i64, serde_json::Value)],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        tx.execute(
            "DELETE FROM results WHERE upload_id = ?1 AND epoch = ?2",
            params![upload_id, epoch as i64],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        let now = now_millis();
        for (calibration_id, summary) in results {
            let json = serde_json::to_string(summary)?;
            tx.execute(
                "INSERT INTO results (upload_id, calibration_id, epoch, summary_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![upload_id, calibration_id, epoch as i64, json, now],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(results.len())
    }

    /// Results for an upload, newest epoch first.
    pub fn get_results(&self, upload_id: i64) -> Result<Vec<ResultRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, upload_id, calibration_id, epoch, summary_json, created_at
                 FROM results WHERE upload_id = ?1 ORDER BY epoch DESC, id ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![upload_id], |row| {
                let json: String = row.get(4)?;
                Ok(ResultRecord {
                    id: row.get(0)?,
                    upload_id: row.get(1)?,
                    calibration_id: row.get(2)?,
                    epoch: row.get::<_, i64>(3)? as Epoch,
                    summary: serde_json::from_str(&json).unwrap_or(serde_json::Value::Null),
                    created_at: row.get(5)?,
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    /// Append to the failure log.
    pub fn record_failure(
        &self,
        upload_id: i64,
        epoch: Epoch,
        phase: Phase,
        message: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO failures (upload_id, epoch, phase, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .insert(params![upload_id, epoch as i64, phase.as_str(), message, now_millis()])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(id)
    }

    /// Most recent failures, newest first.
    pub fn list_failures(&self, limit: usize) -> Result<Vec<FailureRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, upload_id, epoch, phase, message, created_at
                 FROM failures ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_failure)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| Error::Database(e.to_string()))
        };

        let total_uploads = count("SELECT COUNT(*) FROM uploads")?;
        let invalid_uploads = count("SELECT COUNT(*) FROM uploads WHERE valid = 0")?;
        let processed_uploads = count("SELECT COUNT(*) FROM uploads WHERE processed = 1")?;
        let pending_uploads =
            count("SELECT COUNT(*) FROM uploads WHERE valid = 1 AND processed = 0")?;
        let active_calibrations = count("SELECT COUNT(*) FROM calibrations WHERE active = 1")?;
        let results = count("SELECT COUNT(*) FROM results")?;
        let failures = count("SELECT COUNT(*) FROM failures")?;

        let db_size_mb = std::fs::metadata(&self.db_path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        Ok(StoreStats {
            total_uploads,
            invalid_uploads,
            processed_uploads,
            pending_uploads,
            active_calibrations,
            results,
            failures,
            db_path: self.db_path.display().to_string(),
            db_size_mb,
        })
    }

    // ---------------------------------------------------------------
    // Row mapping
    // ---------------------------------------------------------------

    fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<Upload> {
        Ok(Upload {
            id: row.get(0)?,
            name: row.get(1)?,
            payload: row.get(2)?,
            content_hash: row.get(3)?,
            valid: row.get(4)?,
            invalid_reason: row.get(5)?,
            processed: row.get(6)?,
            epoch: row.get::<_, i64>(7)? as Epoch,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn row_to_calibration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Calibration> {
        Ok(Calibration {
            id: row.get(0)?,
            name: row.get(1)?,
            gain: row.get(2)?,
            offset: row.get(3)?,
            active: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn row_to_failure(row: &rusqlite::Row<'_>) -> rusqlite::Result<FailureRecord> {
        let tag: String = row.get(3)?;
        let phase = tag.parse::<Phase>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(FailureRecord {
            id: row.get(0)?,
            upload_id: row.get(1)?,
            epoch: row.get::<_, i64>(2)? as Epoch,
            phase,
            message: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// SHA-256 hex digest used to deduplicate uploads.
pub fn content_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_add_and_get_upload() {
        let (store, _dir) = test_store();

        let id = store.add_upload("sample-1", "1 2 3", Default::default()).unwrap();
        let upload = store.get_upload(id).unwrap().unwrap();
        assert_eq!(upload.name, "sample-1");
        assert_eq!(upload.payload, "1 2 3");
        assert!(upload.valid);
        assert!(!upload.processed);
        assert_eq!(upload.epoch, 1);
    }

    #[test]
    fn test_ingest_deduplicates() {
        let (store, _dir) = test_store();

        store.ingest_upload("a", "4 5 6").unwrap();
        let result = store.ingest_upload("b", "4 5 6");
        assert!(matches!(result, Err(Error::DuplicateContent(_))));
        assert_eq!(store.get_stats().unwrap().total_uploads, 1);
    }

    #[test]
    fn test_mark_invalid_hides_upload() {
        let (store, _dir) = test_store();

        let keep = store.add_upload("keep", "1", Default::default()).unwrap();
        let rejected = store.add_upload("rejected", "", Default::default()).unwrap();
        assert!(store.mark_invalid(rejected, "empty payload").unwrap());

        let valid: Vec<i64> = store.list_valid_uploads().unwrap().iter().map(|u| u.id).collect();
        assert_eq!(valid, vec![keep]);

        let rejected = store.get_upload(rejected).unwrap().unwrap();
        assert_eq!(rejected.invalid_reason.as_deref(), Some("empty payload"));
    }

    #[test]
    fn test_mark_processed_bumps_epoch() {
        let (store, _dir) = test_store();

        let id = store.add_upload("x", "1", Default::default()).unwrap();
        assert_eq!(store.mark_processed(id).unwrap(), 2);
        assert_eq!(store.mark_processed(id).unwrap(), 3);
        assert!(store.get_upload(id).unwrap().unwrap().processed);

        assert_eq!(store.reset_processed(None).unwrap(), 1);
        assert!(!store.get_upload(id).unwrap().unwrap().processed);

        assert!(matches!(store.mark_processed(999), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_calibrations() {
        let (store, _dir) = test_store();

        let raw = store.add_calibration("raw", 1.0, 0.0).unwrap();
        let kelvin = store.add_calibration("kelvin", 1.0, 273.15).unwrap();
        store.set_calibration_active(raw, false).unwrap();

        let active = store.list_active_calibrations().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kelvin);
        assert_eq!(active[0].offset, 273.15);
    }

    #[test]
    fn test_record_results_replaces_epoch() {
        let (store, _dir) = test_store();

        let upload = store.add_upload("x", "1 2", Default::default()).unwrap();
        let cal = store.add_calibration("raw", 1.0, 0.0).unwrap();

        store
            .record_results(upload, 1, &[(cal, serde_json::json!({"mean": 1.5}))])
            .unwrap();
        store
            .record_results(upload, 1, &[(cal, serde_json::json!({"mean": 2.5}))])
            .unwrap();

        let results = store.get_results(upload).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].summary["mean"], 2.5);
    }

    #[test]
    fn test_failure_log() {
        let (store, _dir) = test_store();

        let upload = store.add_upload("x", "1", Default::default()).unwrap();
        store
            .record_failure(upload, 1, Phase::PreProcessing, "bad header")
            .unwrap();
        store
            .record_failure(upload, 1, Phase::Saving, "disk full")
            .unwrap();

        let failures = store.list_failures(10).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].phase, Phase::Saving);
        assert_eq!(failures[1].message, "bad header");
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();

        let a = store.add_upload("a", "1", Default::default()).unwrap();
        let b = store.add_upload("b", "2", Default::default()).unwrap();
        store.add_upload("c", "3", Default::default()).unwrap();
        store.mark_invalid(a, "bad").unwrap();
        store.mark_processed(b).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_uploads, 3);
        assert_eq!(stats.invalid_uploads, 1);
        assert_eq!(stats.processed_uploads, 1);
        assert_eq!(stats.pending_uploads, 1);
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
