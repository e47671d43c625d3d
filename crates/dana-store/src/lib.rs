//! DANA Store — SQLite repository of uploads, calibrations and results.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::{content_hash, SqliteStore};
pub use types::*;
