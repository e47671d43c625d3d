//! DANA Core — error type, pipeline phase tags, run configuration.

pub mod config;
pub mod error;
pub mod phase;

pub use config::{RunConfig, DEFAULT_TAG};
pub use error::{Error, Result};
pub use phase::{Epoch, ItemName, Phase};
