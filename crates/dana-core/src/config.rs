//! Run parameters for the analysis loop.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Domain tag attached to every diagnostic record.
pub const DEFAULT_TAG: &str = "DANA";

const DEFAULT_LOCK_FILE: &str = "dana.pid";
const DEFAULT_PROGRAM: &str = "dana";
const DEFAULT_INTERVAL_SECS: u64 = 300;
const DEFAULT_DATA_DIR: &str = "data";

/// Parameters of one analysis program: guard identity, cadence and mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Execution guard identifier (PID file path).
    pub lock_file: PathBuf,
    /// Name of the analysis program holding the guard.
    pub program_name: String,
    /// Fixed sleep between two cycles.
    pub interval: Duration,
    /// Reprocess items already marked processed.
    pub force: bool,
    /// Domain tag for diagnostics.
    pub tag: String,
    /// Directory holding the item repository.
    pub data_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            program_name: DEFAULT_PROGRAM.to_string(),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            force: false,
            tag: DEFAULT_TAG.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl RunConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("DANA_LOCK_FILE") {
            config.lock_file = PathBuf::from(path);
        }
        if let Some(name) = lookup("DANA_PROGRAM") {
            config.program_name = name;
        }
        if let Some(secs) = lookup("DANA_INTERVAL_SECS") {
            config.interval = parse_interval(&secs)?;
        }
        if let Some(force) = lookup("DANA_FORCE") {
            config.force = parse_bool(&force)?;
        }
        if let Some(tag) = lookup("DANA_TAG") {
            config.tag = tag;
        }
        if let Some(dir) = lookup("DANA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay command-line flags. Accepts `--flag value` and `--flag=value`.
    /// `--force` alone means true; a following boolean token is its value.
    ///
    /// Returns the positional arguments that were not consumed.
    pub fn apply_args(&mut self, args: &[String]) -> Result<Vec<String>> {
        let mut positional = Vec::new();
        let mut iter = args.iter().peekable();

        while let Some(arg) = iter.next() {
            if !arg.starts_with("--") {
                positional.push(arg.clone());
                continue;
            }

            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg.as_str(), None),
            };

            if flag == "--force" {
                self.force = match inline {
                    Some(v) => parse_bool(&v)?,
                    None => match iter.next_if(|next| is_bool(next)) {
                        Some(v) => parse_bool(v)?,
                        None => true,
                    },
                };
                continue;
            }

            let value = match inline {
                Some(v) => v,
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::Config(format!("{} requires a value", flag)))?,
            };

            match flag {
                "--lock-file" => self.lock_file = PathBuf::from(value),
                "--program" => self.program_name = value,
                "--interval" => self.interval = parse_interval(&value)?,
                "--tag" => self.tag = value,
                "--data-dir" => self.data_dir = PathBuf::from(value),
                other => return Err(Error::Config(format!("unknown flag: {}", other))),
            }
        }

        self.validate()?;
        Ok(positional)
    }

    /// Reject parameters the run loop cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.interval < Duration::from_secs(1) {
            return Err(Error::Config("interval must be at least 1 second".into()));
        }
        if self.program_name.trim().is_empty() {
            return Err(Error::Config("program name must not be empty".into()));
        }
        if self.lock_file.as_os_str().is_empty() {
            return Err(Error::Config("lock file path must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_interval(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid interval '{}'", value)))?;
    if secs < 1 {
        return Err(Error::Config("interval must be at least 1 second".into()));
    }
    Ok(Duration::from_secs(secs))
}

fn is_bool(value: &str) -> bool {
    !value.trim().is_empty() && parse_bool(value).is_ok()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("invalid boolean '{}'", other))),
    }
}
