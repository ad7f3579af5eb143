//! Ingestion configuration (TOML).
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! [output]
//! root = "warehouse"
//!
//! [missing_values]
//! sentinels = ["-99.99", "-999"]
//! flag_suspected = true
//!
//! [snapshot]
//! earliest = "2017-01-01"
//!
//! [run]
//! parallel = true
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use panelfold_core::domain::SnapshotDate;
use panelfold_core::transform::MissingValuePolicy;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub output: OutputConfig,
    pub missing_values: MissingValuePolicy,
    pub snapshot: SnapshotConfig,
    pub run: RunSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Artifact store root.
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshots older than this are fatal for their file.
    pub earliest: Option<SnapshotDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    /// Process independent source files on the rayon pool.
    pub parallel: bool,
    pub log_level: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            log_level: "info".into(),
        }
    }
}

impl IngestConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output.root must not be empty".into()));
        }
        if let Some(s) = self
            .missing_values
            .sentinels
            .iter()
            .find(|s| s.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "missing_values.sentinels contains a blank entry: {s:?}"
            )));
        }
        if !LOG_LEVELS.contains(&self.run.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "run.log_level '{}' is not one of {}",
                self.run.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}
