//! Error types for snmpwatch.
//!
//! Probe failures never leave the sampler; they are replaced by a fallback
//! sample. Storage errors reach query callers. Config and contract errors are
//! programming mistakes caught at construction time.

use std::path::PathBuf;

use thiserror::Error;

/// Why a single probe produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not parse probe output: {0}")]
    Parse(String),
}

impl ProbeFailure {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
        }
    }
}

/// Failure reading from or writing to durable storage.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode stored means: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored row is invalid: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Invalid configuration or registry contents.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("duplicate metric name: {name}")]
    DuplicateMetric { name: String },

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// A caller referenced something the engine was never told about.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("metric not registered: {name}")]
    UnknownMetric { name: String },

    #[error("poll cycle is missing a sample for metric {name}")]
    MissingSample { name: String },

    #[error("poll cycle carries more than one sample for metric {name}")]
    DuplicateSample { name: String },
}
