//! Error types for the cache, scan, task and configuration layers

use std::path::PathBuf;
use thiserror::Error;

use crate::cache::Tier;

/// Failures raised while reading a single entry during a scan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("scan root does not exist: {path}")]
    RootNotFound { path: PathBuf },

    #[error("scan root is not a directory: {path}")]
    RootNotDirectory { path: PathBuf },

    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("skipped {path}: {reason}")]
    Skipped { path: PathBuf, reason: String },

    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("cache failure for {path}: {message}")]
    Cache { path: PathBuf, message: String },
}

impl ScanError {
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl CacheError {
    /// Collapse into the scan error that caused it, or wrap a contract
    /// violation as a cache failure for `path`
    pub fn into_scan_error(self, path: &std::path::Path) -> ScanError {
        match self {
            CacheError::Compute(err) => err,
            other => ScanError::Cache {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        }
    }
}

/// Cache contract violations and compute failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("byte budget for the {tier} tier must be greater than zero")]
    InvalidBudget { tier: Tier },

    #[error("key for the {key} tier used with the {cache} tier cache")]
    TierMismatch { key: Tier, cache: Tier },

    #[error("cannot invalidate {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error(transparent)]
    Compute(#[from] ScanError),
}

/// Background task failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task runner is at capacity ({limit} concurrent tasks)")]
    AtCapacity { limit: usize },

    #[error("task panicked: {message}")]
    Panicked { message: String },

    #[error("failed to start worker thread: {message}")]
    Spawn { message: String },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Other(String),
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}
