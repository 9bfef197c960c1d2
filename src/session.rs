//! Session - the cache, estimator and task runner wired together
//!
//! A session is what a front end holds for its lifetime. Scans submitted
//! through it share one cache, so re-scanning an unchanged tree is served
//! from memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backends::scan::{ScanEngine, ScanOptions};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::core::model::ScanReport;
use crate::core::tokenizer::TokenEstimator;
use crate::error::{CacheError, ScanError, TaskError};
use crate::tasks::{CancelToken, ProgressSink, TaskHandle, TaskRunner};

pub struct Session {
    cache: Arc<CacheStore>,
    estimator: Arc<TokenEstimator>,
    runner: TaskRunner,
}

impl Session {
    pub fn new(cache: Arc<CacheStore>, estimator: Arc<TokenEstimator>, runner: TaskRunner) -> Self {
        Self {
            cache,
            estimator,
            runner,
        }
    }

    /// Build a session from loaded configuration
    pub fn from_config(config: &Config) -> Result<Self, CacheError> {
        Ok(Self::new(
            Arc::new(CacheStore::new(&config.cache)?),
            Arc::new(TokenEstimator::new(config.tokenizer.model)),
            TaskRunner::default(),
        ))
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn estimator(&self) -> &Arc<TokenEstimator> {
        &self.estimator
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// A scan engine bound to this session's cache and estimator
    pub fn engine(&self) -> ScanEngine {
        ScanEngine::new(Arc::clone(&self.cache), Arc::clone(&self.estimator))
    }

    /// Run a scan on a background worker
    pub fn submit_scan(
        &self,
        root: impl Into<PathBuf>,
        options: ScanOptions,
    ) -> Result<TaskHandle<ScanReport>, TaskError> {
        let root = root.into();
        let engine = self.engine();
        let label = format!("scan {}", root.display());
        self.runner.submit(label, move |ctx| {
            let report = engine.scan(&root, &options, ctx.cancel_token(), ctx)?;
            Ok(report)
        })
    }

    /// Run a scan on the calling thread
    pub fn scan_blocking(
        &self,
        root: &Path,
        options: &ScanOptions,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScanReport, ScanError> {
        self.engine().scan(root, options, cancel, progress)
    }

    /// Forget cached data for `path` and everything below it
    ///
    /// `path` must be absolute. It is canonicalised to match the keys the
    /// scan stored; a path that no longer exists is resolved through its
    /// parent.
    pub fn invalidate(&self, path: &Path) -> Result<usize, CacheError> {
        let resolved = resolve_cached_path(path)?;
        Ok(self.cache.invalidate_path(&resolved))
    }
}

fn resolve_cached_path(path: &Path) -> Result<PathBuf, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if !path.is_absolute() {
        return Err(invalid("path must be absolute"));
    }
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(invalid("path cannot be resolved"));
    };
    parent
        .canonicalize()
        .map(|parent| parent.join(name))
        .map_err(|err| invalid(&err.to_string()))
}
