//! Progress reporting seam between long operations and their caller

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Receives `(processed, estimated_total, current_path)` updates
pub trait ProgressSink: Sync {
    fn report(&self, processed: u64, estimated_total: u64, current: &Path);
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _processed: u64, _estimated_total: u64, _current: &Path) {}
}

/// Last reported progress of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub estimated_total: u64,
    pub current_path: Option<PathBuf>,
}

impl Progress {
    /// Completed fraction in `[0, 1]`, if a total is known
    pub fn fraction(&self) -> Option<f64> {
        if self.estimated_total == 0 {
            return None;
        }
        Some((self.processed as f64 / self.estimated_total as f64).min(1.0))
    }
}
