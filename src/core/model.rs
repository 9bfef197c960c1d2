//! Scan result model
//!
//! A scan produces a tree of [`ScanEntry`] nodes. The tree is built fresh for
//! every scan and handed to renderers and exporters as-is.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScanError;

/// The kind of a scanned entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Why a directory was emitted without its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncation {
    /// Deeper than the configured maximum depth
    Depth,
    /// Already visited through another path (symlink cycle)
    Cycle,
}

/// Category of a per-entry failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryErrorKind {
    /// I/O failure (permission denied, vanished, ...)
    Io,
    /// Deliberately not read (binary, oversized)
    Skipped,
}

/// Error recorded on the entry it affected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub kind: EntryErrorKind,
    pub message: String,
}

impl EntryError {
    pub fn new(kind: EntryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ScanError> for EntryError {
    fn from(err: &ScanError) -> Self {
        let kind = match err {
            ScanError::Skipped { .. } => EntryErrorKind::Skipped,
            _ => EntryErrorKind::Io,
        };
        EntryError::new(kind, err.to_string())
    }
}

/// A node in the scanned tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Absolute path
    pub path: PathBuf,

    /// Path relative to the scan root, '/'-separated ("" for the root)
    pub relative: String,

    pub kind: EntryKind,

    pub size: u64,

    /// Present only for files whose tokens were computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ScanEntry>,

    #[serde(default)]
    pub ignored: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<Truncation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,

    /// Depth below the root (root is 0)
    pub depth: usize,
}

impl ScanEntry {
    pub fn new(
        path: impl Into<PathBuf>,
        relative: impl Into<String>,
        kind: EntryKind,
        depth: usize,
    ) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
            kind,
            size: 0,
            tokens: None,
            children: Vec::new(),
            ignored: false,
            truncated: None,
            error: None,
            depth,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// File or directory name ("" for a root without one)
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Depth-first pre-order traversal, this entry first
    pub fn iter(&self) -> EntryIter<'_> {
        EntryIter { stack: vec![self] }
    }

    /// Sum of token counts in this subtree
    pub fn total_tokens(&self) -> usize {
        self.iter().filter_map(|e| e.tokens).sum()
    }

    /// Number of entries in this subtree, including itself
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Find an entry by its relative path
    pub fn find(&self, relative: &str) -> Option<&ScanEntry> {
        self.iter().find(|e| e.relative == relative)
    }
}

/// Pre-order iterator over a [`ScanEntry`] tree
pub struct EntryIter<'a> {
    stack: Vec<&'a ScanEntry>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = &'a ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.stack.pop()?;
        self.stack.extend(entry.children.iter().rev());
        Some(entry)
    }
}

/// Terminal state of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub root: ScanEntry,
    pub status: ScanStatus,
    pub total_tokens: usize,
    pub files_processed: u64,
    pub files_failed: u64,
    /// Whether token counts came from an exact encoding
    pub exact_tokens: bool,
    pub encoding: String,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool {
        self.status == ScanStatus::Completed
    }

    /// The entry sequence in emission order
    pub fn entries(&self) -> impl Iterator<Item = &ScanEntry> {
        self.root.iter()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
