//! File reading for token counting
//!
//! Text is read whole. Files over the size limit, files that look binary and
//! (depending on the strategy) files that are not valid UTF-8 are refused
//! with a [`SkipReason`] rather than an I/O error, so the scan can tell a
//! deliberate skip from a failure.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::ScanError;

/// Default maximum file size in bytes (16 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Bytes inspected for NUL when sniffing binary content
const BINARY_SNIFF_LEN: usize = 8192;

/// What to do with content that is not valid UTF-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingStrategy {
    /// Refuse it
    Skip,
    /// Replace invalid sequences, even in files containing NUL bytes
    Lossy,
    /// Refuse files with NUL bytes near the start, replace invalid sequences
    /// in the rest
    #[default]
    Binary,
}

/// Reading policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReadConfig {
    pub max_file_size: u64,
    pub encoding: EncodingStrategy,
}

impl Default for FileReadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            encoding: EncodingStrategy::default(),
        }
    }
}

impl FileReadConfig {
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            ..Default::default()
        }
    }
}

/// Why a readable file was not turned into text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge { size: u64, limit: u64 },
    Binary,
    InvalidUtf8,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooLarge { size, limit } => {
                write!(f, "file size {} exceeds limit {}", size, limit)
            }
            SkipReason::Binary => f.write_str("binary file"),
            SkipReason::InvalidUtf8 => f.write_str("invalid UTF-8"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `lossy` is set when invalid UTF-8 was replaced
    Text { content: String, lossy: bool },
    Skipped(SkipReason),
}

/// Read `path` under `config`
///
/// Only I/O failures are errors; policy refusals come back as
/// [`ReadOutcome::Skipped`].
pub fn read_file(path: &Path, config: &FileReadConfig) -> std::io::Result<ReadOutcome> {
    let mut file = fs::File::open(path)?;
    let size = file.metadata()?.len();
    if size > config.max_file_size {
        return Ok(ReadOutcome::Skipped(SkipReason::TooLarge {
            size,
            limit: config.max_file_size,
        }));
    }

    let mut bytes = Vec::with_capacity(size as usize);
    file.read_to_end(&mut bytes)?;

    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if head.contains(&0) && config.encoding != EncodingStrategy::Lossy {
        return Ok(ReadOutcome::Skipped(SkipReason::Binary));
    }

    Ok(match String::from_utf8(bytes) {
        Ok(content) => ReadOutcome::Text {
            content,
            lossy: false,
        },
        Err(_) if config.encoding == EncodingStrategy::Skip => {
            ReadOutcome::Skipped(SkipReason::InvalidUtf8)
        }
        Err(err) => ReadOutcome::Text {
            content: String::from_utf8_lossy(err.as_bytes()).into_owned(),
            lossy: true,
        },
    })
}

/// Read a file as text, mapping skips and I/O failures to [`ScanError`]
pub fn read_text(path: &Path, config: &FileReadConfig) -> Result<String, ScanError> {
    match read_file(path, config).map_err(|e| ScanError::io(path, &e))? {
        ReadOutcome::Text { content, .. } => Ok(content),
        ReadOutcome::Skipped(reason) => Err(ScanError::Skipped {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }),
    }
}
