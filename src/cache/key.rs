//! Cache keys and staleness discriminators
//!
//! Staleness is structural: a key embeds the (modification time, size) stamp
//! of the path it describes, so a changed file simply produces a new key and
//! the old entry is never found again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The three independent cache namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Sorted directory listings
    Directory,
    /// Raw file text
    Content,
    /// Computed token counts
    Tokens,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Directory, Tier::Content, Tier::Tokens];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Directory => "directory",
            Tier::Content => "content",
            Tier::Tokens => "tokens",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modification time and size of a path at the moment it was stat'ed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

/// Stat `path` (following symlinks) and return its staleness discriminator
pub fn discriminator_of(path: &Path) -> std::io::Result<FileStamp> {
    let metadata = fs::metadata(path)?;
    Ok(FileStamp::from_metadata(&metadata))
}

/// Composite key: (tier, absolute path, discriminator)
///
/// Token keys also carry the encoding name so counts produced by different
/// estimators never alias each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tier: Tier,
    path: PathBuf,
    stamp: FileStamp,
    encoding: Option<&'static str>,
}

impl CacheKey {
    /// Key for the listing of directory `path`
    pub fn directory(path: impl Into<PathBuf>, stamp: FileStamp) -> Self {
        Self {
            tier: Tier::Directory,
            path: path.into(),
            stamp,
            encoding: None,
        }
    }

    /// Key for the text of file `path`
    pub fn content(path: impl Into<PathBuf>, stamp: FileStamp) -> Self {
        Self {
            tier: Tier::Content,
            path: path.into(),
            stamp,
            encoding: None,
        }
    }

    /// Key for the token count of file `path` under `encoding`
    pub fn tokens(path: impl Into<PathBuf>, stamp: FileStamp, encoding: &'static str) -> Self {
        Self {
            tier: Tier::Tokens,
            path: path.into(),
            stamp,
            encoding: Some(encoding),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stamp(&self) -> FileStamp {
        self.stamp
    }

    pub fn encoding(&self) -> Option<&'static str> {
        self.encoding
    }

    /// Identity of the value this key describes, ignoring its stamp; two keys
    /// with the same slot supersede each other
    pub(crate) fn slot(&self) -> (PathBuf, Option<&'static str>) {
        (self.path.clone(), self.encoding)
    }
}
