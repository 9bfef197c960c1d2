//! Configuration - cache budgets, scan defaults and tokenizer choice
//!
//! Every field has a default, so an empty or missing `contextor.toml` is
//! valid. Command-line flags are applied on top of the loaded file.
//!
//! ```toml
//! [cache]
//! content_budget = 134217728
//! eviction = "least-recently-used"
//!
//! [scan]
//! max_depth = 12
//! extra_ignore = ["fixtures", "*.snap"]
//!
//! [tokenizer]
//! model = "o200k"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{EvictionPolicy, Tier};
use crate::core::file_reader::DEFAULT_MAX_FILE_SIZE;
use crate::core::tokenizer::TokenModel;
use crate::error::{CacheError, ConfigError};

/// Name of the config file looked up in the scan root
pub const CONFIG_FILE_NAME: &str = "contextor.toml";

/// Directory and file names skipped by default
pub const DEFAULT_IGNORE_NAMES: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".next",
    ".cache",
    ".git",
    ".vscode",
    ".vs",
    "dist",
    "build",
    "out",
    ".nuxt",
    ".vitepress",
    ".svelte-kit",
    "target",
    "vendor",
    ".gradle",
    ".idea",
    "bin",
    "obj",
    ".angular",
    ".turbo",
    ".parcel-cache",
    ".tmp",
    "tmp",
    "temp",
    ".temp",
    "coverage",
    ".coverage",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "venv",
    ".venv",
    "env",
    ".env",
    ".virtualenv",
    "virtualenv",
    "Pods",
    "DerivedData",
    ".expo",
    ".meteor",
    ".serverless",
    ".terraform",
    ".vagrant",
    "logs",
    ".logs",
    ".sass-cache",
    ".rpt2_cache",
    ".nyc_output",
    "bower_components",
    "jspm_packages",
    "web_modules",
    ".yarn",
    ".pnp",
    ".pnp.js",
    "lerna-debug.log*",
    "npm-debug.log*",
    "yarn-debug.log*",
    "yarn-error.log*",
    ".DS_Store",
    "Thumbs.db",
    ".cursor",
    "debug",
];

/// File extensions skipped by default
pub const DEFAULT_IGNORE_EXTENSIONS: &[&str] = &[
    ".log", ".tmp", ".temp", ".bak", ".backup", ".swp", ".swo", ".orig", ".rej", ".patch", ".pyc",
    ".pyo", ".pyd", ".so", ".dll", ".dylib", ".exe", ".msi", ".dmg", ".pkg", ".deb", ".rpm",
    ".tar.gz", ".zip", ".rar", ".7z", ".iso", ".img", ".bin", ".dat", ".dump", ".lock",
];

const MIB: u64 = 1024 * 1024;

/// Byte budgets per cache tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub directory_budget: u64,
    pub content_budget: u64,
    pub token_budget: u64,
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory_budget: 16 * MIB,
            content_budget: 64 * MIB,
            token_budget: 4 * MIB,
            eviction: EvictionPolicy::OldestInserted,
        }
    }
}

impl CacheConfig {
    pub fn budget(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Directory => self.directory_budget,
            Tier::Content => self.content_budget,
            Tier::Tokens => self.token_budget,
        }
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        for tier in Tier::ALL {
            if self.budget(tier) == 0 {
                return Err(CacheError::InvalidBudget { tier });
            }
        }
        Ok(())
    }
}

/// Traversal defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Maximum directory depth below the root (unbounded when absent)
    pub max_depth: Option<usize>,
    /// Use the built-in ignore names and extensions
    pub default_ignores: bool,
    /// Additional names or gitignore-style globs
    pub extra_ignore: Vec<String>,
    /// Additional extensions (with or without leading dot)
    pub extra_extensions: Vec<String>,
    /// Descend into symlinked directories
    pub follow_symlinks: bool,
    /// Files larger than this are skipped instead of read
    pub max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            default_ignores: true,
            extra_ignore: Vec::new(),
            extra_extensions: Vec::new(),
            follow_symlinks: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenizerConfig {
    pub model: TokenModel,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub tokenizer: TokenizerConfig,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Load the explicit file if given, else `contextor.toml` in `root` if
    /// present, else defaults
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            tracing::debug!(path = %path.display(), "loading config");
            return Self::from_file(path);
        }

        let discovered: PathBuf = root.join(CONFIG_FILE_NAME);
        if discovered.is_file() {
            tracing::debug!(path = %discovered.display(), "loading discovered config");
            return Self::from_file(&discovered);
        }

        Ok(Self::default())
    }
}
