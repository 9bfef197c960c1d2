//! Ignore rules applied during a scan
//!
//! Names and globs are compiled into a gitignore matcher rooted at the scan
//! root, so `node_modules` matches at any depth and `/build` only at the top.
//! Extension rules are plain case-insensitive suffixes (`.tar.gz` works) and
//! only apply to files.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

use crate::config::{DEFAULT_IGNORE_EXTENSIONS, DEFAULT_IGNORE_NAMES};
use crate::error::ScanError;

/// Compiled ignore rules for one scan root
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    matcher: Gitignore,
    extensions: Vec<String>,
}

impl IgnoreRules {
    /// Compile `patterns` and `extensions`, plus the built-in defaults when
    /// `defaults` is set
    pub fn build(
        root: &Path,
        defaults: bool,
        patterns: &[String],
        extensions: &[String],
    ) -> Result<Self, ScanError> {
        let mut builder = GitignoreBuilder::new(root);

        let builtin = if defaults { DEFAULT_IGNORE_NAMES } else { &[] };
        let all_patterns = builtin
            .iter()
            .copied()
            .chain(patterns.iter().map(String::as_str));
        for pattern in all_patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| ScanError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
        }
        let matcher = builder.build().map_err(|e| ScanError::InvalidPattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;

        let builtin_ext = if defaults { DEFAULT_IGNORE_EXTENSIONS } else { &[] };
        let extensions = builtin_ext
            .iter()
            .copied()
            .chain(extensions.iter().map(String::as_str))
            .filter(|ext| !ext.trim().is_empty())
            .map(normalize_extension)
            .collect();

        Ok(Self {
            matcher,
            extensions,
        })
    }

    /// Whether the entry at `path` should be skipped
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if self.matcher.matched(path, is_dir).is_ignore() {
            return true;
        }
        if is_dir {
            return false;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(root: &Path) -> IgnoreRules {
        IgnoreRules::build(root, true, &[], &[]).unwrap()
    }

    #[test]
    fn test_default_names_match_at_any_depth() {
        let root = Path::new("/project");
        let rules = defaults(root);
        assert!(rules.is_ignored(&root.join("node_modules"), true));
        assert!(rules.is_ignored(&root.join("web/node_modules"), true));
        assert!(rules.is_ignored(&root.join("pkg/__pycache__"), true));
        assert!(rules.is_ignored(&root.join(".git"), true));
        assert!(!rules.is_ignored(&root.join("src"), true));
    }

    #[test]
    fn test_default_globs() {
        let root = Path::new("/project");
        let rules = defaults(root);
        assert!(rules.is_ignored(&root.join("npm-debug.log.1"), false));
        assert!(rules.is_ignored(&root.join(".DS_Store"), false));
    }

    #[test]
    fn test_extensions_are_case_insensitive_suffixes() {
        let root = Path::new("/project");
        let rules = defaults(root);
        assert!(rules.is_ignored(&root.join("app.LOG"), false));
        assert!(rules.is_ignored(&root.join("dist.tar.gz"), false));
        assert!(rules.is_ignored(&root.join("lib/native.so"), false));
        assert!(!rules.is_ignored(&root.join("src/main.rs"), false));
        // Extension rules never hide directories
        assert!(!rules.is_ignored(&root.join("archive.zip"), true));
    }

    #[test]
    fn test_extra_patterns_and_extensions() {
        let root = Path::new("/project");
        let rules = IgnoreRules::build(
            root,
            false,
            &["fixtures".to_string(), "*.snap".to_string(), "/docs".to_string()],
            &["md".to_string()],
        )
        .unwrap();
        assert!(rules.is_ignored(&root.join("tests/fixtures"), true));
        assert!(rules.is_ignored(&root.join("tests/a.snap"), false));
        assert!(rules.is_ignored(&root.join("docs"), true));
        assert!(!rules.is_ignored(&root.join("src/docs"), true));
        assert!(rules.is_ignored(&root.join("README.md"), false));
        // Defaults disabled
        assert!(!rules.is_ignored(&root.join("node_modules"), true));
    }

    #[test]
    fn test_negated_pattern_whitelists() {
        let root = Path::new("/project");
        let rules = IgnoreRules::build(
            root,
            false,
            &["*.json".to_string(), "!package.json".to_string()],
            &[],
        )
        .unwrap();
        assert!(rules.is_ignored(&root.join("data.json"), false));
        assert!(!rules.is_ignored(&root.join("package.json"), false));
    }

    #[test]
    fn test_invalid_glob_fails_fast() {
        let root = Path::new("/project");
        let err = IgnoreRules::build(root, false, &["src/[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern { .. }));
    }
}
