//! File scanning backend
//!
//! Walks a directory tree depth-first, applying ignore rules and the depth
//! limit, and counts tokens for every file through the cache tiers:
//! token tier, then content tier, then the file itself.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::backends::ignore_rules::IgnoreRules;
use crate::cache::{discriminator_of, CacheKey, CacheStore, DirChild, FileStamp, Listing};
use crate::config::ScanConfig;
use crate::core::file_reader::{read_text, FileReadConfig, DEFAULT_MAX_FILE_SIZE};
use crate::core::model::{EntryError, EntryKind, ScanEntry, ScanReport, ScanStatus, Truncation};
use crate::core::paths::join_relative;
use crate::core::tokenizer::TokenEstimator;
use crate::error::ScanError;
use crate::tasks::{CancelToken, ProgressSink};

/// Per-scan options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Directories deeper than this are emitted without children
    pub max_depth: Option<usize>,
    pub default_ignores: bool,
    /// Extra names or gitignore-style globs
    pub ignore: Vec<String>,
    /// Extra extension suffixes
    pub ignore_extensions: Vec<String>,
    pub follow_symlinks: bool,
    pub max_file_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            default_ignores: true,
            ignore: Vec::new(),
            ignore_extensions: Vec::new(),
            follow_symlinks: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            default_ignores: config.default_ignores,
            ignore: config.extra_ignore.clone(),
            ignore_extensions: config.extra_extensions.clone(),
            follow_symlinks: config.follow_symlinks,
            max_file_size: config.max_file_size,
        }
    }
}

/// Scans directory trees against a shared cache
#[derive(Clone)]
pub struct ScanEngine {
    cache: Arc<CacheStore>,
    estimator: Arc<TokenEstimator>,
}

impl ScanEngine {
    pub fn new(cache: Arc<CacheStore>, estimator: Arc<TokenEstimator>) -> Self {
        Self { cache, estimator }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn estimator(&self) -> &Arc<TokenEstimator> {
        &self.estimator
    }

    /// Scan `root`, returning the entry tree and totals
    ///
    /// Fails only if `root` is unusable or an ignore pattern does not
    /// compile. Per-entry failures are recorded on the entry. If `cancel`
    /// fires, the tree built so far comes back with [`ScanStatus::Cancelled`].
    pub fn scan(
        &self,
        root: &Path,
        options: &ScanOptions,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let root = resolve_root(root)?;
        let rules = IgnoreRules::build(
            &root,
            options.default_ignores,
            &options.ignore,
            &options.ignore_extensions,
        )?;

        tracing::debug!(root = %root.display(), max_depth = ?options.max_depth, "starting scan");

        let mut walk = Walk {
            engine: self,
            options,
            rules,
            read_config: FileReadConfig::with_max_file_size(options.max_file_size),
            cancel,
            progress,
            visited: HashSet::new(),
            cancelled: false,
            discovered: 0,
            processed: 0,
            failed: 0,
        };

        let mut tree = ScanEntry::new(&root, "", EntryKind::Directory, 0);
        walk.visit_dir(&mut tree);

        let status = if walk.cancelled {
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };
        let report = ScanReport {
            total_tokens: tree.total_tokens(),
            root: tree,
            status,
            files_processed: walk.processed,
            files_failed: walk.failed,
            exact_tokens: self.estimator.is_exact(),
            encoding: self.estimator.encoding_name().to_string(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            root = %root.display(),
            status = ?report.status,
            files = report.files_processed,
            failed = report.files_failed,
            tokens = report.total_tokens,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scan finished"
        );
        Ok(report)
    }

    /// Token count for one file, going through the token and content tiers
    pub fn count_file(
        &self,
        path: &Path,
        read_config: &FileReadConfig,
    ) -> Result<(FileStamp, usize), ScanError> {
        let stamp = discriminator_of(path).map_err(|e| ScanError::io(path, &e))?;
        let tokens = self.tokens_for(path, stamp, read_config)?;
        Ok((stamp, tokens))
    }

    /// File text through the content tier
    pub fn content_of(
        &self,
        path: &Path,
        read_config: &FileReadConfig,
    ) -> Result<Arc<str>, ScanError> {
        let stamp = discriminator_of(path).map_err(|e| ScanError::io(path, &e))?;
        self.content_for(path, stamp, read_config)
    }

    fn tokens_for(
        &self,
        path: &Path,
        stamp: FileStamp,
        read_config: &FileReadConfig,
    ) -> Result<usize, ScanError> {
        let key = CacheKey::tokens(path, stamp, self.estimator.encoding_name());
        self.cache
            .tokens()
            .get_or_compute(&key, || {
                let text = self.content_for(path, stamp, read_config)?;
                Ok(self.estimator.estimate(&text))
            })
            .map_err(|e| e.into_scan_error(path))
    }

    fn content_for(
        &self,
        path: &Path,
        stamp: FileStamp,
        read_config: &FileReadConfig,
    ) -> Result<Arc<str>, ScanError> {
        let key = CacheKey::content(path, stamp);
        self.cache
            .contents()
            .get_or_compute(&key, || read_text(path, read_config).map(Arc::from))
            .map_err(|e| e.into_scan_error(path))
    }

    fn listing_for(&self, dir: &Path) -> Result<Listing, ScanError> {
        let stamp = discriminator_of(dir).map_err(|e| ScanError::io(dir, &e))?;
        let key = CacheKey::directory(dir, stamp);
        self.cache
            .directories()
            .get_or_compute(&key, || read_listing(dir))
            .map_err(|e| e.into_scan_error(dir))
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf, ScanError> {
    let resolved = root.canonicalize().map_err(|_| ScanError::RootNotFound {
        path: root.to_path_buf(),
    })?;
    if !resolved.is_dir() {
        return Err(ScanError::RootNotDirectory {
            path: root.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Children of `dir`, sorted by path; symlinks are resolved to their target kind
fn read_listing(dir: &Path) -> Result<Listing, ScanError> {
    let mut children = Vec::new();
    for item in fs::read_dir(dir).map_err(|e| ScanError::io(dir, &e))? {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = item.path();
        let is_symlink = item.file_type().map(|t| t.is_symlink()).unwrap_or(false);
        // A dangling link is listed as a file; reading it reports the error.
        let is_dir = if is_symlink {
            fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            item.file_type().map(|t| t.is_dir()).unwrap_or(false)
        };
        children.push(DirChild {
            name: item.file_name().to_string_lossy().into_owned(),
            path,
            kind: if is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            is_symlink,
        });
    }
    children.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Arc::from(children))
}

/// Mutable state of one scan
struct Walk<'a> {
    engine: &'a ScanEngine,
    options: &'a ScanOptions,
    rules: IgnoreRules,
    read_config: FileReadConfig,
    cancel: &'a CancelToken,
    progress: &'a dyn ProgressSink,
    /// Canonical paths of directories already expanded
    visited: HashSet<PathBuf>,
    cancelled: bool,
    discovered: u64,
    processed: u64,
    failed: u64,
}

impl Walk<'_> {
    fn visit_dir(&mut self, entry: &mut ScanEntry) {
        match fs::canonicalize(&entry.path) {
            Ok(canonical) => {
                if !self.visited.insert(canonical) {
                    tracing::debug!(path = %entry.path.display(), "directory already visited, not descending");
                    entry.truncated = Some(Truncation::Cycle);
                    return;
                }
            }
            Err(err) => {
                self.record_failure(entry, ScanError::io(&entry.path, &err));
                return;
            }
        }

        let listing = match self.engine.listing_for(&entry.path) {
            Ok(listing) => listing,
            Err(err) => {
                self.record_failure(entry, err);
                return;
            }
        };

        let children: Vec<(ScanEntry, bool)> = listing
            .iter()
            .map(|child| (self.child_entry(entry, child), child.is_symlink))
            .collect();
        self.discovered += children
            .iter()
            .filter(|(node, _)| node.kind == EntryKind::File && !node.ignored)
            .count() as u64;

        for (mut node, is_symlink) in children {
            if node.ignored {
                entry.children.push(node);
                continue;
            }
            match node.kind {
                EntryKind::Directory => {
                    if is_symlink && !self.options.follow_symlinks {
                        entry.children.push(node);
                        continue;
                    }
                    if self.options.max_depth.is_some_and(|max| node.depth > max) {
                        node.truncated = Some(Truncation::Depth);
                        entry.children.push(node);
                        continue;
                    }
                    if self.check_cancelled() {
                        return;
                    }
                    self.visit_dir(&mut node);
                    entry.children.push(node);
                    if self.cancelled {
                        return;
                    }
                }
                EntryKind::File => {
                    if self.check_cancelled() {
                        return;
                    }
                    self.visit_file(&mut node);
                    entry.children.push(node);
                }
            }
        }
    }

    fn child_entry(&self, parent: &ScanEntry, child: &DirChild) -> ScanEntry {
        let relative = join_relative(&parent.relative, &child.name);
        let mut node = ScanEntry::new(&child.path, relative, child.kind, parent.depth + 1);
        node.ignored = self
            .rules
            .is_ignored(&child.path, child.kind == EntryKind::Directory);
        node
    }

    fn visit_file(&mut self, entry: &mut ScanEntry) {
        match self.engine.count_file(&entry.path, &self.read_config) {
            Ok((stamp, tokens)) => {
                entry.size = stamp.size;
                entry.tokens = Some(tokens);
                self.processed += 1;
            }
            Err(err) => {
                if let Ok(meta) = fs::metadata(&entry.path) {
                    entry.size = meta.len();
                }
                self.record_failure(entry, err);
                self.failed += 1;
            }
        }
        self.progress.report(
            self.processed + self.failed,
            self.discovered,
            &entry.path,
        );
    }

    fn record_failure(&self, entry: &mut ScanEntry, err: ScanError) {
        match &err {
            ScanError::Skipped { .. } => {
                tracing::debug!(path = %entry.path.display(), error = %err, "entry skipped")
            }
            _ => tracing::warn!(path = %entry.path.display(), error = %err, "entry failed"),
        }
        entry.error = Some(EntryError::from(&err));
    }

    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled && self.cancel.is_cancelled() {
            tracing::debug!(processed = self.processed, "scan cancelled");
            self.cancelled = true;
        }
        self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Tier;
    use crate::config::CacheConfig;
    use crate::core::model::EntryErrorKind;
    use crate::tasks::NoProgress;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn engine() -> ScanEngine {
        ScanEngine::new(
            Arc::new(CacheStore::new(&CacheConfig::default()).unwrap()),
            Arc::new(TokenEstimator::heuristic()),
        )
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn scan(engine: &ScanEngine, root: &Path, options: &ScanOptions) -> ScanReport {
        engine
            .scan(root, options, &CancelToken::new(), &NoProgress)
            .unwrap()
    }

    fn relatives(report: &ScanReport) -> Vec<String> {
        report.entries().map(|e| e.relative.clone()).collect()
    }

    #[test]
    fn test_scan_empty_dir() {
        let temp = tempdir().unwrap();
        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        assert!(report.is_complete());
        assert_eq!(report.root.count(), 1);
        assert_eq!(report.total_tokens, 0);
    }

    #[test]
    fn test_root_must_exist_and_be_dir() {
        let temp = tempdir().unwrap();
        let engine = engine();
        let missing = temp.path().join("missing");
        assert!(matches!(
            engine.scan(&missing, &ScanOptions::default(), &CancelToken::new(), &NoProgress),
            Err(ScanError::RootNotFound { .. })
        ));

        write(temp.path(), "file.txt", "x");
        assert!(matches!(
            engine.scan(
                &temp.path().join("file.txt"),
                &ScanOptions::default(),
                &CancelToken::new(),
                &NoProgress
            ),
            Err(ScanError::RootNotDirectory { .. })
        ));
    }

    #[test]
    fn test_preorder_lexicographic() {
        let temp = tempdir().unwrap();
        write(temp.path(), "b.txt", "bee");
        write(temp.path(), "a/z.txt", "zed");
        write(temp.path(), "a/c/d.txt", "dee");
        write(temp.path(), "c.txt", "sea");

        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        assert_eq!(
            relatives(&report),
            vec!["", "a", "a/c", "a/c/d.txt", "a/z.txt", "b.txt", "c.txt"]
        );
        assert_eq!(report.files_processed, 4);
        assert!(report.root.find("a/c/d.txt").unwrap().tokens.is_some());
        assert_eq!(report.root.find("a/c/d.txt").unwrap().depth, 3);
    }

    #[test]
    fn test_node_modules_ignored_sibling_traversed() {
        let temp = tempdir().unwrap();
        write(temp.path(), "node_modules/pkg/index.js", "module.exports = 1;");
        write(temp.path(), "src/lib.rs", "pub fn f() {}");

        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        let ignored = report.root.find("node_modules").unwrap();
        assert!(ignored.ignored);
        assert!(ignored.children.is_empty());
        assert_eq!(ignored.tokens, None);

        let src = report.root.find("src").unwrap();
        assert!(!src.ignored);
        assert!(src.find("src/lib.rs").unwrap().tokens.unwrap() > 0);
        assert_eq!(report.files_processed, 1);
    }

    #[test]
    fn test_extension_ignored() {
        let temp = tempdir().unwrap();
        write(temp.path(), "debug.log", "noise");
        write(temp.path(), "main.py", "print('hi')");

        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        let log = report.root.find("debug.log").unwrap();
        assert!(log.ignored);
        assert_eq!(log.tokens, None);
        assert_eq!(report.files_processed, 1);
    }

    #[test]
    fn test_no_default_ignores() {
        let temp = tempdir().unwrap();
        write(temp.path(), "node_modules/x.js", "x");
        let options = ScanOptions {
            default_ignores: false,
            ..Default::default()
        };
        let report = scan(&engine(), temp.path(), &options);
        assert!(report.root.find("node_modules/x.js").is_some());
    }

    #[test]
    fn test_depth_limit_truncates() {
        let temp = tempdir().unwrap();
        write(temp.path(), "top.txt", "t");
        write(temp.path(), "a/mid.txt", "m");
        write(temp.path(), "a/b/deep.txt", "d");

        let options = ScanOptions {
            max_depth: Some(1),
            ..Default::default()
        };
        let report = scan(&engine(), temp.path(), &options);

        let a = report.root.find("a").unwrap();
        assert_eq!(a.truncated, None);
        assert!(a.find("a/mid.txt").is_some());

        let b = report.root.find("a/b").unwrap();
        assert_eq!(b.truncated, Some(Truncation::Depth));
        assert!(b.children.is_empty());
        assert!(report.root.find("a/b/deep.txt").is_none());
        assert!(report.is_complete());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_truncated() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a/file.txt", "content");
        std::os::unix::fs::symlink(temp.path().join("a"), temp.path().join("a/loop")).unwrap();

        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        let looped = report.root.find("a/loop").unwrap();
        assert_eq!(looped.truncated, Some(Truncation::Cycle));
        assert!(looped.children.is_empty());
        assert!(report.is_complete());
        assert_eq!(report.files_processed, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_recorded_and_scan_continues() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha");
        write(temp.path(), "locked.txt", "secret");
        write(temp.path(), "z.txt", "zulu");
        let locked = temp.path().join("locked.txt");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }

        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        let entry = report.root.find("locked.txt").unwrap();
        assert_eq!(entry.error.as_ref().unwrap().kind, EntryErrorKind::Io);
        assert_eq!(entry.tokens, None);
        assert!(report.root.find("z.txt").unwrap().tokens.is_some());
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_processed, 2);
    }

    #[test]
    fn test_binary_file_skipped() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("blob.raw"), [0u8, 159, 146, 150]).unwrap();
        let report = scan(&engine(), temp.path(), &ScanOptions::default());
        let entry = report.root.find("blob.raw").unwrap();
        assert_eq!(entry.error.as_ref().unwrap().kind, EntryErrorKind::Skipped);
        assert_eq!(entry.size, 4);
    }

    #[test]
    fn test_second_scan_served_from_cache() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha");
        write(temp.path(), "sub/b.txt", "beta");
        let engine = engine();

        let first = scan(&engine, temp.path(), &ScanOptions::default());
        let computes = engine.cache().stats();
        let second = scan(&engine, temp.path(), &ScanOptions::default());
        let after = engine.cache().stats();

        for (before, after) in computes.tiers().iter().zip(after.tiers()) {
            assert_eq!(before.computes, after.computes, "tier {}", before.tier);
        }
        assert_eq!(relatives(&first), relatives(&second));
        assert_eq!(first.total_tokens, second.total_tokens);
    }

    #[test]
    fn test_changed_mtime_recomputes_once() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha");
        write(temp.path(), "b.txt", "beta");
        let engine = engine();
        scan(&engine, temp.path(), &ScanOptions::default());
        let before = engine.cache().stats().tokens.computes;

        let later = SystemTime::now() + Duration::from_secs(300);
        filetime::set_file_mtime(
            temp.path().join("a.txt"),
            filetime::FileTime::from_system_time(later),
        )
        .unwrap();

        scan(&engine, temp.path(), &ScanOptions::default());
        assert_eq!(engine.cache().stats().tokens.computes, before + 1);
        scan(&engine, temp.path(), &ScanOptions::default());
        assert_eq!(engine.cache().stats().tokens.computes, before + 1);
        assert_eq!(engine.cache().tokens().len(), 2);
    }

    #[test]
    fn test_new_file_changes_directory_listing() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha");
        let engine = engine();
        scan(&engine, temp.path(), &ScanOptions::default());

        write(temp.path(), "b.txt", "beta");
        let later = SystemTime::now() + Duration::from_secs(300);
        filetime::set_file_mtime(temp.path(), filetime::FileTime::from_system_time(later))
            .unwrap();

        let report = scan(&engine, temp.path(), &ScanOptions::default());
        assert!(report.root.find("b.txt").is_some());
        assert_eq!(engine.cache().directories().len(), 1);
    }

    #[test]
    fn test_cancel_before_start_keeps_root() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha");
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = engine()
            .scan(temp.path(), &ScanOptions::default(), &cancel, &NoProgress)
            .unwrap();
        assert_eq!(report.status, ScanStatus::Cancelled);
        assert!(report.root.children.is_empty());
        assert_eq!(report.files_processed, 0);
    }

    struct CancelAfter {
        token: CancelToken,
        after: u64,
        calls: AtomicU64,
    }

    impl ProgressSink for CancelAfter {
        fn report(&self, processed: u64, _estimated_total: u64, _current: &Path) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if processed >= self.after {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancel_mid_scan_returns_partial_tree() {
        let temp = tempdir().unwrap();
        for i in 0..50 {
            write(temp.path(), &format!("d{:02}/f.txt", i), "text");
        }
        let token = CancelToken::new();
        let sink = CancelAfter {
            token: token.clone(),
            after: 3,
            calls: AtomicU64::new(0),
        };

        let report = engine()
            .scan(temp.path(), &ScanOptions::default(), &token, &sink)
            .unwrap();
        assert_eq!(report.status, ScanStatus::Cancelled);
        assert_eq!(report.files_processed, 3);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.root.children.len(), 3);
        // Every emitted file was fully processed
        assert!(report
            .entries()
            .filter(|e| e.kind == EntryKind::File)
            .all(|e| e.tokens.is_some()));
    }

    #[test]
    fn test_progress_reports_discovered_total() {
        struct Record(parking_lot::Mutex<Vec<(u64, u64)>>);
        impl ProgressSink for Record {
            fn report(&self, processed: u64, total: u64, _current: &Path) {
                self.0.lock().push((processed, total));
            }
        }

        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "a");
        write(temp.path(), "b.txt", "b");
        write(temp.path(), "sub/c.txt", "c");
        let sink = Record(parking_lot::Mutex::new(Vec::new()));
        engine()
            .scan(temp.path(), &ScanOptions::default(), &CancelToken::new(), &sink)
            .unwrap();

        let seen = sink.0.into_inner();
        // Root files are listed before the subdirectory is entered
        assert_eq!(seen, vec![(1, 2), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_invalid_pattern_fails_fast() {
        let temp = tempdir().unwrap();
        let options = ScanOptions {
            ignore: vec!["src/[".to_string()],
            ..Default::default()
        };
        let err = engine()
            .scan(temp.path(), &options, &CancelToken::new(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern { .. }));
    }

    #[test]
    fn test_report_metadata() {
        let temp = tempdir().unwrap();
        write(temp.path(), "a.txt", "alpha beta");
        let engine = engine();
        let report = scan(&engine, temp.path(), &ScanOptions::default());
        assert!(!report.exact_tokens);
        assert_eq!(report.encoding, "heuristic");
        assert_eq!(engine.cache().stats().content.entries, 1);
        assert_eq!(engine.cache().stats().directory.tier, Tier::Directory);
    }
}
