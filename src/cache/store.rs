//! Cache store - the three cache tiers behind one handle
//!
//! The store is an explicitly constructed object. Create one at start-up
//! from a [`CacheConfig`], share it by `Arc`, and drop it at exit.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::cache::key::Tier;
use crate::cache::tier::{TierCache, TierStats};
use crate::cache::value::Listing;
use crate::config::CacheConfig;
use crate::error::CacheError;

/// Directory listing, file content and token count tiers
pub struct CacheStore {
    directories: TierCache<Listing>,
    contents: TierCache<Arc<str>>,
    tokens: TierCache<usize>,
}

/// Statistics for every tier
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub directory: TierStats,
    pub content: TierStats,
    pub tokens: TierStats,
}

impl StoreStats {
    pub fn tiers(&self) -> [&TierStats; 3] {
        [&self.directory, &self.content, &self.tokens]
    }
}

impl CacheStore {
    /// Build a store with the budgets and eviction policy from `config`
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let policy = config.eviction;
        Ok(Self {
            directories: TierCache::new(Tier::Directory, config.directory_budget, policy)?,
            contents: TierCache::new(Tier::Content, config.content_budget, policy)?,
            tokens: TierCache::new(Tier::Tokens, config.token_budget, policy)?,
        })
    }

    pub fn directories(&self) -> &TierCache<Listing> {
        &self.directories
    }

    pub fn contents(&self) -> &TierCache<Arc<str>> {
        &self.contents
    }

    pub fn tokens(&self) -> &TierCache<usize> {
        &self.tokens
    }

    /// Run an eviction pass on `tier`
    pub fn evict_if_over_budget(&self, tier: Tier) -> usize {
        match tier {
            Tier::Directory => self.directories.evict_if_over_budget(),
            Tier::Content => self.contents.evict_if_over_budget(),
            Tier::Tokens => self.tokens.evict_if_over_budget(),
        }
    }

    /// Drop every entry in `tier`
    pub fn invalidate_all(&self, tier: Tier) -> usize {
        let removed = match tier {
            Tier::Directory => self.directories.invalidate_all(),
            Tier::Content => self.contents.invalidate_all(),
            Tier::Tokens => self.tokens.invalidate_all(),
        };
        tracing::debug!(%tier, removed, "invalidated tier");
        removed
    }

    /// Drop entries for `path` and everything below it, across all tiers
    ///
    /// Needed when files are deleted: a missing file has no new stamp that
    /// would naturally supersede its old entries.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let removed = self.directories.invalidate_path(path)
            + self.contents.invalidate_path(path)
            + self.tokens.invalidate_path(path);
        tracing::debug!(path = %path.display(), removed, "invalidated path");
        removed
    }

    /// Drop everything
    pub fn clear(&self) {
        for tier in Tier::ALL {
            self.invalidate_all(tier);
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            directory: self.directories.stats(),
            content: self.contents.stats(),
            tokens: self.tokens.stats(),
        }
    }
}
