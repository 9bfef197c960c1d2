//! A single size-bounded cache tier
//!
//! Each tier owns one map behind its own mutex. The lock is held only while
//! the map is read or mutated; compute closures run unlocked. Concurrent
//! misses on the same key are serialised through an in-flight table: the
//! first caller computes, later callers park until it lands and then read
//! the stored entry.

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::key::{CacheKey, Tier};
use crate::cache::value::Weigh;
use crate::error::{CacheError, ScanError};

/// Order in which entries leave a tier that is over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Oldest inserted first; hits do no bookkeeping
    #[default]
    OldestInserted,
    /// Least recently read or written first; every hit refreshes the entry
    LeastRecentlyUsed,
}

/// An immutable cached value with its accounting data
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub value: V,
    pub inserted_at: Instant,
    pub approx_bytes: u64,
    seq: u64,
}

/// Point-in-time counters for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub entries: usize,
    pub bytes: u64,
    pub budget: u64,
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    evictions: AtomicU64,
}

struct TierState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Eviction order: lowest sequence number leaves first
    order: BTreeMap<u64, CacheKey>,
    /// Live key per (path, encoding), used to drop superseded entries
    slots: HashMap<(PathBuf, Option<&'static str>), CacheKey>,
    in_flight: HashMap<CacheKey, Arc<Flight>>,
    next_seq: u64,
    total_bytes: u64,
}

impl<V> TierState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            slots: HashMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            total_bytes: 0,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        self.total_bytes = self.total_bytes.saturating_sub(entry.approx_bytes);
        let slot = key.slot();
        if self.slots.get(&slot) == Some(key) {
            self.slots.remove(&slot);
        }
        Some(entry)
    }
}

/// Completion signal for a computation in progress
#[derive(Default)]
struct Flight {
    done: Mutex<bool>,
    landed: Condvar,
}

impl Flight {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.landed.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.landed.notify_all();
    }
}

/// Clears the in-flight marker for a key when the leader finishes, fails or
/// unwinds, waking every follower
struct Landing<'a, V> {
    cache: &'a TierCache<V>,
    key: &'a CacheKey,
}

impl<V> Drop for Landing<'_, V> {
    fn drop(&mut self) {
        let flight = self.cache.state.lock().in_flight.remove(self.key);
        if let Some(flight) = flight {
            flight.finish();
        }
    }
}

/// One tier of the cache
pub struct TierCache<V> {
    tier: Tier,
    budget: u64,
    policy: EvictionPolicy,
    state: Mutex<TierState<V>>,
    counters: Counters,
}

impl<V: Clone + Weigh> TierCache<V> {
    /// Create an empty tier; `budget` must be non-zero
    pub fn new(tier: Tier, budget: u64, policy: EvictionPolicy) -> Result<Self, CacheError> {
        if budget == 0 {
            return Err(CacheError::InvalidBudget { tier });
        }
        Ok(Self {
            tier,
            budget,
            policy,
            state: Mutex::new(TierState::new()),
            counters: Counters::default(),
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Pure lookup; never computes
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if key.tier() != self.tier {
            return None;
        }
        let mut state = self.state.lock();
        let found = self.lookup(&mut state, key);
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Whether `key` currently has a live entry (no counters, no recency update)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    ///
    /// Failed computations are returned to the caller and nothing is stored.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Result<V, ScanError>,
    {
        if key.tier() != self.tier {
            return Err(CacheError::TierMismatch {
                key: key.tier(),
                cache: self.tier,
            });
        }

        loop {
            let pending = {
                let mut state = self.state.lock();
                if let Some(value) = self.lookup(&mut state, key) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                match state.in_flight.get(key) {
                    Some(flight) => Some(Arc::clone(flight)),
                    None => {
                        state.in_flight.insert(key.clone(), Arc::new(Flight::default()));
                        None
                    }
                }
            };

            match pending {
                Some(flight) => flight.wait(),
                None => break,
            }
        }

        let _landing = Landing { cache: self, key };
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tier = %self.tier, path = %key.path().display(), "cache miss, computing");

        let value = compute()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    /// Store `value` under `key`, replacing any entry for the same path
    pub fn insert(&self, key: CacheKey, value: V) {
        if key.tier() != self.tier {
            tracing::warn!(key = %key.tier(), cache = %self.tier, "ignoring insert with mismatched tier");
            return;
        }
        let approx_bytes = entry_weight(&key, &value);

        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.remove(&key);
        if let Some(previous) = state.slots.get(&key.slot()).cloned() {
            // Same path, older stamp: unreachable from now on.
            state.remove(&previous);
        }

        if approx_bytes > self.budget {
            tracing::debug!(
                tier = %self.tier,
                path = %key.path().display(),
                bytes = approx_bytes,
                budget = self.budget,
                "value exceeds tier budget, not storing"
            );
            return;
        }

        let seq = state.bump_seq();
        state.order.insert(seq, key.clone());
        state.slots.insert(key.slot(), key.clone());
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: Instant::now(),
                approx_bytes,
                seq,
            },
        );
        state.total_bytes += approx_bytes;

        self.evict_locked(state);
    }

    /// Remove entries until the tier is back within budget; returns how many
    /// were evicted
    pub fn evict_if_over_budget(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_locked(&mut state)
    }

    /// Drop every entry in the tier
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.order.clear();
        state.slots.clear();
        state.total_bytes = 0;
        removed
    }

    /// Drop every entry for `path` or anything below it
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.path().starts_with(path))
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    /// Snapshot of the live entry for `key`
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            tier: self.tier,
            entries: state.entries.len(),
            bytes: state.total_bytes,
            budget: self.budget,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computes: self.counters.computes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, state: &mut MutexGuard<'_, TierState<V>>, key: &CacheKey) -> Option<V> {
        let state = &mut **state;
        let entry = state.entries.get_mut(key)?;
        if self.policy == EvictionPolicy::LeastRecentlyUsed {
            state.order.remove(&entry.seq);
            let seq = state.next_seq;
            state.next_seq += 1;
            entry.seq = seq;
            state.order.insert(seq, key.clone());
        }
        Some(entry.value.clone())
    }

    fn evict_locked(&self, state: &mut TierState<V>) -> usize {
        let mut evicted = 0;
        while state.total_bytes > self.budget {
            let Some((_, key)) = state.order.pop_first() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.approx_bytes);
                let slot = key.slot();
                if state.slots.get(&slot) == Some(&key) {
                    state.slots.remove(&slot);
                }
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(tier = %self.tier, evicted, bytes = state.total_bytes, "evicted entries");
        }
        evicted
    }
}

fn entry_weight<V: Weigh>(key: &CacheKey, value: &V) -> u64 {
    value.weigh() + key.path().as_os_str().len() as u64 + size_of::<CacheKey>() as u64
}
