//! Cache module - In-memory, size-bounded tiers for scan data
//!
//! Provides:
//! - Keys with embedded staleness discriminators (key)
//! - Cached value types and their weights (value)
//! - A single bounded tier with eviction and invalidation (tier)
//! - The three-tier store shared by scans (store)

pub mod key;
pub mod store;
pub mod tier;
pub mod value;

pub use key::{discriminator_of, CacheKey, FileStamp, Tier};
pub use store::{CacheStore, StoreStats};
pub use tier::{CacheEntry, EvictionPolicy, TierCache, TierStats};
pub use value::{DirChild, Listing, Weigh};
