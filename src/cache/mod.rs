//! Hierarchical result cache.
//!
//! - **key**: cache levels, rendered keys and per-tool key rules
//! - **store**: TTL store with generations and lazy expiry
//! - **hierarchy**: one store per level, derivations and lifecycle
//! - **persist**: JSON documents per level on disk

pub mod hierarchy;
pub mod key;
pub mod persist;
pub mod store;

pub use hierarchy::{CacheHierarchy, DeferredParam};
pub use key::{matches_prefix, CacheKey, CacheLevel, KeyRule};
pub use store::{CacheEntry, CacheStore, Clock, ManualClock, StoreStats, SystemClock};
