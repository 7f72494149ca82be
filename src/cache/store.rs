//! Generic keyed store of timestamped entries with TTL expiry.
//!
//! Expiry is lazy: an expired entry reads as absent but stays in the map
//! until it is overwritten, invalidated or purged. Generations come from a
//! store-wide counter, so a key's generation grows on every overwrite and is
//! never reused after the key is invalidated.

use super::key::matches_prefix;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time for validity checks.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic expiry.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Entries
// =============================================================================

/// A cached value with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub generation: u64,
    /// Rendered parent key, used for descendant invalidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl<V> CacheEntry<V> {
    /// Validity predicate: `now - created_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        (now - self.created_at).num_milliseconds() < ttl_ms
    }
}

#[derive(Debug)]
struct StoreState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_generation: u64,
}

/// Counts reported by [`CacheStore::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub valid: usize,
    pub expired: usize,
}

// =============================================================================
// CacheStore
// =============================================================================

/// Keyed entry store. All mutations take the write lock, so readers never
/// observe a partially written entry.
#[derive(Debug)]
pub struct CacheStore<V> {
    state: RwLock<StoreState<V>>,
    default_ttl_seconds: u64,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(default_ttl_seconds: u64) -> Self {
        Self::with_clock(default_ttl_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                next_generation: 1,
            }),
            default_ttl_seconds,
            clock,
        }
    }

    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }

    /// Valid entry for `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_valid_at(now))
            .cloned()
    }

    pub async fn is_valid(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Generation of whatever entry is stored under `key`, valid or not.
    pub async fn generation_of(&self, key: &str) -> Option<u64> {
        let state = self.state.read().await;
        state.entries.get(key).map(|entry| entry.generation)
    }

    /// Replace the entry for `key` with the store's default TTL.
    pub async fn put(&self, key: &str, value: V, parent: Option<String>) -> CacheEntry<V> {
        self.put_with_ttl(key, value, self.default_ttl_seconds, parent)
            .await
    }

    /// Replace the entry for `key`. The new entry gets a fresh generation.
    pub async fn put_with_ttl(
        &self,
        key: &str,
        value: V,
        ttl_seconds: u64,
        parent: Option<String>,
    ) -> CacheEntry<V> {
        let mut state = self.state.write().await;
        let generation = state.next_generation;
        state.next_generation += 1;
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl_seconds,
            generation,
            parent,
        };
        state.entries.insert(key.to_string(), entry.clone());
        entry
    }

    /// Remove `key`. Returns whether an entry was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        state.entries.remove(key).is_some()
    }

    /// Remove every entry at or below `prefix`, including entries whose
    /// recorded parent is at or below it. Returns the number removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|key, entry| {
            let under_prefix = matches_prefix(key, prefix)
                || entry
                    .parent
                    .as_deref()
                    .is_some_and(|parent| matches_prefix(parent, prefix));
            !under_prefix
        });
        before - state.entries.len()
    }

    /// Drop expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_valid_at(now));
        before - state.entries.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
    }

    /// Keys of valid entries, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let state = self.state.read().await;
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> StoreStats {
        let now = self.clock.now();
        let state = self.state.read().await;
        let valid = state
            .entries
            .values()
            .filter(|entry| entry.is_valid_at(now))
            .count();
        StoreStats {
            valid,
            expired: state.entries.len() - valid,
        }
    }

    /// Copy of every stored entry, expired ones included, ordered by key.
    pub async fn snapshot(&self) -> BTreeMap<String, CacheEntry<V>> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Merge persisted entries. An incoming entry wins only if the key is
    /// absent or holds an older generation. Returns the number merged.
    pub async fn merge(&self, incoming: BTreeMap<String, CacheEntry<V>>) -> usize {
        let mut state = self.state.write().await;
        let mut merged = 0;
        for (key, entry) in incoming {
            if entry.generation >= state.next_generation {
                state.next_generation = entry.generation + 1;
            }
            let newer = state
                .entries
                .get(&key)
                .map_or(true, |existing| existing.generation < entry.generation);
            if newer {
                state.entries.insert(key, entry);
                merged += 1;
            }
        }
        merged
    }
}
