//! Cache hierarchy: one store per level plus the rules that route tool
//! results into them.
//!
//! The hierarchy is an explicitly constructed instance shared by every run
//! through an `Arc`. Its lifecycle is `new` → optional `load` → use →
//! `teardown` (which saves when configured to).

use super::key::{CacheKey, CacheLevel};
use super::persist::{self, PersistedLevel};
use super::store::{CacheEntry, CacheStore, Clock, StoreStats, SystemClock};
use crate::tools::catalog::fill_defaults;
use crate::tools::{DerivationContext, ToolDescriptor};
use crate::types::{CacheConfig, Error, Result, ToolOutput, ToolParams};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A parameter that can only be derived once `source` has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredParam {
    pub param: String,
    pub source: String,
}

/// Level-partitioned cache of tool outputs.
#[derive(Debug)]
pub struct CacheHierarchy {
    stores: BTreeMap<CacheLevel, CacheStore<ToolOutput>>,
    config: CacheConfig,
}

impl CacheHierarchy {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build with an injected clock. All levels share it.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let stores = CacheLevel::ALL
            .iter()
            .map(|&level| {
                (
                    level,
                    CacheStore::with_clock(config.ttl_for(level), clock.clone()),
                )
            })
            .collect();
        Self { stores, config }
    }

    /// Construct and, when configured, load persisted entries.
    pub async fn init(config: CacheConfig) -> Result<Self> {
        let hierarchy = Self::new(config);
        if hierarchy.config.persist_cache && hierarchy.config.load_cache_at_start {
            hierarchy.load().await?;
        }
        Ok(hierarchy)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn level_store(&self, level: CacheLevel) -> &CacheStore<ToolOutput> {
        // Every level is inserted in `with_clock`.
        &self.stores[&level]
    }

    // =========================================================================
    // Keyed access
    // =========================================================================

    /// Cache key for a call, or `None` when the tool is uncached.
    pub fn key_for(&self, descriptor: &ToolDescriptor, params: &ToolParams) -> Result<Option<CacheKey>> {
        descriptor.cache.render(params).map_err(|param| {
            Error::unresolvable(
                &descriptor.name,
                param,
                "cache key parameter is not bound",
            )
        })
    }

    pub async fn lookup(
        &self,
        descriptor: &ToolDescriptor,
        params: &ToolParams,
    ) -> Result<Option<CacheEntry<ToolOutput>>> {
        match self.key_for(descriptor, params)? {
            Some(key) => Ok(self.lookup_key(&key).await),
            None => Ok(None),
        }
    }

    pub async fn lookup_key(&self, key: &CacheKey) -> Option<CacheEntry<ToolOutput>> {
        let entry = self.level_store(key.level()).get(key.as_str()).await;
        debug!(key = %key, hit = entry.is_some(), "cache lookup");
        entry
    }

    /// Generation stored under `key`, valid or not.
    pub async fn generation_of(&self, key: &CacheKey) -> Option<u64> {
        self.level_store(key.level()).generation_of(key.as_str()).await
    }

    /// Store a call's output. Uncached tools are a no-op returning `None`.
    pub async fn store(
        &self,
        descriptor: &ToolDescriptor,
        params: &ToolParams,
        value: ToolOutput,
    ) -> Result<Option<CacheEntry<ToolOutput>>> {
        match self.key_for(descriptor, params)? {
            Some(key) => Ok(Some(self.store_key(&key, value).await)),
            None => Ok(None),
        }
    }

    /// Replace the entry under `key` using its level's TTL.
    pub async fn store_key(&self, key: &CacheKey, value: ToolOutput) -> CacheEntry<ToolOutput> {
        let level = key.level();
        let entry = self
            .level_store(level)
            .put_with_ttl(
                key.as_str(),
                value,
                self.config.ttl_for(level),
                key.parent().map(str::to_string),
            )
            .await;
        debug!(key = %key, generation = entry.generation, "cache write");
        entry
    }

    pub async fn invalidate(&self, descriptor: &ToolDescriptor, params: &ToolParams) -> Result<bool> {
        match self.key_for(descriptor, params)? {
            Some(key) => Ok(self.invalidate_key(&key).await),
            None => Ok(false),
        }
    }

    pub async fn invalidate_key(&self, key: &CacheKey) -> bool {
        self.level_store(key.level()).invalidate(key.as_str()).await
    }

    /// Clear `prefix` and everything beneath it on every level.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for store in self.stores.values() {
            removed += store.invalidate_prefix(prefix).await;
        }
        info!(prefix, removed, "cache prefix invalidated");
        removed
    }

    pub async fn clear(&self) {
        for store in self.stores.values() {
            store.clear().await;
        }
    }

    pub async fn purge_expired(&self) -> usize {
        let mut removed = 0;
        for store in self.stores.values() {
            removed += store.purge_expired().await;
        }
        removed
    }

    /// Valid and expired entry counts per level.
    pub async fn stats(&self) -> BTreeMap<CacheLevel, StoreStats> {
        let mut stats = BTreeMap::new();
        for (&level, store) in &self.stores {
            stats.insert(level, store.stats().await);
        }
        stats
    }

    // =========================================================================
    // Parameter derivation
    // =========================================================================

    /// Fill every missing parameter of `descriptor` from defaults and from
    /// the declared derivations over `available` outputs.
    ///
    /// Fails with `UnresolvableParameter` when a required parameter still
    /// has no value, including when a derivation rejects its input.
    pub fn resolve_missing_params(
        &self,
        descriptor: &ToolDescriptor,
        params: &ToolParams,
        available: &HashMap<String, ToolOutput>,
    ) -> Result<ToolParams> {
        let mut resolved = params.clone();
        fill_defaults(descriptor, &mut resolved);
        let deferred = bind_derivations(descriptor, &mut resolved, available, &HashSet::new())?;
        debug_assert!(deferred.is_empty());
        Ok(resolved)
    }

    // =========================================================================
    // Persistence lifecycle
    // =========================================================================

    /// Merge the documents under the configured directory. Returns entries merged.
    pub async fn load(&self) -> Result<usize> {
        self.load_from(&self.config.cache_dir).await
    }

    pub async fn load_from(&self, dir: &Path) -> Result<usize> {
        let mut merged = 0;
        for (&level, store) in &self.stores {
            if let Some(document) = persist::load_level(dir, level).await? {
                merged += store.merge(document.entries).await;
            }
        }
        info!(dir = %dir.display(), merged, "cache loaded");
        Ok(merged)
    }

    /// Write every level to the configured directory. Returns entries written.
    pub async fn save(&self) -> Result<usize> {
        self.save_to(&self.config.cache_dir).await
    }

    pub async fn save_to(&self, dir: &Path) -> Result<usize> {
        let mut written = 0;
        for (&level, store) in &self.stores {
            let entries = store.snapshot().await;
            written += entries.len();
            let document = PersistedLevel {
                level,
                saved_at: Utc::now(),
                entries,
            };
            persist::save_level(dir, &document).await?;
        }
        info!(dir = %dir.display(), written, "cache saved");
        Ok(written)
    }

    /// Save when persistence and `save_on_exit` are enabled.
    pub async fn teardown(&self) -> Result<()> {
        if self.config.persist_cache && self.config.save_on_exit {
            self.save().await?;
        }
        Ok(())
    }
}

/// Apply derivations for every declared parameter missing from `params`.
///
/// Derivations whose source is in `pending` become deferred bindings
/// instead of being evaluated. The first derivation that succeeds wins.
pub(crate) fn bind_derivations(
    descriptor: &ToolDescriptor,
    params: &mut ToolParams,
    available: &HashMap<String, ToolOutput>,
    pending: &HashSet<String>,
) -> Result<Vec<DeferredParam>> {
    let mut deferred = Vec::new();

    for def in &descriptor.params {
        if params.contains_key(&def.name) {
            continue;
        }

        let mut failure = None;
        let mut bound = false;
        for derivation in descriptor.derivations_for(&def.name) {
            if let Some(source) = available.get(&derivation.source) {
                let ctx = DerivationContext {
                    source,
                    params: &*params,
                };
                match (derivation.derive)(&ctx) {
                    Ok(value) => {
                        params.insert(def.name.clone(), value);
                        bound = true;
                        break;
                    }
                    Err(reason) => failure = Some(reason),
                }
            } else if pending.contains(&derivation.source) {
                deferred.push(DeferredParam {
                    param: def.name.clone(),
                    source: derivation.source.clone(),
                });
                bound = true;
                break;
            }
        }

        if !bound && def.is_required() {
            let reason = failure.unwrap_or_else(|| {
                "no value supplied, no default, and no prerequisite output derives it".to_string()
            });
            return Err(Error::unresolvable(&descriptor.name, &def.name, reason));
        }
    }

    Ok(deferred)
}
