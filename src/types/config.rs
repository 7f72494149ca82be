//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and environment variables.

use crate::cache::CacheLevel;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Orchestrator configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Read configuration from a JSON file. Missing sections take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FMQ_*` environment overrides.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("FMQ_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("FMQ_MAX_REPAIR_ATTEMPTS") {
            self.orchestrator.max_repair_attempts = v.parse().map_err(|_| {
                Error::configuration(format!("FMQ_MAX_REPAIR_ATTEMPTS is not a number: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("FMQ_DEFAULT_TTL_SECONDS") {
            self.cache.default_ttl_seconds = v.parse().map_err(|_| {
                Error::configuration(format!("FMQ_DEFAULT_TTL_SECONDS is not a number: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("FMQ_PERSIST_CACHE") {
            self.cache.persist_cache = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(level) = std::env::var("FMQ_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.default_ttl_seconds == 0 {
            return Err(Error::configuration("default_ttl_seconds must be positive"));
        }
        if let Some((level, _)) = self
            .cache
            .ttl_seconds_by_level
            .iter()
            .find(|(_, ttl)| **ttl == 0)
        {
            return Err(Error::configuration(format!(
                "ttl_seconds_by_level.{} must be positive",
                level
            )));
        }
        Ok(())
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL overrides per cache level, in seconds.
    pub ttl_seconds_by_level: BTreeMap<CacheLevel, u64>,

    /// TTL for levels without an override (default: 1 hour).
    pub default_ttl_seconds: u64,

    /// Enable reading/writing the cache directory at all.
    pub persist_cache: bool,

    /// Load persisted entries when the hierarchy is created.
    pub load_cache_at_start: bool,

    /// Save entries on teardown.
    pub save_on_exit: bool,

    /// Directory holding one JSON document per cache level.
    pub cache_dir: PathBuf,
}

impl CacheConfig {
    /// Effective TTL for a cache level.
    pub fn ttl_for(&self, level: CacheLevel) -> u64 {
        self.ttl_seconds_by_level
            .get(&level)
            .copied()
            .unwrap_or(self.default_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds_by_level: BTreeMap::new(),
            default_ttl_seconds: 3600,
            persist_cache: false,
            load_cache_at_start: false,
            save_on_exit: false,
            cache_dir: PathBuf::from(".fmq-cache"),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum passes through the repair collaborator per run.
    pub max_repair_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.default_ttl_seconds, 3600);
        assert_eq!(config.cache.ttl_for(CacheLevel::Table), 3600);
        assert_eq!(config.orchestrator.max_repair_attempts, 2);
        assert!(!config.cache.persist_cache);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"cache": {{"ttl_seconds_by_level": {{"table": 60}}, "persist_cache": true}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cache.ttl_for(CacheLevel::Table), 60);
        assert_eq!(config.cache.ttl_for(CacheLevel::Schema), 3600);
        assert!(config.cache.persist_cache);
        assert_eq!(config.orchestrator.max_repair_attempts, 2);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = Config::default();
        config.cache.default_ttl_seconds = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_level_ttl_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache": {{"ttl_seconds_by_level": {{"table": 0}}}}}}"#).unwrap();

        match Config::from_file(file.path()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("table"), "{msg}"),
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }
}
