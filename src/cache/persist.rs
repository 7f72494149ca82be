//! On-disk layout: one JSON document per cache level.
//!
//! `<cache_dir>/<level>.json` holds every entry of that level keyed by its
//! rendered cache key. Writes go to a temporary file first and are renamed
//! into place, so a crash never leaves a half-written document.

use super::key::CacheLevel;
use super::store::CacheEntry;
use crate::types::{Error, Result, ToolOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Serialized contents of one cache level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLevel {
    pub level: CacheLevel,
    pub saved_at: DateTime<Utc>,
    pub entries: BTreeMap<String, CacheEntry<ToolOutput>>,
}

pub fn level_path(dir: &Path, level: CacheLevel) -> PathBuf {
    dir.join(format!("{}.json", level.as_str()))
}

pub async fn save_level(dir: &Path, document: &PersistedLevel) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = level_path(dir, document.level);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(document)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Read one level's document. A missing file is not an error.
pub async fn load_level(dir: &Path, level: CacheLevel) -> Result<Option<PersistedLevel>> {
    let path = level_path(dir, level);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let document: PersistedLevel = serde_json::from_slice(&bytes)?;
    if document.level != level {
        return Err(Error::configuration(format!(
            "{} holds entries for level '{}'",
            path.display(),
            document.level
        )));
    }
    Ok(Some(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_level(dir.path(), CacheLevel::Table).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(
            "db:Sales".to_string(),
            CacheEntry {
                value: ToolOutput::new(json!({"scripts": []})),
                created_at: Utc::now(),
                ttl_seconds: 3600,
                generation: 3,
                parent: None,
            },
        );
        let document = PersistedLevel {
            level: CacheLevel::Database,
            saved_at: Utc::now(),
            entries,
        };

        save_level(dir.path(), &document).await.unwrap();
        assert!(level_path(dir.path(), CacheLevel::Database).exists());

        let loaded = load_level(dir.path(), CacheLevel::Database)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.entries, document.entries);
    }

    #[tokio::test]
    async fn test_level_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let document = PersistedLevel {
            level: CacheLevel::Schema,
            saved_at: Utc::now(),
            entries: BTreeMap::new(),
        };
        save_level(dir.path(), &document).await.unwrap();
        std::fs::rename(
            level_path(dir.path(), CacheLevel::Schema),
            level_path(dir.path(), CacheLevel::Table),
        )
        .unwrap();

        assert!(matches!(
            load_level(dir.path(), CacheLevel::Table).await,
            Err(Error::Configuration(_))
        ));
    }
}
