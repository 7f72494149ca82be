//! Hierarchical cache keys and the per-tool rules that build them.
//!
//! Keys are ordered `segment:value` pairs forming a prefix tree:
//!
//! ```text
//! db-list, tool-catalog                     (singletons)
//! db:{db}
//! db:{db}:schema:{schema}
//! db:{db}:schema:{schema}:table:{table}
//! script:{script}                           (flat, optionally owned by db:{db})
//! ```

use crate::types::ToolParams;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Scope at which a tool's results are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    Singleton,
    Database,
    Schema,
    Table,
    Script,
}

impl CacheLevel {
    pub const ALL: [CacheLevel; 5] = [
        CacheLevel::Singleton,
        CacheLevel::Database,
        CacheLevel::Schema,
        CacheLevel::Table,
        CacheLevel::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::Singleton => "singleton",
            CacheLevel::Database => "database",
            CacheLevel::Schema => "schema",
            CacheLevel::Table => "table",
            CacheLevel::Script => "script",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered cache key plus its level and structural parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    level: CacheLevel,
    rendered: String,
    parent: Option<String>,
}

impl CacheKey {
    pub fn singleton(name: impl Into<String>) -> Self {
        Self {
            level: CacheLevel::Singleton,
            rendered: name.into(),
            parent: None,
        }
    }

    pub fn database(db: &str) -> Self {
        Self {
            level: CacheLevel::Database,
            rendered: format!("db:{}", db),
            parent: None,
        }
    }

    pub fn schema(db: &str, schema: &str) -> Self {
        let parent = Self::database(db).rendered;
        Self {
            level: CacheLevel::Schema,
            rendered: format!("{}:schema:{}", parent, schema),
            parent: Some(parent),
        }
    }

    pub fn table(db: &str, schema: &str, table: &str) -> Self {
        let parent = Self::schema(db, schema).rendered;
        Self {
            level: CacheLevel::Table,
            rendered: format!("{}:table:{}", parent, table),
            parent: Some(parent),
        }
    }

    /// Flat script key. `owner_db` links it under `db:{owner}` for prefix invalidation.
    pub fn script(script: &str, owner_db: Option<&str>) -> Self {
        Self {
            level: CacheLevel::Script,
            rendered: format!("script:{}", script),
            parent: owner_db.map(|db| Self::database(db).rendered),
        }
    }

    pub fn level(&self) -> CacheLevel {
        self.level
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}

impl Serialize for CacheKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.rendered)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// True if `key` equals `prefix` or continues it at a segment boundary.
///
/// `db:X` matches `db:X` and `db:X:schema:s`, never `db:XY`.
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(':'),
        None => false,
    }
}

/// How a tool's parameters map onto a cache key. Fields name parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRule {
    /// Results are never cached.
    Uncached,
    /// One global entry under a fixed name.
    Singleton(String),
    Database {
        db: String,
    },
    Schema {
        db: String,
        schema: String,
    },
    Table {
        db: String,
        schema: String,
        table: String,
    },
    Script {
        script: String,
        owner_db: Option<String>,
    },
}

impl KeyRule {
    pub fn level(&self) -> Option<CacheLevel> {
        match self {
            KeyRule::Uncached => None,
            KeyRule::Singleton(_) => Some(CacheLevel::Singleton),
            KeyRule::Database { .. } => Some(CacheLevel::Database),
            KeyRule::Schema { .. } => Some(CacheLevel::Schema),
            KeyRule::Table { .. } => Some(CacheLevel::Table),
            KeyRule::Script { .. } => Some(CacheLevel::Script),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self, KeyRule::Uncached)
    }

    /// Parameter names the key is built from.
    pub fn key_params(&self) -> Vec<&str> {
        match self {
            KeyRule::Uncached | KeyRule::Singleton(_) => Vec::new(),
            KeyRule::Database { db } => vec![db.as_str()],
            KeyRule::Schema { db, schema } => vec![db.as_str(), schema.as_str()],
            KeyRule::Table { db, schema, table } => {
                vec![db.as_str(), schema.as_str(), table.as_str()]
            }
            KeyRule::Script { script, owner_db } => {
                let mut names = vec![script.as_str()];
                if let Some(owner) = owner_db {
                    names.push(owner.as_str());
                }
                names
            }
        }
    }

    /// Build the key from bound parameters.
    ///
    /// Returns `Ok(None)` for uncached tools and `Err(param)` naming the first
    /// key parameter that is missing or empty. A missing owner only drops the
    /// script's parent link.
    pub fn render(&self, params: &ToolParams) -> std::result::Result<Option<CacheKey>, String> {
        let key = match self {
            KeyRule::Uncached => return Ok(None),
            KeyRule::Singleton(name) => CacheKey::singleton(name.clone()),
            KeyRule::Database { db } => CacheKey::database(&segment(params, db)?),
            KeyRule::Schema { db, schema } => {
                CacheKey::schema(&segment(params, db)?, &segment(params, schema)?)
            }
            KeyRule::Table { db, schema, table } => CacheKey::table(
                &segment(params, db)?,
                &segment(params, schema)?,
                &segment(params, table)?,
            ),
            KeyRule::Script { script, owner_db } => {
                let owner = owner_db
                    .as_ref()
                    .and_then(|name| segment(params, name).ok());
                CacheKey::script(&segment(params, script)?, owner.as_deref())
            }
        };
        Ok(Some(key))
    }
}

fn segment(params: &ToolParams, name: &str) -> std::result::Result<String, String> {
    let rendered = match params.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    if rendered.is_empty() {
        Err(name.to_string())
    } else {
        Ok(rendered)
    }
}
