//! FileMaker DDR inspector tool declarations.
//!
//! The static tool set the engine fronts: database discovery at the root,
//! schema/table/script inspection beneath it, and uncached file helpers.
//! Paths the inspector needs are derived from the `discover_databases`
//! output by name; an unknown or ambiguous name is never guessed.

use super::catalog::{DerivationContext, ParamDef, ParamType, ToolCatalog, ToolDescriptor};
use super::ToolRegistry;
use crate::cache::KeyRule;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DISCOVER_DATABASES: &str = "discover_databases";
pub const LIST_TOOLS: &str = "list_tools";
pub const GET_DATABASE_BY_NAME: &str = "get_database_by_name";
pub const GET_DATABASES_BY_NAMES: &str = "get_databases_by_names";
pub const GET_SCHEMA_INFORMATION: &str = "get_schema_information";
pub const GET_TABLE_INFORMATION: &str = "get_table_information";
pub const GET_SCRIPT_INFORMATION: &str = "get_script_information";
pub const GET_SCRIPT_DETAILS: &str = "get_script_details";
pub const GET_CUSTOM_FUNCTIONS: &str = "get_custom_functions";
pub const READ_FILE_CONTENT: &str = "read_file_content";
pub const READ_CHUNK: &str = "read_chunk";
pub const CLEANUP_OLD_FILES: &str = "cleanup_old_files";

/// Typed view of the `discover_databases` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseList {
    pub databases: Vec<DatabaseRecord>,
    #[serde(default)]
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub directory: Option<String>,
}

impl DatabaseList {
    /// The single database whose name (or path) is `name_or_path`.
    pub fn find(&self, name_or_path: &str) -> std::result::Result<&DatabaseRecord, String> {
        let matches: Vec<&DatabaseRecord> = self
            .databases
            .iter()
            .filter(|db| db.name == name_or_path || db.path == name_or_path)
            .collect();
        match matches.as_slice() {
            [db] => Ok(db),
            [] => Err(format!("no discovered database named '{}'", name_or_path)),
            many => Err(format!(
                "'{}' is ambiguous: {} discovered databases match",
                name_or_path,
                many.len()
            )),
        }
    }
}

/// Path of the database named by the `db_name` parameter.
fn database_path(ctx: &DerivationContext<'_>) -> std::result::Result<Value, String> {
    let name = ctx
        .params
        .get("db_name")
        .and_then(Value::as_str)
        .ok_or_else(|| "db_name is not bound".to_string())?;
    let list: DatabaseList = ctx
        .source
        .parse()
        .map_err(|e| format!("unreadable database list: {}", e))?;
    let db = list.find(name)?;
    Ok(Value::String(db.path.clone()))
}

fn db_name_param() -> ParamDef {
    ParamDef::required("db_name", ParamType::String, "Name of the database")
}

fn schema_name_param() -> ParamDef {
    ParamDef::with_default(
        "schema_name",
        ParamType::String,
        "Name of the schema",
        json!("default"),
    )
}

/// Declarations in dependency-friendly order.
pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(DISCOVER_DATABASES, "List every database in the DDR export")
            .cached(KeyRule::Singleton("db-list".into())),
        ToolDescriptor::new(LIST_TOOLS, "Describe the inspector's tools")
            .cached(KeyRule::Singleton("tool-catalog".into())),
        ToolDescriptor::new(GET_DATABASE_BY_NAME, "Look up one discovered database")
            .param(db_name_param())
            .depends_on(DISCOVER_DATABASES),
        ToolDescriptor::new(GET_DATABASES_BY_NAMES, "Look up several discovered databases")
            .param(ParamDef::required(
                "db_names",
                ParamType::StringList,
                "Names of the databases",
            ))
            .depends_on(DISCOVER_DATABASES),
        ToolDescriptor::new(GET_SCHEMA_INFORMATION, "Tables and relationships of a schema")
            .param(db_name_param())
            .param(schema_name_param())
            .param(ParamDef::required("db_path", ParamType::String, "Path to the database file"))
            .depends_on(DISCOVER_DATABASES)
            .cached(KeyRule::Schema {
                db: "db_name".into(),
                schema: "schema_name".into(),
            })
            .derive("db_path", DISCOVER_DATABASES, database_path),
        ToolDescriptor::new(GET_TABLE_INFORMATION, "Fields of one table")
            .param(db_name_param())
            .param(schema_name_param())
            .param(ParamDef::required("table_name", ParamType::String, "Name of the table"))
            .param(ParamDef::required("table_path", ParamType::String, "Path to the table's database file"))
            .depends_on(DISCOVER_DATABASES)
            .depends_on(GET_SCHEMA_INFORMATION)
            .cached(KeyRule::Table {
                db: "db_name".into(),
                schema: "schema_name".into(),
                table: "table_name".into(),
            })
            .derive("table_path", DISCOVER_DATABASES, database_path),
        ToolDescriptor::new(GET_SCRIPT_INFORMATION, "Scripts defined in a database")
            .param(db_name_param())
            .param(ParamDef::required("db_path", ParamType::String, "Path to the database file"))
            .depends_on(DISCOVER_DATABASES)
            .cached(KeyRule::Database { db: "db_name".into() })
            .derive("db_path", DISCOVER_DATABASES, database_path),
        ToolDescriptor::new(GET_SCRIPT_DETAILS, "Steps of one script")
            .param(ParamDef::required("script_id", ParamType::String, "Script identifier"))
            .param(db_name_param())
            .depends_on(GET_SCRIPT_INFORMATION)
            .cached(KeyRule::Script {
                script: "script_id".into(),
                owner_db: Some("db_name".into()),
            }),
        ToolDescriptor::new(GET_CUSTOM_FUNCTIONS, "Custom functions of a database")
            .param(db_name_param())
            .param(ParamDef::required("db_path", ParamType::String, "Path to the database file"))
            .depends_on(DISCOVER_DATABASES)
            .derive("db_path", DISCOVER_DATABASES, database_path),
        ToolDescriptor::new(READ_FILE_CONTENT, "Read a file, chunked when large")
            .param(ParamDef::required("file_path", ParamType::String, "File to read"))
            .param(ParamDef::optional("chunk_size", ParamType::Int, "Chunk size in bytes")),
        ToolDescriptor::new(READ_CHUNK, "Read one chunk produced by read_file_content")
            .param(ParamDef::required("chunk_path", ParamType::String, "Chunk file")),
        ToolDescriptor::new(CLEANUP_OLD_FILES, "Delete stale chunk files")
            .param(ParamDef::optional("max_age_seconds", ParamType::Int, "Maximum age to keep")),
    ]
}

pub fn catalog() -> Result<ToolCatalog> {
    let mut catalog = ToolCatalog::new();
    for descriptor in descriptors() {
        catalog.register(descriptor)?;
    }
    Ok(catalog)
}

/// Catalog plus validated dependency graph for the DDR tools.
pub fn registry() -> Result<ToolRegistry> {
    ToolRegistry::new(catalog()?)
}
