//! Tool catalog - typed descriptors, parameter validation, defaults.
//!
//! Owns tool *metadata* (not implementations - execution goes through the
//! external runner). Every descriptor declares its parameter schema, its
//! prerequisites, the cache rule for its results, and the functions that
//! derive missing parameters from prerequisite outputs.

use crate::cache::KeyRule;
use crate::types::{Error, ToolOutput, ToolParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    StringList,
    Enum(Vec<String>),
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Validate a JSON value against this parameter type.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            ParamType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected string, got {}", value_type_name(value)))
                }
            }
            ParamType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("expected integer, got {}", value_type_name(value)))
                }
            }
            ParamType::Float => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected number, got {}", value_type_name(value)))
                }
            }
            ParamType::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected boolean, got {}", value_type_name(value)))
                }
            }
            ParamType::StringList => {
                if let Some(arr) = value.as_array() {
                    for (i, item) in arr.iter().enumerate() {
                        if !item.is_string() {
                            return Err(format!(
                                "expected string at index {}, got {}",
                                i,
                                value_type_name(item)
                            ));
                        }
                    }
                    Ok(())
                } else {
                    Err(format!("expected array, got {}", value_type_name(value)))
                }
            }
            ParamType::Enum(variants) => {
                if let Some(s) = value.as_str() {
                    if variants.iter().any(|v| v == s) {
                        Ok(())
                    } else {
                        Err(format!(
                            "invalid enum value '{}', expected one of: {}",
                            s,
                            variants.join(", ")
                        ))
                    }
                } else {
                    Err(format!("expected string for enum, got {}", value_type_name(value)))
                }
            }
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
        }
    }

    /// Human-readable type name for listings.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            default: None,
        }
    }

    /// Optional parameter without a default.
    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self::required(name, ParamType::Optional(Box::new(param_type)), description)
    }

    pub fn with_default(name: &str, param_type: ParamType, description: &str, default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::required(name, param_type, description)
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }
}

// =============================================================================
// Parameter derivation
// =============================================================================

/// Inputs available to a derivation function.
#[derive(Debug)]
pub struct DerivationContext<'a> {
    /// Output of the derivation's source tool.
    pub source: &'a ToolOutput,
    /// Parameters bound so far for the tool being resolved.
    pub params: &'a ToolParams,
}

/// Derives one parameter value; `Err` explains why it cannot.
pub type DeriveFn = fn(&DerivationContext<'_>) -> Result<Value, String>;

/// Declared rule: `param` may be computed from the output of `source`.
#[derive(Clone)]
pub struct ParamDerivation {
    pub param: String,
    pub source: String,
    pub derive: DeriveFn,
}

impl fmt::Debug for ParamDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamDerivation")
            .field("param", &self.param)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tool descriptor
// =============================================================================

/// Immutable declaration of a tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDef>,
    pub dependencies: Vec<String>,
    pub cache: KeyRule,
    pub derivations: Vec<ParamDerivation>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
            dependencies: Vec::new(),
            cache: KeyRule::Uncached,
            derivations: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    pub fn depends_on(mut self, tool: &str) -> Self {
        self.dependencies.push(tool.to_string());
        self
    }

    pub fn cached(mut self, rule: KeyRule) -> Self {
        self.cache = rule;
        self
    }

    pub fn derive(mut self, param: &str, source: &str, derive: DeriveFn) -> Self {
        self.derivations.push(ParamDerivation {
            param: param.to_string(),
            source: source.to_string(),
            derive,
        });
        self
    }

    pub fn param_def(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.param_def(name).is_some()
    }

    pub fn required_params(&self) -> BTreeSet<&str> {
        self.params
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Non-required parameters and their defaults.
    pub fn optional_params(&self) -> BTreeMap<&str, Option<&Value>> {
        self.params
            .iter()
            .filter(|p| !p.is_required())
            .map(|p| (p.name.as_str(), p.default.as_ref()))
            .collect()
    }

    /// Derivations for `param`, in declaration order.
    pub fn derivations_for<'a>(&'a self, param: &'a str) -> impl Iterator<Item = &'a ParamDerivation> + 'a {
        self.derivations.iter().filter(move |d| d.param == param)
    }

    /// One-line listing.
    ///
    /// Format: `- tool(param1: type, param2?: type) <- dep1, dep2: description`
    pub fn summary_line(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let optional = if p.is_required() { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.param_type.display_name())
            })
            .collect();

        let deps = if self.dependencies.is_empty() {
            String::new()
        } else {
            format!(" <- {}", self.dependencies.join(", "))
        };

        format!("- {}({}){}: {}", self.name, params.join(", "), deps, self.description)
    }

    /// Check the descriptor is internally consistent.
    fn check(&self) -> crate::types::Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("Tool name cannot be empty"));
        }
        for key_param in self.cache.key_params() {
            if !self.declares(key_param) {
                return Err(Error::configuration(format!(
                    "Tool '{}' builds its cache key from undeclared parameter '{}'",
                    self.name, key_param
                )));
            }
        }
        for derivation in &self.derivations {
            if !self.declares(&derivation.param) {
                return Err(Error::configuration(format!(
                    "Tool '{}' derives undeclared parameter '{}'",
                    self.name, derivation.param
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tool catalog
// =============================================================================

/// In-memory tool catalog in declaration order. Owns metadata, not implementations.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool descriptor.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> crate::types::Result<()> {
        descriptor.check()?;
        if self.index.contains_key(&descriptor.name) {
            return Err(Error::configuration(format!(
                "Tool '{}' declared twice",
                descriptor.name
            )));
        }
        self.index
            .insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    /// Get a tool descriptor by name.
    pub fn get(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.index.get(tool).map(|&i| &self.entries[i])
    }

    /// Get a tool descriptor or fail with `UnknownTool`.
    pub fn require(&self, tool: &str) -> crate::types::Result<&ToolDescriptor> {
        self.get(tool)
            .ok_or_else(|| Error::UnknownTool(tool.to_string()))
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.index.contains_key(tool)
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.entries
    }

    /// Tool names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    /// Validate parameters against a tool's parameter definitions.
    ///
    /// Returns a list of validation errors (empty = valid).
    pub fn validate_params(
        &self,
        tool: &str,
        params: &ToolParams,
    ) -> crate::types::Result<Vec<String>> {
        let descriptor = self.require(tool)?;
        let mut errors = Vec::new();

        // Check required parameters are present
        for param_def in &descriptor.params {
            if param_def.is_required() && !params.contains_key(&param_def.name) {
                errors.push(format!("Missing required parameter: {}", param_def.name));
            }
        }

        // Validate types of provided parameters
        for (key, value) in params {
            if let Some(param_def) = descriptor.param_def(key) {
                if let Err(e) = param_def.param_type.validate(value) {
                    errors.push(format!("Parameter '{}': {}", key, e));
                }
            } else {
                errors.push(format!("Unknown parameter: {}", key));
            }
        }

        Ok(errors)
    }

    /// Fill in default values for missing optional parameters.
    pub fn fill_defaults(&self, tool: &str, params: &mut ToolParams) -> crate::types::Result<()> {
        let descriptor = self.require(tool)?;
        fill_defaults(descriptor, params);
        Ok(())
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Insert declared defaults for parameters the caller left out.
pub(crate) fn fill_defaults(descriptor: &ToolDescriptor, params: &mut ToolParams) {
    for param_def in &descriptor.params {
        if !params.contains_key(&param_def.name) {
            if let Some(default) = &param_def.default {
                params.insert(param_def.name.clone(), default.clone());
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ToolParams {
        value.as_object().cloned().unwrap()
    }

    fn sample_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("get_table_information", "Describe one table")
            .param(ParamDef::required("table_name", ParamType::String, "Table name"))
            .param(ParamDef::with_default(
                "schema_name",
                ParamType::String,
                "Schema name",
                json!("default"),
            ))
            .param(ParamDef::optional("limit", ParamType::Int, "Row limit"))
            .depends_on("discover_databases")
    }

    #[test]
    fn test_register_and_get() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_descriptor()).unwrap();

        assert!(catalog.has_tool("get_table_information"));
        assert!(!catalog.has_tool("nonexistent"));
        assert_eq!(catalog.len(), 1);
        assert!(matches!(
            catalog.require("nonexistent"),
            Err(Error::UnknownTool(_))
        ));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_descriptor()).unwrap();
        assert!(matches!(
            catalog.register(sample_descriptor()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_register_empty_name_fails() {
        let mut catalog = ToolCatalog::new();
        assert!(catalog.register(ToolDescriptor::new("", "nameless")).is_err());
    }

    #[test]
    fn test_key_rule_must_use_declared_params() {
        let mut catalog = ToolCatalog::new();
        let descriptor = ToolDescriptor::new("get_database_by_name", "Lookup")
            .cached(KeyRule::Database { db: "db_name".into() });
        assert!(matches!(
            catalog.register(descriptor),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_required_and_optional_params() {
        let descriptor = sample_descriptor();
        assert_eq!(
            descriptor.required_params().into_iter().collect::<Vec<_>>(),
            vec!["table_name"]
        );
        let optional = descriptor.optional_params();
        assert_eq!(optional.get("schema_name"), Some(&Some(&json!("default"))));
        assert_eq!(optional.get("limit"), Some(&None));
    }

    #[test]
    fn test_validate_params_valid() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_descriptor()).unwrap();

        let errors = catalog
            .validate_params("get_table_information", &params(json!({"table_name": "Invoices"})))
            .unwrap();
        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_validate_params_reports_every_problem() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_descriptor()).unwrap();

        let errors = catalog
            .validate_params(
                "get_table_information",
                &params(json!({"limit": "ten", "bogus": true})),
            )
            .unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("Missing required parameter: table_name")));
        assert!(errors.iter().any(|e| e.contains("expected integer")));
        assert!(errors.iter().any(|e| e.contains("Unknown parameter: bogus")));
    }

    #[test]
    fn test_fill_defaults_no_overwrite() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_descriptor()).unwrap();

        let mut filled = params(json!({"table_name": "Invoices"}));
        catalog.fill_defaults("get_table_information", &mut filled).unwrap();
        assert_eq!(filled["schema_name"], "default");
        assert!(!filled.contains_key("limit"));

        let mut explicit = params(json!({"table_name": "Invoices", "schema_name": "ops"}));
        catalog.fill_defaults("get_table_information", &mut explicit).unwrap();
        assert_eq!(explicit["schema_name"], "ops");
    }

    #[test]
    fn test_summary_line_format() {
        assert_eq!(
            sample_descriptor().summary_line(),
            "- get_table_information(table_name: string, schema_name?: string, limit?: integer?) \
             <- discover_databases: Describe one table"
        );
    }

    #[test]
    fn test_param_type_enum_validation() {
        let pt = ParamType::Enum(vec!["asc".to_string(), "desc".to_string()]);
        assert!(pt.validate(&json!("asc")).is_ok());
        assert!(pt.validate(&json!("bad")).is_err());
        assert!(pt.validate(&json!(42)).is_err());
    }

    #[test]
    fn test_param_type_string_list_validation() {
        let pt = ParamType::StringList;
        assert!(pt.validate(&json!(["a", "b"])).is_ok());
        assert!(pt.validate(&json!([1, 2])).is_err());
        assert!(pt.validate(&json!("not array")).is_err());
    }
}
