//! Values exchanged with tools: call parameters and opaque outputs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool call parameters, keyed by parameter name (sorted, so equal maps compare equal).
pub type ToolParams = Map<String, Value>;

/// Result of a tool execution, treated as an atomic value by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolOutput(Value);

impl ToolOutput {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Read the output as a typed record.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
