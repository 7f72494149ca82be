//! External collaborators the orchestrator drives.
//!
//! The engine never executes tools itself: a [`ToolRunner`] does, a
//! [`Validator`] checks final parameters and a [`ParameterRepair`] proposes
//! revised ones. All three are injected as trait objects.

use crate::tools::ToolRegistry;
use crate::types::{ToolOutput, ToolParams};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a [`ToolRunner`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RunnerError {
    pub message: String,
}

impl RunnerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes one tool call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, tool: &str, params: &ToolParams) -> Result<ToolOutput, RunnerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Checks the final tool's parameters. Must be pure.
#[cfg_attr(test, mockall::automock)]
pub trait Validator: Send + Sync {
    fn validate(&self, tool: &str, params: &ToolParams) -> Validation;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Revised(ToolParams),
    Declined(String),
}

/// Proposes corrected parameters after a validation failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParameterRepair: Send + Sync {
    async fn repair(&self, tool: &str, params: &ToolParams, reason: &str) -> RepairOutcome;
}

/// Repair that always declines. Used when no repair capability is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepair;

#[async_trait]
impl ParameterRepair for NoRepair {
    async fn repair(&self, tool: &str, _params: &ToolParams, _reason: &str) -> RepairOutcome {
        RepairOutcome::Declined(format!("no repair available for '{}'", tool))
    }
}

/// Validator backed by the declared parameter schemas.
#[derive(Debug, Clone)]
pub struct CatalogValidator {
    registry: Arc<ToolRegistry>,
}

impl CatalogValidator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

impl Validator for CatalogValidator {
    fn validate(&self, tool: &str, params: &ToolParams) -> Validation {
        match self.registry.catalog().validate_params(tool, params) {
            Ok(errors) if errors.is_empty() => Validation::Valid,
            Ok(errors) => Validation::Invalid(errors.join("; ")),
            Err(e) => Validation::Invalid(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ddr;
    use serde_json::json;

    fn validator() -> CatalogValidator {
        CatalogValidator::new(Arc::new(ddr::registry().unwrap()))
    }

    #[test]
    fn test_catalog_validator_accepts_declared_params() {
        let params = json!({"db_name": "Sales", "db_path": "/ddr/Sales.xml"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(validator()
            .validate(ddr::GET_SCRIPT_INFORMATION, &params)
            .is_valid());
    }

    #[test]
    fn test_catalog_validator_reports_problems() {
        let params = json!({"db_name": 5}).as_object().cloned().unwrap();
        match validator().validate(ddr::GET_SCRIPT_INFORMATION, &params) {
            Validation::Invalid(reason) => {
                assert!(reason.contains("Missing required parameter: db_path"));
                assert!(reason.contains("expected string"));
            }
            Validation::Valid => panic!("expected invalid"),
        }
    }

    #[test]
    fn test_catalog_validator_unknown_tool() {
        assert_eq!(
            validator().validate("nope", &ToolParams::new()),
            Validation::Invalid("unknown tool: nope".into())
        );
    }

    #[tokio::test]
    async fn test_no_repair_declines() {
        let outcome = NoRepair.repair("read_chunk", &ToolParams::new(), "bad").await;
        assert!(matches!(outcome, RepairOutcome::Declined(_)));
    }
}
