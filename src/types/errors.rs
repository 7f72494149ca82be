//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and carry
//! enough context (tool, step, reason) for a caller to act on them.

use serde_json::{Map, Value};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the orchestration engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad static tool or dependency declarations (fatal at startup).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The declared dependency graph contains a cycle (fatal at startup).
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// A request named a tool that is not declared.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A request cannot be planned because a required parameter has no source.
    #[error("cannot resolve parameter '{param}' for tool '{tool}': {reason}")]
    UnresolvableParameter {
        tool: String,
        param: String,
        reason: String,
    },

    /// The external runner failed. Cache writes committed before the failure stay valid.
    #[error("tool '{tool}' failed at step {step} ({cache_writes} cache writes committed): {reason}")]
    Execution {
        tool: String,
        step: usize,
        cache_writes: usize,
        reason: String,
    },

    /// The repair budget ran out while the validator kept rejecting parameters.
    #[error("parameters for '{tool}' still invalid after {attempts} repair attempts: {reason}")]
    ValidationExhausted {
        tool: String,
        reason: String,
        params: Map<String, Value>,
        attempts: u32,
    },

    /// Repair declined, or returned the parameters it was given.
    #[error("repair for '{tool}' made no progress (declined: {declined}): {reason}")]
    RepairStalled {
        tool: String,
        reason: String,
        params: Map<String, Value>,
        declined: bool,
    },

    /// The run was cancelled before it could finish.
    #[error("orchestration of '{tool}' cancelled after {completed_steps} steps ({cache_writes} cache writes kept)")]
    Cancelled {
        tool: String,
        completed_steps: usize,
        cache_writes: usize,
    },

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable snake_case name of the error kind, for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::UnknownTool(_) => "unknown_tool",
            Error::UnresolvableParameter { .. } => "unresolvable_parameter",
            Error::Execution { .. } => "execution",
            Error::ValidationExhausted { .. } => "validation_exhausted",
            Error::RepairStalled { .. } => "repair_stalled",
            Error::Cancelled { .. } => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }

    /// Whether the error comes from the static declarations rather than a request.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::CycleDetected { .. })
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unresolvable(
        tool: impl Into<String>,
        param: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvableParameter {
            tool: tool.into(),
            param: param.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
        assert!(err.is_fatal_at_startup());
        assert_eq!(err.kind(), "cycle_detected");
    }

    #[test]
    fn test_request_errors_are_not_startup_fatal() {
        let err = Error::unresolvable("get_table_information", "table_path", "no source");
        assert!(!err.is_fatal_at_startup());
        assert!(err.to_string().contains("table_path"));
    }
}
