//! Core types for the orchestration engine.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (RequestId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for cache, orchestrator and logging
//! - **Values**: Tool parameters and outputs

mod config;
mod errors;
mod ids;
mod values;

pub use config::{CacheConfig, Config, ObservabilityConfig, OrchestratorConfig};
pub use errors::{Error, Result};
pub use ids::RequestId;
pub use values::{ToolOutput, ToolParams};
