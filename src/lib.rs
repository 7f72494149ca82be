//! # fmq-orchestrator - Dependency-Aware Tool Orchestration
//!
//! Fronts a static set of inspector tools (FileMaker DDR exports) with:
//! - A declared dependency graph validated at startup (no cycles, no
//!   undeclared prerequisites)
//! - A hierarchical TTL cache keyed `db:{db}:schema:{schema}:table:{table}`
//!   with prefix invalidation and JSON persistence per level
//! - A resolver that plans only the steps whose results are not cached
//! - An orchestrator that runs the plan, validates and repairs the final
//!   parameters, and executes each call at most once across concurrent runs
//!
//! ## Architecture
//!
//! ```text
//!   request ─→ ┌──────────────┐ plan ┌────────────────────┐
//!              │ Orchestrator │ ───→ │ DependencyResolver │
//!              └──────┬───────┘      └─────────┬──────────┘
//!                     │ run / validate / repair │ lookup
//!                     ▼                         ▼
//!        ToolRunner, Validator,         ┌────────────────┐
//!        ParameterRepair  ── write ───→ │ CacheHierarchy │
//!                                       └────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod kernel;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
