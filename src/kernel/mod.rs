//! Kernel - planning and execution of tool requests.
//!
//! The resolver turns a request into an execution plan against the shared
//! cache; the orchestrator drives that plan through the external
//! collaborators. Single-flight state lives with the orchestrator so that
//! concurrent runs for the same call execute it once.

pub mod collaborators;
pub mod flight;
pub mod orchestrator;
pub mod resolver;

pub use collaborators::{
    CatalogValidator, NoRepair, ParameterRepair, RepairOutcome, RunnerError, ToolRunner,
    Validation, Validator,
};
pub use flight::FlightGroup;
pub use orchestrator::{
    OrchestrationOutcome, OrchestrationState, Orchestrator, StepOrigin, StepProvenance,
};
pub use resolver::{DependencyResolver, ExecutionPlan, PlanStep, StepSource};
