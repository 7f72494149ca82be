//! Request orchestration - plan, execute prerequisites, validate, repair,
//! run the requested tool.
//!
//! The Orchestrator:
//!   - Plans against the shared cache before anything runs
//!   - Executes must-run prerequisites in order, writing each to cache
//!   - Validates and repairs the final parameters within a bounded budget
//!   - Runs the requested tool under single-flight
//!
//! State machine:
//! ```text
//! PLANNING -> EXECUTING -> VALIDATING -> (REPAIRING <-> VALIDATING) -> RUNNING_FINAL -> DONE
//!     \____________\______________\______________\__________________\-> ERROR
//! ```
//!
//! A cached final step skips EXECUTING but is still validated; it is served
//! from cache unless repair moved it to a different key.

use super::collaborators::{
    CatalogValidator, NoRepair, ParameterRepair, RepairOutcome, RunnerError, ToolRunner,
    Validation, Validator,
};
use super::flight::FlightGroup;
use super::resolver::{DependencyResolver, ExecutionPlan, PlanStep};
use crate::cache::{CacheHierarchy, CacheKey};
use crate::tools::{ToolDescriptor, ToolRegistry};
use crate::types::{Error, OrchestratorConfig, RequestId, Result, ToolOutput, ToolParams};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

// =============================================================================
// Outcome types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    Planning,
    Executing,
    Validating,
    Repairing,
    RunningFinal,
    Done,
    Error,
}

/// Where a step's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOrigin {
    /// Served from a valid cache entry at planning time.
    Cached,
    /// Executed by this run.
    Executed,
    /// Written by a concurrent run while this one waited.
    Joined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProvenance {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub origin: StepOrigin,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOutcome {
    pub request_id: RequestId,
    pub tool: String,
    pub output: ToolOutput,
    /// Parameters the requested tool ran (or was cached) with.
    pub params: ToolParams,
    pub provenance: Vec<StepProvenance>,
    pub repair_attempts: u32,
    pub cache_writes: usize,
    pub trace: Vec<OrchestrationState>,
}

impl OrchestrationOutcome {
    /// Number of steps this run executed itself.
    pub fn executed_steps(&self) -> usize {
        self.provenance
            .iter()
            .filter(|p| p.origin == StepOrigin::Executed)
            .count()
    }
}

// =============================================================================
// Run bookkeeping
// =============================================================================

struct RunState<'a> {
    tool: &'a str,
    cancel: &'a CancellationToken,
    trace: Vec<OrchestrationState>,
    provenance: Vec<StepProvenance>,
    outputs: HashMap<String, ToolOutput>,
    completed_steps: usize,
    cache_writes: usize,
    repair_attempts: u32,
}

impl<'a> RunState<'a> {
    fn new(tool: &'a str, cancel: &'a CancellationToken) -> Self {
        Self {
            tool,
            cancel,
            trace: Vec::new(),
            provenance: Vec::new(),
            outputs: HashMap::new(),
            completed_steps: 0,
            cache_writes: 0,
            repair_attempts: 0,
        }
    }

    fn enter(&mut self, state: OrchestrationState) {
        debug!(?state, "state transition");
        self.trace.push(state);
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(
                completed_steps = self.completed_steps,
                cache_writes = self.cache_writes,
                "orchestration cancelled"
            );
            return Err(Error::Cancelled {
                tool: self.tool.to_string(),
                completed_steps: self.completed_steps,
                cache_writes: self.cache_writes,
            });
        }
        Ok(())
    }

    fn record(&mut self, tool: &str, key: Option<&CacheKey>, origin: StepOrigin, output: ToolOutput) {
        self.provenance.push(StepProvenance {
            tool: tool.to_string(),
            cache_key: key.map(|k| k.to_string()),
            origin,
        });
        self.outputs.insert(tool.to_string(), output);
    }
}

/// Output of one executed-or-joined call.
struct StepRun {
    output: ToolOutput,
    origin: StepOrigin,
    key: Option<CacheKey>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives requests through planning, execution and repair.
///
/// Share one instance (behind an `Arc`) between concurrent requests so they
/// share single-flight state as well as the cache.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    cache: Arc<CacheHierarchy>,
    resolver: DependencyResolver,
    runner: Arc<dyn ToolRunner>,
    validator: Arc<dyn Validator>,
    repair: Arc<dyn ParameterRepair>,
    flights: FlightGroup,
    config: OrchestratorConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tools", &self.registry.catalog().len())
            .field("flights", &self.flights)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with the schema validator and no repair capability.
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<CacheHierarchy>,
        runner: Arc<dyn ToolRunner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(registry.clone(), cache.clone()),
            validator: Arc::new(CatalogValidator::new(registry.clone())),
            repair: Arc::new(NoRepair),
            flights: FlightGroup::new(),
            registry,
            cache,
            runner,
            config,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_repair(mut self, repair: Arc<dyn ParameterRepair>) -> Self {
        self.repair = repair;
        self
    }

    pub fn cache(&self) -> &Arc<CacheHierarchy> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dry run: the plan a request would follow right now.
    pub async fn plan(&self, tool: &str, args: &ToolParams) -> Result<ExecutionPlan> {
        self.resolver.plan(tool, args).await
    }

    pub async fn orchestrate(&self, tool: &str, args: &ToolParams) -> Result<OrchestrationOutcome> {
        self.orchestrate_with_cancel(tool, args, &CancellationToken::new())
            .await
    }

    /// Run a request; `cancel` stops it between steps. Cache writes that
    /// already happened are kept.
    pub async fn orchestrate_with_cancel(
        &self,
        tool: &str,
        args: &ToolParams,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutcome> {
        let request_id = RequestId::new();
        let span = info_span!("orchestrate", request_id = %request_id, tool = %tool);

        async move {
            let mut run = RunState::new(tool, cancel);
            match self.drive(&mut run, args).await {
                Ok((output, params)) => {
                    run.enter(OrchestrationState::Done);
                    info!(
                        steps = run.provenance.len(),
                        cache_writes = run.cache_writes,
                        repair_attempts = run.repair_attempts,
                        "orchestration complete"
                    );
                    Ok(OrchestrationOutcome {
                        request_id,
                        tool: tool.to_string(),
                        output,
                        params,
                        provenance: run.provenance,
                        repair_attempts: run.repair_attempts,
                        cache_writes: run.cache_writes,
                        trace: run.trace,
                    })
                }
                Err(e) => {
                    run.enter(OrchestrationState::Error);
                    warn!(kind = e.kind(), trace = ?run.trace, error = %e, "orchestration failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut RunState<'_>, args: &ToolParams) -> Result<(ToolOutput, ToolParams)> {
        run.enter(OrchestrationState::Planning);
        run.check_cancel()?;
        let plan = self.resolver.plan(run.tool, args).await?;
        let Some((last, prerequisites)) = plan.steps.split_last() else {
            return Err(Error::configuration(format!("empty plan for '{}'", run.tool)));
        };

        let final_index = plan.steps.len() - 1;

        if let Some(output) = last.cached_output.as_ref().filter(|_| last.is_cached()) {
            let mut params = last.params.clone();
            self.validate_and_repair(run, &mut params).await?;

            // Repaired params may address a different entry.
            let descriptor = self.registry.descriptor(&last.tool)?;
            if self.cache.key_for(descriptor, &params)? == last.cache_key {
                debug!("served from cache");
                run.record(&last.tool, last.cache_key.as_ref(), StepOrigin::Cached, output.clone());
                return Ok((output.clone(), params));
            }
            return self.run_final(run, final_index, last, params).await;
        }

        run.enter(OrchestrationState::Executing);
        for (index, step) in prerequisites.iter().enumerate() {
            run.check_cancel()?;
            match &step.cached_output {
                Some(output) if step.is_cached() => {
                    run.record(&step.tool, step.cache_key.as_ref(), StepOrigin::Cached, output.clone());
                }
                _ => {
                    let params = self.bind_deferred(step, &run.outputs)?;
                    let result = self.run_step(run, index, step, &params).await?;
                    run.record(&step.tool, result.key.as_ref(), result.origin, result.output);
                }
            }
            run.completed_steps += 1;
        }

        let mut params = self.bind_deferred(last, &run.outputs)?;
        self.validate_and_repair(run, &mut params).await?;
        self.run_final(run, final_index, last, params).await
    }

    async fn run_final(
        &self,
        run: &mut RunState<'_>,
        index: usize,
        last: &PlanStep,
        params: ToolParams,
    ) -> Result<(ToolOutput, ToolParams)> {
        run.check_cancel()?;
        run.enter(OrchestrationState::RunningFinal);
        let result = self.run_step(run, index, last, &params).await?;
        run.completed_steps += 1;
        let output = result.output.clone();
        run.record(&last.tool, result.key.as_ref(), result.origin, result.output);
        Ok((output, params))
    }

    /// Validate `params`, repairing them until valid or out of budget.
    async fn validate_and_repair(&self, run: &mut RunState<'_>, params: &mut ToolParams) -> Result<()> {
        let max_attempts = self.config.max_repair_attempts;
        loop {
            run.enter(OrchestrationState::Validating);
            let reason = match self.validator.validate(run.tool, params) {
                Validation::Valid => return Ok(()),
                Validation::Invalid(reason) => reason,
            };

            if run.repair_attempts >= max_attempts {
                return Err(Error::ValidationExhausted {
                    tool: run.tool.to_string(),
                    reason,
                    params: params.clone(),
                    attempts: run.repair_attempts,
                });
            }

            run.check_cancel()?;
            run.enter(OrchestrationState::Repairing);
            run.repair_attempts += 1;
            warn!(attempt = run.repair_attempts, %reason, "repairing parameters");

            match self.repair.repair(run.tool, params, &reason).await {
                RepairOutcome::Declined(why) => {
                    return Err(Error::RepairStalled {
                        tool: run.tool.to_string(),
                        reason: why,
                        params: params.clone(),
                        declined: true,
                    });
                }
                RepairOutcome::Revised(revised) if revised == *params => {
                    return Err(Error::RepairStalled {
                        tool: run.tool.to_string(),
                        reason: format!("repair returned unchanged parameters ({})", reason),
                        params: revised,
                        declined: false,
                    });
                }
                RepairOutcome::Revised(revised) => *params = revised,
            }
        }
    }

    /// Plan-time parameters plus any deferred bindings, now derivable.
    fn bind_deferred(&self, step: &PlanStep, outputs: &HashMap<String, ToolOutput>) -> Result<ToolParams> {
        if step.deferred.is_empty() {
            return Ok(step.params.clone());
        }
        let descriptor = self.registry.descriptor(&step.tool)?;
        self.cache
            .resolve_missing_params(descriptor, &step.params, outputs)
    }

    /// Execute one call under single-flight and write it to the cache.
    async fn run_step(
        &self,
        run: &mut RunState<'_>,
        index: usize,
        step: &PlanStep,
        params: &ToolParams,
    ) -> Result<StepRun> {
        let descriptor = self.registry.descriptor(&step.tool)?;
        let Some(key) = self.cache.key_for(descriptor, params)? else {
            let output = self.execute(run, index, descriptor, params).await?;
            return Ok(StepRun {
                output,
                origin: StepOrigin::Executed,
                key: None,
            });
        };

        let observed = if step.cache_key.as_ref() == Some(&key) {
            step.observed_generation
        } else {
            self.cache.generation_of(&key).await
        };

        let flight = self.flights.acquire(&descriptor.name, key.as_str()).await;
        if let Some(entry) = self.cache.lookup_key(&key).await {
            if Some(entry.generation) != observed {
                flight.release().await;
                debug!(tool = %descriptor.name, key = %key, "joined in-flight result");
                return Ok(StepRun {
                    output: entry.value,
                    origin: StepOrigin::Joined,
                    key: Some(key),
                });
            }
        }

        let result = self.execute(run, index, descriptor, params).await;
        let stored = match result {
            Ok(output) => {
                self.cache.store_key(&key, output.clone()).await;
                run.cache_writes += 1;
                Ok(output)
            }
            Err(e) => Err(e),
        };
        flight.release().await;

        Ok(StepRun {
            output: stored?,
            origin: StepOrigin::Executed,
            key: Some(key),
        })
    }

    async fn execute(
        &self,
        run: &RunState<'_>,
        index: usize,
        descriptor: &ToolDescriptor,
        params: &ToolParams,
    ) -> Result<ToolOutput> {
        let started = std::time::Instant::now();
        match self.runner.execute(&descriptor.name, params).await {
            Ok(output) => {
                info!(
                    tool = %descriptor.name,
                    step = index,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "executed tool"
                );
                Ok(output)
            }
            Err(RunnerError { message }) => Err(Error::Execution {
                tool: descriptor.name.clone(),
                step: index,
                cache_writes: run.cache_writes,
                reason: message,
            }),
        }
    }
}
