//! Execution planning.
//!
//! Walks the requested tool's prerequisites in topological order, binds
//! each tool's parameters and decides whether it can be served from cache.
//! Planning never calls a tool; every failure surfaces before execution.

use crate::cache::hierarchy::bind_derivations;
use crate::cache::{CacheHierarchy, CacheKey, DeferredParam};
use crate::tools::catalog::fill_defaults;
use crate::tools::ToolRegistry;
use crate::types::{Result, ToolOutput, ToolParams};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// Valid entry found and every prerequisite is cached too.
    Cached,
    /// Must be executed during this run.
    MustRun,
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepSource::Cached => f.write_str("cached"),
            StepSource::MustRun => f.write_str("must_run"),
        }
    }
}

/// One tool call in a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub tool: String,
    /// Parameters bound at planning time.
    pub params: ToolParams,
    /// Parameters to derive from earlier step outputs before executing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<DeferredParam>,
    pub source: StepSource,
    pub cache_key: Option<CacheKey>,
    /// Generation stored under `cache_key` when the plan was made.
    pub observed_generation: Option<u64>,
    /// Value served for cached steps.
    #[serde(skip)]
    pub cached_output: Option<ToolOutput>,
}

impl PlanStep {
    pub fn is_cached(&self) -> bool {
        self.source == StepSource::Cached
    }
}

/// Ordered steps ending with the requested tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub tool: String,
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn final_step(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    pub fn must_run_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_cached()).count()
    }

    /// True when the requested tool is served entirely from cache.
    pub fn is_fully_cached(&self) -> bool {
        self.must_run_count() == 0
    }

    /// `(tool, source)` pairs in step order.
    pub fn sources(&self) -> Vec<(&str, StepSource)> {
        self.steps
            .iter()
            .map(|s| (s.tool.as_str(), s.source))
            .collect()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, "{}. {} [{}]", i + 1, step.tool, step.source)?;
            if let Some(key) = &step.cache_key {
                write!(f, " key={}", key)?;
            }
            for d in &step.deferred {
                write!(f, " {}<-{}", d.param, d.source)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Builds [`ExecutionPlan`]s against the shared cache.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    registry: Arc<ToolRegistry>,
    cache: Arc<CacheHierarchy>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<ToolRegistry>, cache: Arc<CacheHierarchy>) -> Self {
        Self { registry, cache }
    }

    /// Plan a call of `tool` with the caller's `args`.
    ///
    /// The final tool receives every argument; a prerequisite receives only
    /// the arguments whose names it declares.
    pub async fn plan(&self, tool: &str, args: &ToolParams) -> Result<ExecutionPlan> {
        let graph = self.registry.graph();
        let order = graph.topological_order(tool)?;

        let mut planned: HashMap<&str, PlanStep> = HashMap::new();
        let mut available: HashMap<String, ToolOutput> = HashMap::new();
        let mut pending: HashSet<String> = HashSet::new();

        for name in &order {
            let descriptor = self.registry.descriptor(name)?;
            let mut params: ToolParams = if name == tool {
                args.clone()
            } else {
                args.iter()
                    .filter(|(k, _)| descriptor.declares(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };
            fill_defaults(descriptor, &mut params);
            let deferred = bind_derivations(descriptor, &mut params, &available, &pending)?;

            let cache_key = match self.cache.key_for(descriptor, &params) {
                Ok(key) => key,
                Err(_) if !deferred.is_empty() => None,
                Err(e) => return Err(e),
            };

            let deps_cached = descriptor.dependencies.iter().all(|dep| {
                planned
                    .get(dep.as_str())
                    .is_some_and(PlanStep::is_cached)
            });

            let mut observed_generation = None;
            let mut cached_output = None;
            if let Some(key) = &cache_key {
                observed_generation = self.cache.generation_of(key).await;
                if deps_cached && deferred.is_empty() {
                    if let Some(entry) = self.cache.lookup_key(key).await {
                        observed_generation = Some(entry.generation);
                        cached_output = Some(entry.value);
                    }
                }
            }

            let source = match &cached_output {
                Some(output) => {
                    available.insert(name.clone(), output.clone());
                    StepSource::Cached
                }
                None => {
                    pending.insert(name.clone());
                    StepSource::MustRun
                }
            };
            debug!(tool = %name, %source, deferred = deferred.len(), "planned step");

            planned.insert(
                name.as_str(),
                PlanStep {
                    tool: name.clone(),
                    params,
                    deferred,
                    source,
                    cache_key,
                    observed_generation,
                    cached_output,
                },
            );
        }

        // Keep the final tool, and the prerequisites of every kept tool that
        // must run.
        let mut needed: HashSet<&str> = HashSet::from([tool]);
        for name in order.iter().rev() {
            if !needed.contains(name.as_str()) {
                continue;
            }
            if planned.get(name.as_str()).is_some_and(|step| !step.is_cached()) {
                for dep in graph.dependencies_of(name)? {
                    needed.insert(dep.as_str());
                }
            }
        }

        let steps = order
            .iter()
            .filter(|name| needed.contains(name.as_str()))
            .filter_map(|name| planned.remove(name.as_str()))
            .collect();

        Ok(ExecutionPlan {
            tool: tool.to_string(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeyRule;
    use crate::tools::{ddr, ParamDef, ParamType, ToolCatalog, ToolDescriptor};
    use crate::types::{CacheConfig, Error};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn params(value: Value) -> ToolParams {
        value.as_object().cloned().unwrap()
    }

    /// `A: []`, `B: [A]`, `C: [A, B]`, each cached under its own singleton.
    fn abc() -> (DependencyResolver, Arc<CacheHierarchy>, Arc<ToolRegistry>) {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(ToolDescriptor::new("A", "a").cached(KeyRule::Singleton("a".into())))
            .unwrap();
        catalog
            .register(
                ToolDescriptor::new("B", "b")
                    .depends_on("A")
                    .cached(KeyRule::Singleton("b".into())),
            )
            .unwrap();
        catalog
            .register(
                ToolDescriptor::new("C", "c")
                    .depends_on("A")
                    .depends_on("B")
                    .cached(KeyRule::Singleton("c".into())),
            )
            .unwrap();
        let registry = Arc::new(ToolRegistry::new(catalog).unwrap());
        let cache = Arc::new(CacheHierarchy::new(CacheConfig::default()));
        (
            DependencyResolver::new(registry.clone(), cache.clone()),
            cache,
            registry,
        )
    }

    async fn store(cache: &CacheHierarchy, registry: &ToolRegistry, tool: &str) {
        cache
            .store(
                registry.descriptor(tool).unwrap(),
                &ToolParams::new(),
                ToolOutput::new(json!(tool)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_abc_scenario() {
        use StepSource::{Cached, MustRun};
        let (resolver, cache, registry) = abc();
        let none = ToolParams::new();

        let plan = resolver.plan("C", &none).await.unwrap();
        assert_eq!(plan.sources(), vec![("A", MustRun), ("B", MustRun), ("C", MustRun)]);

        for tool in ["A", "B", "C"] {
            store(&cache, &registry, tool).await;
        }
        assert_eq!(resolver.plan("B", &none).await.unwrap().sources(), vec![("B", Cached)]);
        let plan = resolver.plan("C", &none).await.unwrap();
        assert_eq!(plan.sources(), vec![("C", Cached)]);
        assert!(plan.is_fully_cached());
        assert_eq!(plan.final_step().unwrap().cached_output, Some(ToolOutput::new(json!("C"))));

        cache
            .invalidate(registry.descriptor("A").unwrap(), &none)
            .await
            .unwrap();
        let plan = resolver.plan("C", &none).await.unwrap();
        assert_eq!(plan.sources(), vec![("A", MustRun), ("B", MustRun), ("C", MustRun)]);
    }

    #[tokio::test]
    async fn test_cached_prerequisite_of_must_run_is_emitted() {
        use StepSource::{Cached, MustRun};
        let (resolver, cache, registry) = abc();
        store(&cache, &registry, "A").await;

        let plan = resolver.plan("C", &ToolParams::new()).await.unwrap();
        assert_eq!(plan.sources(), vec![("A", Cached), ("B", MustRun), ("C", MustRun)]);
        assert_eq!(plan.must_run_count(), 2);
    }

    #[tokio::test]
    async fn test_observed_generation_recorded() {
        let (resolver, cache, registry) = abc();
        store(&cache, &registry, "A").await;
        store(&cache, &registry, "A").await;

        let plan = resolver.plan("A", &ToolParams::new()).await.unwrap();
        assert_eq!(plan.steps[0].observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (resolver, _, _) = abc();
        assert!(matches!(
            resolver.plan("Z", &ToolParams::new()).await,
            Err(Error::UnknownTool(_))
        ));
    }

    fn ddr_resolver() -> (DependencyResolver, Arc<CacheHierarchy>, Arc<ToolRegistry>) {
        let registry = Arc::new(ddr::registry().unwrap());
        let cache = Arc::new(CacheHierarchy::new(CacheConfig::default()));
        (
            DependencyResolver::new(registry.clone(), cache.clone()),
            cache,
            registry,
        )
    }

    #[tokio::test]
    async fn test_prerequisites_get_only_declared_args() {
        let (resolver, _, _) = ddr_resolver();
        let plan = resolver
            .plan(
                ddr::GET_TABLE_INFORMATION,
                &params(json!({"db_name": "Sales", "table_name": "Invoices"})),
            )
            .await
            .unwrap();

        assert_eq!(
            plan.steps.iter().map(|s| s.tool.as_str()).collect::<Vec<_>>(),
            vec![
                ddr::DISCOVER_DATABASES,
                ddr::GET_SCHEMA_INFORMATION,
                ddr::GET_TABLE_INFORMATION
            ]
        );
        assert!(plan.steps[0].params.is_empty());
        let schema = &plan.steps[1];
        assert_eq!(
            schema.params,
            params(json!({"db_name": "Sales", "schema_name": "default"}))
        );
        assert_eq!(
            schema.deferred,
            vec![DeferredParam {
                param: "db_path".into(),
                source: ddr::DISCOVER_DATABASES.into(),
            }]
        );
        assert_eq!(
            plan.steps[2].cache_key.as_ref().map(CacheKey::as_str),
            Some("db:Sales:schema:default:table:Invoices")
        );
    }

    #[tokio::test]
    async fn test_cached_source_derives_at_planning_time() {
        let (resolver, cache, registry) = ddr_resolver();
        cache
            .store(
                registry.descriptor(ddr::DISCOVER_DATABASES).unwrap(),
                &ToolParams::new(),
                ToolOutput::new(json!({"databases": [{"name": "Sales", "path": "/ddr/Sales.xml"}]})),
            )
            .await
            .unwrap();

        let plan = resolver
            .plan(ddr::GET_SCRIPT_INFORMATION, &params(json!({"db_name": "Sales"})))
            .await
            .unwrap();
        let last = plan.final_step().unwrap();
        assert_eq!(last.params["db_path"], "/ddr/Sales.xml");
        assert!(last.deferred.is_empty());
        assert_eq!(
            plan.sources(),
            vec![
                (ddr::DISCOVER_DATABASES, StepSource::Cached),
                (ddr::GET_SCRIPT_INFORMATION, StepSource::MustRun)
            ]
        );
    }

    #[tokio::test]
    async fn test_ambiguous_database_is_unresolvable() {
        let (resolver, cache, registry) = ddr_resolver();
        cache
            .store(
                registry.descriptor(ddr::DISCOVER_DATABASES).unwrap(),
                &ToolParams::new(),
                ToolOutput::new(json!({"databases": [
                    {"name": "Ops", "path": "/a/Ops.xml"},
                    {"name": "Ops", "path": "/b/Ops.xml"},
                ]})),
            )
            .await
            .unwrap();

        let err = resolver
            .plan(ddr::GET_CUSTOM_FUNCTIONS, &params(json!({"db_name": "Ops"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvableParameter { ref param, ref reason, .. }
                if param == "db_path" && reason.contains("ambiguous")
        ));
    }

    #[tokio::test]
    async fn test_missing_required_param_fails_before_execution() {
        let (resolver, _, _) = ddr_resolver();
        let err = resolver
            .plan(ddr::GET_TABLE_INFORMATION, &params(json!({"db_name": "Sales"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvableParameter { ref param, .. } if param == "table_name"
        ));
    }

    #[tokio::test]
    async fn test_uncached_tool_always_runs() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(
                ToolDescriptor::new("read_chunk", "read")
                    .param(ParamDef::required("chunk_path", ParamType::String, "chunk")),
            )
            .unwrap();
        let registry = Arc::new(ToolRegistry::new(catalog).unwrap());
        let cache = Arc::new(CacheHierarchy::new(CacheConfig::default()));
        let resolver = DependencyResolver::new(registry, cache);

        let plan = resolver
            .plan("read_chunk", &params(json!({"chunk_path": "/tmp/c"})))
            .await
            .unwrap();
        assert_eq!(plan.sources(), vec![("read_chunk", StepSource::MustRun)]);
        assert!(plan.steps[0].cache_key.is_none());
    }

    #[tokio::test]
    async fn test_plan_display_lists_steps() {
        let (resolver, _, _) = ddr_resolver();
        let plan = resolver
            .plan(ddr::GET_SCRIPT_INFORMATION, &params(json!({"db_name": "Sales"})))
            .await
            .unwrap();
        let rendered = plan.to_string();
        assert!(rendered.contains("1. discover_databases [must_run] key=db-list"));
        assert!(rendered.contains("2. get_script_information [must_run] key=db:Sales db_path<-discover_databases"));
    }
}
