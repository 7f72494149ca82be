//! Planning throughput benchmark.
//!
//! Measures topological ordering over chains of increasing depth and full
//! plan construction for the DDR tools against cold and warm caches.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fmq_orchestrator::cache::CacheHierarchy;
use fmq_orchestrator::kernel::DependencyResolver;
use fmq_orchestrator::tools::{ddr, DependencyGraph, ToolDescriptor};
use fmq_orchestrator::types::{CacheConfig, ToolOutput, ToolParams};
use serde_json::json;
use std::sync::Arc;

fn chain(depth: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in 0..depth {
        let mut tool = ToolDescriptor::new(&format!("t{i}"), "bench");
        if i > 0 {
            tool = tool.depends_on(&format!("t{}", i - 1));
        }
        graph.add_tool(&tool).unwrap();
    }
    graph.build().unwrap()
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for &depth in &[4usize, 16, 64, 256] {
        let graph = chain(depth);
        let last = format!("t{}", depth - 1);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &last, |b, tool| {
            b.iter(|| graph.topological_order(black_box(tool)).unwrap());
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = Arc::new(ddr::registry().unwrap());
    let args: ToolParams = json!({"db_name": "Sales", "table_name": "Invoices"})
        .as_object()
        .cloned()
        .unwrap();

    let cold = DependencyResolver::new(
        registry.clone(),
        Arc::new(CacheHierarchy::new(CacheConfig::default())),
    );

    let warm_cache = Arc::new(CacheHierarchy::new(CacheConfig::default()));
    rt.block_on(async {
        warm_cache
            .store(
                registry.descriptor(ddr::DISCOVER_DATABASES).unwrap(),
                &ToolParams::new(),
                ToolOutput::new(json!({"databases": [{"name": "Sales", "path": "/ddr/Sales.xml"}]})),
            )
            .await
            .unwrap();
    });
    let warm = DependencyResolver::new(registry, warm_cache);

    let mut group = c.benchmark_group("plan_table_information");
    group.bench_function("cold", |b| {
        b.iter(|| {
            rt.block_on(cold.plan(ddr::GET_TABLE_INFORMATION, black_box(&args)))
                .unwrap()
        });
    });
    group.bench_function("warm_discovery", |b| {
        b.iter(|| {
            rt.block_on(warm.plan(ddr::GET_TABLE_INFORMATION, black_box(&args)))
                .unwrap()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_topological_order, bench_plan);
criterion_main!(benches);
