use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use router_executor::{ExecutionResult, ScriptedExecutor};
use router_planner::{PlanContext, Planner};
use router_policy::{PolicyDocument, PolicyService};
use router_registry::RegistryService;
use router_trace_store::{TraceStore, TraceStoreConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use telemetry::MetricsRegistry;

const TOOL_YAML: &str = r#"
id: fast
name: Fast Search
version: "1.0.0"
capabilities:
  - name: patient.search
cost_estimate: 0.1
sla:
  p95_ms: 200
  success_rate_min: 0.99
endpoint:
  type: http
  url: https://fast.example
  timeout_ms: 1000
"#;

fn build_planner(dir: &std::path::Path) -> Planner {
    std::fs::write(dir.join("fast.yaml"), TOOL_YAML).unwrap();
    let registry = RegistryService::load(dir).unwrap();
    let policy = Arc::new(PolicyService::new(PolicyDocument {
        schema_version: "1.0".into(),
        default: None,
        tenants: HashMap::new(),
    }));
    let executor = Arc::new(ScriptedExecutor::new());
    executor.script("fast", ExecutionResult::Success { latency_ms: 5, output: None }, Duration::ZERO);
    Planner::new(
        registry,
        policy,
        executor,
        Arc::new(TraceStore::new(TraceStoreConfig::default())),
        Arc::new(MetricsRegistry::new()),
    )
}

fn bench_plan(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("planner_plan_single_candidate", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let planner = build_planner(dir.path());
                (dir, planner)
            },
            |(_dir, planner)| {
                rt.block_on(planner.plan(PlanContext::new("patient.search", json!({}))));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
