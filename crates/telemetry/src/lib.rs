//! Structured JSON logging init, plus the planner's process-scoped metrics
//! registry. The registry itself has no OTel dependency; the optional `otel`
//! feature adds bridge modules that forward `router_registry`/`router_policy`
//! observer callbacks into OTel instruments.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured logging (JSON) with env filter.
/// Set `RUST_LOG`, e.g. `"info,telemetry=debug"`.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize the OpenTelemetry tracer (feature-gated; no tracing-subscriber
/// layer hookup — traces still flow through `tracing`).
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

/// Returns whether telemetry is initialized (stubbed — logging init is
/// infallible today).
pub fn is_initialized() -> bool {
    true
}

/// Upper bound in milliseconds for each bucket of `planner_execution_latency_ms`.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [50, 100, 200, 400, 800, 1600, 3200, 6400];

/// Fixed-bucket latency histogram. The final implicit bucket is `+Inf`.
#[derive(Debug, Default)]
struct Histogram {
    /// Per-bucket counts, one slot per entry in [`LATENCY_BUCKETS_MS`] plus an
    /// overflow slot for values beyond the last bucket.
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
    sum_ms: u64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value_ms: u64) {
        let slot = LATENCY_BUCKETS_MS.iter().position(|&bound| value_ms <= bound).unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[slot] += 1;
        self.sum_ms += value_ms;
        self.count += 1;
    }
}

/// A snapshot of one labeled histogram's state, for tests and exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_ms: u64,
}

/// Process-scoped collection of the planner's required instruments (spec
/// §4.6): a load gauge, load-error/bid/selection/fallback/trace counters, and
/// a per-tool execution latency histogram. Mirrors the teacher's
/// `Arc<AtomicU64>` style for the scalar instruments and adds label maps,
/// guarded by a single mutex each, for the dimensioned ones.
#[derive(Default)]
pub struct MetricsRegistry {
    tools_loaded: AtomicI64,
    tool_load_errors: AtomicU64,
    trace_created_total: AtomicU64,
    trace_events_total: AtomicU64,
    planner_bids_total: Mutex<HashMap<(String, String), u64>>,
    planner_selection_total: Mutex<HashMap<(String, String), u64>>,
    planner_fallbacks_total: Mutex<HashMap<String, u64>>,
    planner_execution_latency_ms: Mutex<HashMap<String, Histogram>>,
}

impl MetricsRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current number of tools known to the registry.
    pub fn set_tools_loaded(&self, count: i64) {
        self.tools_loaded.store(count, Ordering::Relaxed);
    }

    /// Increment the count of registry reload failures.
    pub fn inc_tool_load_errors(&self) {
        self.tool_load_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the count of traces created.
    pub fn inc_trace_created(&self) {
        self.trace_created_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the count of trace events recorded.
    pub fn inc_trace_events(&self) {
        self.trace_events_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a tool was scored as a bid for a capability.
    pub fn inc_planner_bid(&self, capability: &str, tool_id: &str) {
        let mut map = self.planner_bids_total.lock().expect("metrics lock poisoned");
        *map.entry((capability.to_string(), tool_id.to_string())).or_insert(0) += 1;
    }

    /// Record that a tool was selected (delivered a successful execution).
    pub fn inc_planner_selection(&self, capability: &str, tool_id: &str) {
        let mut map = self.planner_selection_total.lock().expect("metrics lock poisoned");
        *map.entry((capability.to_string(), tool_id.to_string())).or_insert(0) += 1;
    }

    /// Record a fallback (failure or post-check rejection) for a capability.
    pub fn inc_planner_fallback(&self, capability: &str) {
        let mut map = self.planner_fallbacks_total.lock().expect("metrics lock poisoned");
        *map.entry(capability.to_string()).or_insert(0) += 1;
    }

    /// Observe an execution latency sample for a tool.
    pub fn observe_execution_latency(&self, tool_id: &str, latency_ms: u64) {
        let mut map = self.planner_execution_latency_ms.lock().expect("metrics lock poisoned");
        map.entry(tool_id.to_string()).or_default().observe(latency_ms);
    }

    /// Current gauge value for tools loaded.
    #[must_use]
    pub fn tools_loaded(&self) -> i64 {
        self.tools_loaded.load(Ordering::Relaxed)
    }

    /// Current counter value for registry reload failures.
    #[must_use]
    pub fn tool_load_errors(&self) -> u64 {
        self.tool_load_errors.load(Ordering::Relaxed)
    }

    /// Current counter value for traces created.
    #[must_use]
    pub fn trace_created_total(&self) -> u64 {
        self.trace_created_total.load(Ordering::Relaxed)
    }

    /// Current counter value for trace events recorded.
    #[must_use]
    pub fn trace_events_total(&self) -> u64 {
        self.trace_events_total.load(Ordering::Relaxed)
    }

    /// Current bid count for a (capability, tool) pair.
    #[must_use]
    pub fn planner_bids(&self, capability: &str, tool_id: &str) -> u64 {
        let map = self.planner_bids_total.lock().expect("metrics lock poisoned");
        map.get(&(capability.to_string(), tool_id.to_string())).copied().unwrap_or(0)
    }

    /// Current selection count for a (capability, tool) pair.
    #[must_use]
    pub fn planner_selections(&self, capability: &str, tool_id: &str) -> u64 {
        let map = self.planner_selection_total.lock().expect("metrics lock poisoned");
        map.get(&(capability.to_string(), tool_id.to_string())).copied().unwrap_or(0)
    }

    /// Current fallback count for a capability.
    #[must_use]
    pub fn planner_fallbacks(&self, capability: &str) -> u64 {
        let map = self.planner_fallbacks_total.lock().expect("metrics lock poisoned");
        map.get(capability).copied().unwrap_or(0)
    }

    /// Current latency histogram snapshot for a tool.
    #[must_use]
    pub fn execution_latency_snapshot(&self, tool_id: &str) -> HistogramSnapshot {
        let map = self.planner_execution_latency_ms.lock().expect("metrics lock poisoned");
        map.get(tool_id)
            .map(|h| HistogramSnapshot { count: h.count, sum_ms: h.sum_ms })
            .unwrap_or(HistogramSnapshot { count: 0, sum_ms: 0 })
    }
}

/// Default (non-OTel) [`router_registry::RegistryObserver`] that updates a
/// [`MetricsRegistry`] directly. Install at the composition root via
/// `router_registry::set_observer` so `tools_loaded`/`tool_load_errors` move
/// off zero outside the `otel` feature, which only ever wires its own
/// `OtelRegistryObserver`.
pub struct DefaultRegistryObserver {
    metrics: Arc<MetricsRegistry>,
}

impl DefaultRegistryObserver {
    /// Build an observer writing into `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

impl router_registry::RegistryObserver for DefaultRegistryObserver {
    fn on_reload_ok(&self, tool_count: usize) {
        self.metrics.set_tools_loaded(tool_count as i64);
    }

    fn on_reload_err(&self, _error: &router_registry::RegistryError) {
        self.metrics.inc_tool_load_errors();
    }
}

#[cfg(feature = "otel")]
pub mod registry_observer;
#[cfg(feature = "otel")]
pub mod policy_observer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_and_counters_start_at_zero_and_accumulate() {
        let m = MetricsRegistry::new();
        assert_eq!(m.tools_loaded(), 0);
        m.set_tools_loaded(7);
        assert_eq!(m.tools_loaded(), 7);
        m.inc_tool_load_errors();
        m.inc_tool_load_errors();
        assert_eq!(m.tool_load_errors(), 2);
    }

    #[test]
    fn labeled_counters_are_keyed_independently() {
        let m = MetricsRegistry::new();
        m.inc_planner_bid("patient.search", "fast");
        m.inc_planner_bid("patient.search", "fast");
        m.inc_planner_bid("patient.search", "slow");
        assert_eq!(m.planner_bids("patient.search", "fast"), 2);
        assert_eq!(m.planner_bids("patient.search", "slow"), 1);
        assert_eq!(m.planner_bids("billing.charge", "fast"), 0);
    }

    #[test]
    fn histogram_buckets_by_upper_bound_inclusive() {
        let m = MetricsRegistry::new();
        m.observe_execution_latency("fast", 50);
        m.observe_execution_latency("fast", 7000);
        let snap = m.execution_latency_snapshot("fast");
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sum_ms, 7050);
    }

    #[test]
    fn default_registry_observer_updates_metrics_on_reload_outcomes() {
        use router_registry::RegistryObserver;

        let metrics = Arc::new(MetricsRegistry::new());
        let observer = DefaultRegistryObserver::new(metrics.clone());

        observer.on_reload_ok(3);
        assert_eq!(metrics.tools_loaded(), 3);

        let err = router_registry::RegistryError::DuplicateId("dup".to_string());
        observer.on_reload_err(&err);
        assert_eq!(metrics.tool_load_errors(), 1);
    }

    #[test]
    fn default_registry_observer_wired_through_set_observer_sees_a_real_load() {
        use router_registry::RegistryObserver as _;

        let metrics = Arc::new(MetricsRegistry::new());
        router_registry::set_observer(Arc::new(DefaultRegistryObserver::new(metrics.clone())));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fast.yaml"),
            "id: fast\nname: Fast\nversion: \"1.0.0\"\ncapabilities:\n  - name: patient.search\n",
        )
        .unwrap();
        let _service = router_registry::RegistryService::load(dir.path()).unwrap();
        assert_eq!(metrics.tools_loaded(), 1);
    }

    #[test]
    fn trace_counters_increment_independently() {
        let m = MetricsRegistry::new();
        m.inc_trace_created();
        m.inc_trace_events();
        m.inc_trace_events();
        assert_eq!(m.trace_created_total(), 1);
        assert_eq!(m.trace_events_total(), 2);
    }
}
