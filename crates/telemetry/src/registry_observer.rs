//! OTel-backed observer for tool registry reloads (feature-gated via `otel`).

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use router_registry::{RegistryError, RegistryObserver};

struct Instruments {
    reload_ok_total: Counter<u64>,
    reload_err_total: Counter<u64>,
    /// Records the snapshot size on every successful reload; read as the
    /// latest sample rather than an aggregate (mirrors a gauge).
    tools_loaded: Histogram<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();
static INSTANCE: OnceCell<OtelRegistryObserver> = OnceCell::new();

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        let meter: Meter = global::meter("router.registry");
        let reload_ok_total =
            meter.u64_counter("registry.reload.ok").with_description("Successful registry reloads").init();
        let reload_err_total =
            meter.u64_counter("registry.reload.err").with_description("Failed registry reloads").init();
        let tools_loaded =
            meter.u64_histogram("registry.tools_loaded").with_description("Tools in the live snapshot").init();
        Instruments { reload_ok_total, reload_err_total, tools_loaded }
    })
}

/// OTel-backed [`RegistryObserver`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelRegistryObserver;

impl RegistryObserver for OtelRegistryObserver {
    fn on_reload_ok(&self, tool_count: usize) {
        let inst = ensure_instruments();
        inst.reload_ok_total.add(1, &[]);
        inst.tools_loaded.record(tool_count as u64, &[]);
    }

    fn on_reload_err(&self, error: &RegistryError) {
        let inst = ensure_instruments();
        inst.reload_err_total.add(1, &[KeyValue::new("error", error.to_string())]);
    }
}

/// Return the process-wide instance, suitable for `router_registry::set_observer`.
pub fn global() -> &'static OtelRegistryObserver {
    INSTANCE.get_or_init(|| {
        let _ = ensure_instruments();
        OtelRegistryObserver
    })
}
