//! OTel-backed observer for policy pre/post decisions (feature-gated via `otel`).

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use router_policy::{DecisionCode, PolicyObserver, PostDecision, PreDecision};

fn code_label(code: Option<DecisionCode>) -> &'static str {
    match code {
        None => "none",
        Some(DecisionCode::TenantDenied) => "tenant_denied",
        Some(DecisionCode::CapabilityDenied) => "capability_denied",
        Some(DecisionCode::TimeDenied) => "time_denied",
        Some(DecisionCode::InputInvalid) => "input_invalid",
        Some(DecisionCode::PostConditionFailed) => "post_condition_failed",
    }
}

struct Instruments {
    pre_total: Counter<u64>,
    post_total: Counter<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();
static INSTANCE: OnceCell<OtelPolicyObserver> = OnceCell::new();

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        let meter: Meter = global::meter("router.policy");
        let pre_total =
            meter.u64_counter("policy.pre_check.count").with_description("Policy pre-check decisions").init();
        let post_total =
            meter.u64_counter("policy.post_check.count").with_description("Policy post-check decisions").init();
        Instruments { pre_total, post_total }
    })
}

/// OTel-backed [`PolicyObserver`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelPolicyObserver;

impl PolicyObserver for OtelPolicyObserver {
    fn on_pre_decision(&self, capability: &str, decision: &PreDecision) {
        let inst = ensure_instruments();
        let code = code_label(decision.code);
        inst.pre_total.add(
            1,
            &[
                KeyValue::new("capability", capability.to_string()),
                KeyValue::new("allow", decision.allow.to_string()),
                KeyValue::new("code", code.to_string()),
            ],
        );
    }

    fn on_post_decision(&self, capability: &str, decision: &PostDecision) {
        let inst = ensure_instruments();
        let code = code_label(decision.code);
        inst.post_total.add(
            1,
            &[
                KeyValue::new("capability", capability.to_string()),
                KeyValue::new("pass", decision.pass.to_string()),
                KeyValue::new("code", code.to_string()),
            ],
        );
    }
}

/// Return the process-wide instance, suitable for `router_policy::set_observer`.
pub fn global() -> &'static OtelPolicyObserver {
    INSTANCE.get_or_init(|| {
        let _ = ensure_instruments();
        OtelPolicyObserver
    })
}
