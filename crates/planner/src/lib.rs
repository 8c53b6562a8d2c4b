//! The planner: scores, filters, and executes tool candidates for a single
//! capability request (see the module-level state machine in `plan`).
//!
//! Collaborators (registry, policy, scorer, executor, trace store, metrics)
//! are constructor-injected; the planner holds no process-wide state of its
//! own beyond what those collaborators already expose.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use router_core::Tool;
use router_executor::{ExecutionResult, ToolExecutor};
use router_policy::{DecisionCode, PolicyService};
use router_registry::RegistryService;
use router_scorer::{rank, DefaultScorer, ScoredCandidate, Scorer};
use router_trace_store::{TraceEventType, TraceStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use telemetry::MetricsRegistry;
use tokio::time::{Duration, Instant};
use tracing::instrument;

/// Process environment variable whose mere presence marks the process as
/// offline, disqualifying any candidate that declares `requiresNetwork`.
pub const OFFLINE_ENV_VAR: &str = "ROUTER_OFFLINE";

/// A single capability request handed to [`Planner::plan`].
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// Requesting tenant, resolved against the policy document.
    pub tenant: Option<String>,
    /// The capability being requested, e.g. `"patient.search"`.
    pub capability: String,
    /// Request input, passed to the policy pre-schema and to the executor.
    pub input: Value,
    /// `false` selects plan-only mode: candidates are scored but none
    /// attempted.
    pub execute: bool,
    /// Overall deadline for the whole decision, in milliseconds. `0` or
    /// absent means unset.
    pub timeout_ms: Option<u64>,
    /// Overrides "now" for policy time-window evaluation. `None` uses the
    /// wall clock.
    pub now: Option<DateTime<Utc>>,
}

impl PlanContext {
    /// Build a request for `capability` with no tenant, no deadline, in
    /// execute mode.
    #[must_use]
    pub fn new(capability: impl Into<String>, input: Value) -> Self {
        Self { tenant: None, capability: capability.into(), input, execute: true, timeout_ms: None, now: None }
    }

    /// Scope the request to a tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Switch to plan-only mode.
    #[must_use]
    pub fn plan_only(mut self) -> Self {
        self.execute = false;
        self
    }

    /// Set an overall deadline in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override "now" for policy time-window evaluation.
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

/// Terminal outcome of a `plan()` call (spec error taxonomy: denials and
/// `NO_CANDIDATES`/`ALL_CANDIDATES_FAILED` are surfaced, not thrown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Rejected by policy before any candidate was considered.
    Denied {
        /// The policy decision code.
        code: DecisionCode,
        /// Human-readable detail.
        detail: String,
    },
    /// No tool declares the requested capability, or none survived the
    /// preconditions gate.
    NoCandidates,
    /// `execute: false` — candidates were scored but none attempted.
    PlanOnly,
    /// A candidate executed successfully and (if attempted) passed its
    /// post-check.
    Success {
        /// The selected tool's id.
        tool_id: String,
        /// Attempt latency in milliseconds.
        latency_ms: u64,
        /// Tool-defined output, if any.
        output: Option<Value>,
    },
    /// Every candidate failed and no deadline intervened.
    Failure {
        /// Stable reason code (`"ALL_CANDIDATES_FAILED"`).
        reason: String,
    },
    /// A tool-reported timeout, or the overall deadline, was terminal.
    Timeout {
        /// Which deadline fired, or the tool's own timeout report.
        reason: String,
    },
}

/// Serializable view of one scored candidate (drops the `Arc<Tool>` payload
/// that [`router_scorer::ScoredCandidate`] carries for execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateView {
    /// The candidate tool's id.
    pub tool_id: String,
    /// Its computed score.
    pub score: f64,
}

impl From<&ScoredCandidate> for CandidateView {
    fn from(c: &ScoredCandidate) -> Self {
        Self { tool_id: c.tool_id.clone(), score: c.score }
    }
}

/// Result of one `plan()` call: the trace it produced, the ranked
/// candidates, the selected tool (if any), and the terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    /// Id of the trace recording this decision.
    pub trace_id: String,
    /// Ranked candidates, descending by score.
    pub candidates: Vec<CandidateView>,
    /// The selected tool's id, present iff a candidate was chosen.
    pub selected: Option<String>,
    /// The terminal outcome.
    pub outcome: PlanOutcome,
}

fn preconditions_satisfied(tool: &Tool, offline: bool) -> bool {
    let Some(pre) = &tool.preconditions else { return true };
    if pre.requires_network && offline {
        return false;
    }
    pre.env.iter().all(|name| std::env::var(name).is_ok())
}

/// Orchestrates a registry, a policy service, a scorer, an executor, a
/// trace store, and a metrics registry into a single `plan()` call per
/// capability request (spec state machine: `START -> CREATE_TRACE ->
/// VALIDATE_INPUT -> FILTER_BY_CAPABILITY -> FILTER_BY_PRECONDITIONS ->
/// SCORE_AND_SORT -> (EXECUTE_LOOP | PLAN_ONLY) -> DONE`).
pub struct Planner {
    registry: Arc<RegistryService>,
    policy: Arc<PolicyService>,
    scorer: Arc<dyn Scorer>,
    executor: Arc<dyn ToolExecutor>,
    trace_store: Arc<TraceStore>,
    metrics: Arc<MetricsRegistry>,
}

impl Planner {
    /// Build a planner from its collaborators, using [`DefaultScorer`].
    #[must_use]
    pub fn new(
        registry: Arc<RegistryService>,
        policy: Arc<PolicyService>,
        executor: Arc<dyn ToolExecutor>,
        trace_store: Arc<TraceStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { registry, policy, scorer: Arc::new(DefaultScorer::new()), executor, trace_store, metrics }
    }

    /// Override the scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Run one capability request through the full state machine.
    #[instrument(name = "planner.plan", skip(self, ctx), fields(capability = %ctx.capability))]
    pub async fn plan(&self, ctx: PlanContext) -> PlanResult {
        let trace_id = self.trace_store.create();
        self.metrics.inc_trace_created();
        self.record(
            &trace_id,
            TraceEventType::Request,
            json!({"capability": ctx.capability, "tenant": ctx.tenant, "execute": ctx.execute}),
        );

        if ctx.capability.trim().is_empty() {
            return self.deny(trace_id, DecisionCode::InputInvalid, "capability must not be empty".to_string());
        }

        let pre = self.policy.pre_check(ctx.tenant.as_deref(), &ctx.capability, &ctx.input, ctx.now);
        if !pre.allow {
            let code = pre.code.unwrap_or(DecisionCode::InputInvalid);
            let detail = pre.detail.unwrap_or_default();
            return self.deny(trace_id, code, detail);
        }

        let snapshot = self.registry.snapshot();
        let offline = std::env::var(OFFLINE_ENV_VAR).is_ok();
        let tools: Vec<Arc<Tool>> = snapshot
            .by_capability(&ctx.capability)
            .filter(|t| preconditions_satisfied(t, offline))
            .map(|t| Arc::new(t.clone()))
            .collect();

        if tools.is_empty() {
            return self.no_candidates(trace_id);
        }

        let ranked = rank(tools.iter(), self.scorer.as_ref());
        for c in &ranked {
            self.metrics.inc_planner_bid(&ctx.capability, &c.tool_id);
        }
        let views: Vec<CandidateView> = ranked.iter().map(CandidateView::from).collect();
        self.record(&trace_id, TraceEventType::Scores, json!({"candidates": views}));

        if !ctx.execute {
            return PlanResult {
                selected: views.first().map(|c| c.tool_id.clone()),
                trace_id,
                candidates: views,
                outcome: PlanOutcome::PlanOnly,
            };
        }

        let overall_deadline =
            ctx.timeout_ms.filter(|&ms| ms > 0).map(|ms| Instant::now() + Duration::from_millis(ms));

        for (rank_idx, candidate) in ranked.iter().enumerate() {
            self.record(&trace_id, TraceEventType::Attempt, json!({"tool_id": candidate.tool_id, "rank": rank_idx}));
            let result = self.executor.execute(&candidate.tool, &ctx.input, overall_deadline).await;

            match result {
                ExecutionResult::Success { latency_ms, output } => {
                    let post = self.policy.post_check(
                        ctx.tenant.as_deref(),
                        &ctx.capability,
                        output.as_ref().unwrap_or(&Value::Null),
                    );
                    if post.pass {
                        self.metrics.inc_planner_selection(&ctx.capability, &candidate.tool_id);
                        self.metrics.observe_execution_latency(&candidate.tool_id, latency_ms);
                        self.record(&trace_id, TraceEventType::Selected, json!({"tool_id": candidate.tool_id}));
                        self.record(
                            &trace_id,
                            TraceEventType::Success,
                            json!({"tool_id": candidate.tool_id, "latency_ms": latency_ms}),
                        );
                        return PlanResult {
                            selected: Some(candidate.tool_id.clone()),
                            trace_id,
                            candidates: views,
                            outcome: PlanOutcome::Success { tool_id: candidate.tool_id.clone(), latency_ms, output },
                        };
                    }
                    self.metrics.inc_planner_fallback(&ctx.capability);
                    self.record(
                        &trace_id,
                        TraceEventType::PostFallback,
                        json!({"tool_id": candidate.tool_id, "code": post.code, "detail": post.detail}),
                    );
                    if Self::deadline_fired(overall_deadline) {
                        return self.timeout_result(trace_id, views, "overall deadline exceeded".to_string());
                    }
                }
                ExecutionResult::Failure { error, .. } => {
                    self.metrics.inc_planner_fallback(&ctx.capability);
                    self.record(
                        &trace_id,
                        TraceEventType::Fallback,
                        json!({"tool_id": candidate.tool_id, "error": error}),
                    );
                    if Self::deadline_fired(overall_deadline) {
                        return self.timeout_result(trace_id, views, "overall deadline exceeded".to_string());
                    }
                }
                ExecutionResult::Timeout { error, .. } => {
                    self.record(
                        &trace_id,
                        TraceEventType::Timeout,
                        json!({"tool_id": candidate.tool_id, "error": error}),
                    );
                    return self.timeout_result(trace_id, views, error);
                }
            }
        }

        self.record(&trace_id, TraceEventType::Failure, json!({"reason": "ALL_CANDIDATES_FAILED"}));
        PlanResult {
            selected: None,
            trace_id,
            candidates: views,
            outcome: PlanOutcome::Failure { reason: "ALL_CANDIDATES_FAILED".to_string() },
        }
    }

    fn deadline_fired(deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn record(&self, trace_id: &str, kind: TraceEventType, data: Value) {
        self.trace_store.record(trace_id, kind, data);
        self.metrics.inc_trace_events();
    }

    fn deny(&self, trace_id: String, code: DecisionCode, detail: String) -> PlanResult {
        self.record(&trace_id, TraceEventType::Failure, json!({"code": code, "detail": detail}));
        PlanResult { candidates: Vec::new(), selected: None, trace_id, outcome: PlanOutcome::Denied { code, detail } }
    }

    fn no_candidates(&self, trace_id: String) -> PlanResult {
        self.record(&trace_id, TraceEventType::NoCandidates, json!({}));
        PlanResult { candidates: Vec::new(), selected: None, trace_id, outcome: PlanOutcome::NoCandidates }
    }

    fn timeout_result(&self, trace_id: String, candidates: Vec<CandidateView>, reason: String) -> PlanResult {
        PlanResult { selected: None, trace_id, candidates, outcome: PlanOutcome::Timeout { reason } }
    }
}
