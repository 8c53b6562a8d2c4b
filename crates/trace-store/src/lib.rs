//! In-memory, bounded, TTL-expiring store of per-decision traces.
//!
//! Traces never touch disk: the planner's non-goal is durability across
//! process restarts, only bounded memory during a process's lifetime.

#![deny(unsafe_code)]

use router_core::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Default capacity, in number of traces.
pub const DEFAULT_MAX_TRACES: usize = 1000;
/// Default time-to-live for a trace, in milliseconds (15 minutes).
pub const DEFAULT_TTL_MS: u64 = 15 * 60 * 1000;

/// Errors produced while constructing a [`TraceStore`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceStoreError {
    /// `max_traces` was zero.
    #[error("max_traces must be >= 1")]
    InvalidCapacity,
    /// `ttl_ms` was zero.
    #[error("ttl_ms must be >= 1")]
    InvalidTtl,
}

/// Capacity and expiry configuration for a [`TraceStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStoreConfig {
    /// Maximum number of live traces; oldest-first eviction beyond this.
    pub max_traces: usize,
    /// Time-to-live for a trace, in milliseconds.
    pub ttl_ms: u64,
}

impl Default for TraceStoreConfig {
    fn default() -> Self {
        Self { max_traces: DEFAULT_MAX_TRACES, ttl_ms: DEFAULT_TTL_MS }
    }
}

impl TraceStoreConfig {
    /// Build a validated config.
    pub fn new(max_traces: usize, ttl_ms: u64) -> Result<Self, TraceStoreError> {
        if max_traces == 0 {
            return Err(TraceStoreError::InvalidCapacity);
        }
        if ttl_ms == 0 {
            return Err(TraceStoreError::InvalidTtl);
        }
        Ok(Self { max_traces, ttl_ms })
    }
}

/// The closed set of trace event types a decision can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    /// A decision began.
    Request,
    /// Candidates were scored.
    Scores,
    /// An execution attempt against one candidate began.
    Attempt,
    /// A candidate was selected as the attempted tool.
    Selected,
    /// An attempt succeeded.
    Success,
    /// An attempt failed and the planner is falling back to the next
    /// candidate.
    Fallback,
    /// An attempt exhausted its timeout budget.
    Timeout,
    /// No candidates survived filtering.
    NoCandidates,
    /// The decision ended in terminal failure.
    Failure,
    /// A successful attempt failed its post-check and the planner is
    /// falling back to the next candidate.
    PostFallback,
}

/// A single recorded event within a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Wall-clock timestamp (ms) at which the event was recorded.
    pub ts_ms: u64,
    /// The event's type.
    #[serde(rename = "type")]
    pub kind: TraceEventType,
    /// Event-specific payload.
    pub data: Value,
}

/// A trace: the ordered history of one planner decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Opaque, collision-resistant trace id.
    pub id: String,
    /// Wall-clock timestamp (ms) at which the trace was created.
    pub created_at_ms: u64,
    /// Events recorded so far, in order.
    pub events: Vec<TraceEvent>,
}

struct Inner {
    traces: HashMap<String, Trace>,
    /// Insertion order, oldest first, for head eviction.
    order: VecDeque<String>,
}

/// Bounded, TTL-expiring store of traces.
pub struct TraceStore {
    config: TraceStoreConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl TraceStore {
    /// Build a store with the given config, using the system clock.
    #[must_use]
    pub fn new(config: TraceStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a store with an injected clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(config: TraceStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, inner: Mutex::new(Inner { traces: HashMap::new(), order: VecDeque::new() }) }
    }

    fn is_expired(&self, trace: &Trace, now: u64) -> bool {
        now.saturating_sub(trace.created_at_ms) >= self.config.ttl_ms
    }

    fn prune_expired_locked(&self, inner: &mut Inner) {
        let now = self.clock.now_ms();
        let expired: Vec<String> = inner
            .traces
            .values()
            .filter(|t| self.is_expired(t, now))
            .map(|t| t.id.clone())
            .collect();
        for id in expired {
            inner.traces.remove(&id);
            inner.order.retain(|existing| existing != &id);
        }
    }

    fn expire_if_stale_locked(&self, inner: &mut Inner, id: &str) {
        let now = self.clock.now_ms();
        let expired = inner.traces.get(id).is_some_and(|t| self.is_expired(t, now));
        if expired {
            inner.traces.remove(id);
            inner.order.retain(|existing| existing != id);
        }
    }

    /// Create a new trace, pruning expired entries and evicting the oldest
    /// surviving entries beyond capacity. Returns the new trace's id.
    pub fn create(&self) -> String {
        let mut inner = self.inner.lock().expect("trace store lock poisoned");
        self.prune_expired_locked(&mut inner);

        let id = router_core::ids::new_trace_id();
        let created_at_ms = self.clock.now_ms();
        inner.traces.insert(id.clone(), Trace { id: id.clone(), created_at_ms, events: Vec::new() });
        inner.order.push_back(id.clone());

        while inner.traces.len() > self.config.max_traces {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.traces.remove(&oldest);
        }
        id
    }

    /// Append an event to a trace. Silently does nothing if `id` is unknown
    /// or expired.
    pub fn record(&self, id: &str, kind: TraceEventType, data: Value) {
        let mut inner = self.inner.lock().expect("trace store lock poisoned");
        self.expire_if_stale_locked(&mut inner, id);
        let now = self.clock.now_ms();
        if let Some(trace) = inner.traces.get_mut(id) {
            trace.events.push(TraceEvent { ts_ms: now, kind, data });
        }
    }

    /// Fetch a trace by id, lazily expiring it first if its TTL has
    /// elapsed.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Trace> {
        let mut inner = self.inner.lock().expect("trace store lock poisoned");
        self.expire_if_stale_locked(&mut inner, id);
        inner.traces.get(id).cloned()
    }

    /// Number of live (non-expired, as of the last mutation) traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("trace store lock poisoned").traces.len()
    }

    /// Whether the store currently holds no traces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
