//! Tenant policy evaluation: capability allow/deny lists, time-window gates,
//! and pre/post schema checks (see [`PolicyService`]).

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::{instrument, warn};

/// Errors produced while loading or evaluating a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Failed to read the policy document from disk.
    #[error("io error reading '{0}': {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    /// Failed to parse the policy document as YAML.
    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// `schemaVersion` was present but not the only version this crate
    /// understands.
    #[error("unsupported policy schemaVersion '{0}', expected \"1.0\"")]
    UnsupportedSchemaVersion(String),
    /// A `preSchemas`/`postSchemas` entry failed to compile as JSON Schema.
    #[error("failed to compile schema for capability '{0}': {1}")]
    SchemaCompile(String, String),
}

/// Closed alphabet of policy decision codes (spec surface, not exceptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionCode {
    /// Reserved for an explicitly tenant-scoped rejection. The documented
    /// resolution order (`tenants[tenant] ?? default ?? empty`) never denies
    /// solely because a tenant is unconfigured, so this code is part of the
    /// closed alphabet but unreachable from [`PolicyService::pre_check`]
    /// today; it exists for callers that model it as a distinct case.
    TenantDenied,
    /// The capability is missing from an `allowCapabilities` list, or
    /// present in a `denyCapabilities` list.
    CapabilityDenied,
    /// The current moment falls outside every configured time window.
    TimeDenied,
    /// The request input failed its `preSchemas` entry for this capability.
    InputInvalid,
    /// The execution output failed its `postSchemas` entry for this
    /// capability.
    PostConditionFailed,
}

/// Outcome of [`PolicyService::pre_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreDecision {
    /// Whether the request may proceed.
    pub allow: bool,
    /// Present iff `allow` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<DecisionCode>,
    /// Human-readable detail, present iff `allow` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PreDecision {
    /// Construct an allow decision.
    #[must_use]
    pub fn allow() -> Self {
        Self { allow: true, code: None, detail: None }
    }

    /// Construct a deny decision with the given code and detail.
    pub fn deny(code: DecisionCode, detail: impl Into<String>) -> Self {
        Self { allow: false, code: Some(code), detail: Some(detail.into()) }
    }
}

/// Outcome of [`PolicyService::post_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDecision {
    /// Whether the execution output satisfies its post-conditions.
    pub pass: bool,
    /// Present iff `pass` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<DecisionCode>,
    /// Human-readable detail, present iff `pass` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PostDecision {
    /// Construct a pass decision.
    #[must_use]
    pub fn pass() -> Self {
        Self { pass: true, code: None, detail: None }
    }

    /// Construct a fail decision with the given code and detail.
    pub fn fail(code: DecisionCode, detail: impl Into<String>) -> Self {
        Self { pass: false, code: Some(code), detail: Some(detail.into()) }
    }
}

/// A single allowed time window: a day-spec plus an optional hour range.
///
/// `days` is a comma-separated list of `Mon`..`Sun` abbreviations and/or
/// ranges (`Mon-Fri`). `hours`, if present, is `HH:MM-HH:MM` (24h, inclusive
/// of both ends, minute resolution). A malformed `days`/`hours` spec makes
/// this window never match (fail closed) rather than erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSpec {
    /// Day-of-week specification, e.g. `"Mon-Fri"` or `"Sat,Sun"`.
    pub days: String,
    /// Optional hour-of-day range, e.g. `"09:00-17:00"`.
    #[serde(default)]
    pub hours: Option<String>,
}

fn default_tz() -> String {
    "UTC".to_string()
}

/// Named time windows plus the timezone they're evaluated in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeWindows {
    /// IANA timezone identifier. Defaults to `"UTC"`; an unrecognized value
    /// falls back to UTC with a warning (never a hard error).
    #[serde(default = "default_tz")]
    pub tz: String,
    /// Windows during which requests are allowed. If empty, the time-window
    /// gate is treated as absent.
    #[serde(default)]
    pub allow: Vec<WindowSpec>,
}

/// A tenant's (or the default) policy: capability gates, time windows, and
/// pre/post schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantPolicy {
    /// If set, only capabilities in this set may be used.
    #[serde(default, rename = "allowCapabilities")]
    pub allow_capabilities: Option<HashSet<String>>,
    /// Capabilities that are always rejected, regardless of the allow-list.
    #[serde(default, rename = "denyCapabilities")]
    pub deny_capabilities: HashSet<String>,
    /// Optional time-of-day/day-of-week gate.
    #[serde(default, rename = "timeWindows")]
    pub time_windows: Option<TimeWindows>,
    /// Per-capability input schemas, checked in `pre_check`.
    #[serde(default, rename = "preSchemas")]
    pub pre_schemas: HashMap<String, Value>,
    /// Per-capability output schemas, checked in `post_check`.
    #[serde(default, rename = "postSchemas")]
    pub post_schemas: HashMap<String, Value>,
}

/// The on-disk policy document: a schema version, an optional default
/// policy, and per-tenant overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    /// Must be `"1.0"`.
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    /// Policy applied when a request's tenant has no entry in `tenants`.
    #[serde(default)]
    pub default: Option<TenantPolicy>,
    /// Per-tenant policy overrides, keyed by tenant id.
    #[serde(default)]
    pub tenants: HashMap<String, TenantPolicy>,
}

impl PolicyDocument {
    /// Load and parse a policy document from a YAML file on disk.
    pub fn load_from_yaml_path(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Io(path.to_path_buf(), e))?;
        let doc: Self = serde_yaml::from_str(&text)?;
        if doc.schema_version != "1.0" {
            return Err(PolicyError::UnsupportedSchemaVersion(doc.schema_version));
        }
        Ok(doc)
    }

    /// Resolve the effective policy for a tenant: `tenants[tenant] ??
    /// default ?? empty`.
    #[must_use]
    pub fn resolve(&self, tenant: Option<&str>) -> TenantPolicy {
        if let Some(t) = tenant {
            if let Some(p) = self.tenants.get(t) {
                return p.clone();
            }
        }
        self.default.clone().unwrap_or_default()
    }
}

fn day_index(s: &str) -> Option<u32> {
    Some(match s.trim() {
        "Mon" => 0,
        "Tue" => 1,
        "Wed" => 2,
        "Thu" => 3,
        "Fri" => 4,
        "Sat" => 5,
        "Sun" => 6,
        _ => return None,
    })
}

fn days_match(spec: &str, today: u32) -> bool {
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let matched = if let Some((start, end)) = part.split_once('-') {
            match (day_index(start), day_index(end)) {
                (Some(s), Some(e)) if s <= e => (s..=e).contains(&today),
                (Some(s), Some(e)) => today >= s || today <= e, // wraps (e.g. Fri-Mon)
                _ => false,
            }
        } else {
            day_index(part) == Some(today)
        };
        if matched {
            return true;
        }
    }
    false
}

fn minutes_of_day(hh_mm: &str) -> Option<u32> {
    let (h, m) = hh_mm.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

fn hours_match(spec: &str, now_min: u32) -> bool {
    let Some((start, end)) = spec.split_once('-') else { return false };
    let (Some(start_min), Some(end_min)) = (minutes_of_day(start), minutes_of_day(end)) else {
        return false;
    };
    if start_min <= end_min {
        (start_min..=end_min).contains(&now_min)
    } else {
        now_min >= start_min || now_min <= end_min
    }
}

fn window_matches(window: &WindowSpec, now: DateTime<Tz>) -> bool {
    let today = now.weekday().num_days_from_monday();
    if !days_match(&window.days, today) {
        return false;
    }
    match &window.hours {
        None => true,
        Some(hours) => hours_match(hours, now.hour() * 60 + now.minute()),
    }
}

/// Hook for observing policy decisions, e.g. to feed metrics or audit logs.
/// A process-wide, swappable single instance rather than a constructor
/// parameter threaded through every call site.
pub trait PolicyObserver: Send + Sync {
    /// Called after every `pre_check`.
    fn on_pre_decision(&self, capability: &str, decision: &PreDecision) {
        let _ = (capability, decision);
    }
    /// Called after every `post_check`.
    fn on_post_decision(&self, capability: &str, decision: &PostDecision) {
        let _ = (capability, decision);
    }
}

static OBSERVER: OnceLock<RwLock<Option<Arc<dyn PolicyObserver>>>> = OnceLock::new();

fn observer_cell() -> &'static RwLock<Option<Arc<dyn PolicyObserver>>> {
    OBSERVER.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide policy observer, replacing any previous one.
pub fn set_observer(observer: Arc<dyn PolicyObserver>) {
    *observer_cell().write().expect("policy observer lock poisoned") = Some(observer);
}

fn notify_pre(capability: &str, decision: &PreDecision) {
    if let Some(obs) = observer_cell().read().expect("policy observer lock poisoned").as_ref() {
        obs.on_pre_decision(capability, decision);
    }
}

fn notify_post(capability: &str, decision: &PostDecision) {
    if let Some(obs) = observer_cell().read().expect("policy observer lock poisoned").as_ref() {
        obs.on_post_decision(capability, decision);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SchemaKind {
    Pre,
    Post,
}

/// Evaluates preconditions and postconditions against a loaded
/// [`PolicyDocument`], caching compiled `preSchemas`/`postSchemas`
/// validators per `(kind, capability)` for the service's lifetime.
pub struct PolicyService {
    document: PolicyDocument,
    validators: Mutex<HashMap<(SchemaKind, String), Arc<JSONSchema>>>,
}

impl PolicyService {
    /// Build a service from an already-parsed document.
    #[must_use]
    pub fn new(document: PolicyDocument) -> Self {
        Self { document, validators: Mutex::new(HashMap::new()) }
    }

    /// Load a policy document from disk and build a service around it.
    pub fn load_from_yaml_path(path: &Path) -> Result<Self, PolicyError> {
        Ok(Self::new(PolicyDocument::load_from_yaml_path(path)?))
    }

    fn compiled(
        &self,
        kind: SchemaKind,
        capability: &str,
        schema: &Value,
    ) -> Result<Arc<JSONSchema>, PolicyError> {
        let key = (kind, capability.to_string());
        if let Some(existing) = self.validators.lock().expect("validator cache poisoned").get(&key)
        {
            return Ok(existing.clone());
        }
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| PolicyError::SchemaCompile(capability.to_string(), e.to_string()))?;
        let compiled = Arc::new(compiled);
        self.validators
            .lock()
            .expect("validator cache poisoned")
            .insert(key, compiled.clone());
        Ok(compiled)
    }

    /// Evaluate preconditions for a capability call, in the strict order:
    /// allow-list, deny-list, time window, input schema.
    #[instrument(name = "policy.pre_check", skip(self, input), fields(capability = %capability))]
    pub fn pre_check(
        &self,
        tenant: Option<&str>,
        capability: &str,
        input: &Value,
        now: Option<DateTime<Utc>>,
    ) -> PreDecision {
        let policy = self.document.resolve(tenant);

        if let Some(allow) = &policy.allow_capabilities {
            if !allow.contains(capability) {
                let decision = PreDecision::deny(
                    DecisionCode::CapabilityDenied,
                    format!("capability '{capability}' is not in the tenant allow-list"),
                );
                notify_pre(capability, &decision);
                return decision;
            }
        }
        if policy.deny_capabilities.contains(capability) {
            let decision = PreDecision::deny(
                DecisionCode::CapabilityDenied,
                format!("capability '{capability}' is in the tenant deny-list"),
            );
            notify_pre(capability, &decision);
            return decision;
        }
        if let Some(windows) = &policy.time_windows {
            if !windows.allow.is_empty() {
                let tz: Tz = windows.tz.parse().unwrap_or_else(|_| {
                    warn!(tz = %windows.tz, "unrecognized timezone, falling back to UTC");
                    Tz::UTC
                });
                let now = now.unwrap_or_else(Utc::now).with_timezone(&tz);
                let matched = windows.allow.iter().any(|w| window_matches(w, now));
                if !matched {
                    let decision = PreDecision::deny(
                        DecisionCode::TimeDenied,
                        "current time falls outside every configured window",
                    );
                    notify_pre(capability, &decision);
                    return decision;
                }
            }
        }
        if let Some(schema) = policy.pre_schemas.get(capability) {
            match self.compiled(SchemaKind::Pre, capability, schema) {
                Ok(validator) => {
                    if let Err(errors) = validator.validate(input) {
                        let detail =
                            errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                        let decision = PreDecision::deny(DecisionCode::InputInvalid, detail);
                        notify_pre(capability, &decision);
                        return decision;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pre_schema failed to compile, denying fail-closed");
                    let decision =
                        PreDecision::deny(DecisionCode::InputInvalid, e.to_string());
                    notify_pre(capability, &decision);
                    return decision;
                }
            }
        }
        let decision = PreDecision::allow();
        notify_pre(capability, &decision);
        decision
    }

    /// Evaluate postconditions for a capability's execution output.
    #[instrument(name = "policy.post_check", skip(self, output), fields(capability = %capability))]
    pub fn post_check(&self, tenant: Option<&str>, capability: &str, output: &Value) -> PostDecision {
        let policy = self.document.resolve(tenant);
        let decision = match policy.post_schemas.get(capability) {
            None => PostDecision::pass(),
            Some(schema) => match self.compiled(SchemaKind::Post, capability, schema) {
                Ok(validator) => match validator.validate(output) {
                    Ok(()) => PostDecision::pass(),
                    Err(errors) => {
                        let detail = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                        PostDecision::fail(DecisionCode::PostConditionFailed, detail)
                    }
                },
                Err(e) => {
                    warn!(error = %e, "post_schema failed to compile, failing fail-closed");
                    PostDecision::fail(DecisionCode::PostConditionFailed, e.to_string())
                }
            },
        };
        notify_post(capability, &decision);
        decision
    }
}
