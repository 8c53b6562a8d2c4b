//! Tool data model: the declarative shape of a catalog entry (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A capability a tool implements. `inputs`/`outputs` are documentation-only
/// string-typed maps, not enforced wire schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Capability {
    /// Capability name, e.g. `patient.search`.
    pub name: String,
    /// Documented input fields: name -> type label.
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    /// Documented output fields: name -> type label.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

/// Declared service-level agreement for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sla {
    /// 95th percentile latency in milliseconds. Must be positive.
    pub p95_ms: u32,
    /// Minimum acceptable success rate, in `[0, 1]`.
    pub success_rate_min: f64,
}

/// Preconditions that must hold in the caller's environment before a tool
/// may be selected as a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preconditions {
    /// Tool requires outbound network access.
    #[serde(default)]
    pub requires_network: bool,
    /// Tool requires a VPN tunnel. Documented but not gated by the planner
    /// today (no VPN-presence signal exists in the environment contract).
    #[serde(default)]
    pub requires_vpn: bool,
    /// Environment variable names that must be present in the process
    /// environment for this tool to be usable.
    #[serde(default)]
    pub env: HashSet<String>,
}

/// Transport endpoint for a tool. The concrete transport is an external
/// collaborator (spec §1); only the declared shape lives in the core model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Endpoint {
    /// HTTP(S) endpoint.
    Http {
        /// Target URL.
        url: String,
        /// Per-tool timeout in milliseconds. Must be >= 1.
        timeout_ms: u64,
    },
    /// RPA (robotic process automation) script endpoint.
    Rpa {
        /// Script identifier/path to run.
        script: String,
        /// Per-tool timeout in milliseconds. Must be >= 1.
        timeout_ms: u64,
    },
}

impl Endpoint {
    /// The endpoint's declared timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        match self {
            Self::Http { timeout_ms, .. } | Self::Rpa { timeout_ms, .. } => *timeout_ms,
        }
    }
}

/// A concrete, callable implementation of one or more capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    /// Unique identifier across the registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Version string (implementation-defined format).
    pub version: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Capabilities this tool implements. Must be non-empty.
    pub capabilities: Vec<Capability>,
    /// Optional relative cost estimate (>= 0), used by the scorer.
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    /// Optional declared SLA.
    #[serde(default)]
    pub sla: Option<Sla>,
    /// Optional environment preconditions.
    #[serde(default)]
    pub preconditions: Option<Preconditions>,
    /// Optional transport endpoint.
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

/// Errors produced when validating a [`Tool`]'s invariants beyond JSON-schema
/// shape checking (spec §3 invariants).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolValidationError {
    /// `id` was empty.
    #[error("tool id must be non-empty")]
    EmptyId,
    /// `capabilities` was empty.
    #[error("tool '{0}' must declare at least one capability")]
    NoCapabilities(String),
    /// A capability name was empty.
    #[error("tool '{0}' has a capability with an empty name")]
    EmptyCapabilityName(String),
    /// `cost_estimate` was negative.
    #[error("tool '{0}' has a negative cost_estimate")]
    NegativeCost(String),
    /// `sla.p95_ms` was not positive.
    #[error("tool '{0}' has a non-positive sla.p95_ms")]
    NonPositiveP95(String),
    /// `sla.success_rate_min` was outside `[0, 1]`.
    #[error("tool '{0}' has sla.success_rate_min outside [0, 1]")]
    SuccessRateOutOfRange(String),
    /// `endpoint.timeout_ms` was below 1.
    #[error("tool '{0}' has an endpoint timeout_ms below 1")]
    NonPositiveTimeout(String),
}

/// Validate a [`Tool`]'s semantic invariants (spec §3). JSON-schema shape
/// validation (additional-properties rejection) happens separately in
/// [`crate::schema`]; this pass checks the numeric/structural invariants
/// that a schema alone cannot express cleanly.
pub fn validate_tool(tool: &Tool) -> Result<(), ToolValidationError> {
    if tool.id.trim().is_empty() {
        return Err(ToolValidationError::EmptyId);
    }
    if tool.capabilities.is_empty() {
        return Err(ToolValidationError::NoCapabilities(tool.id.clone()));
    }
    for cap in &tool.capabilities {
        if cap.name.trim().is_empty() {
            return Err(ToolValidationError::EmptyCapabilityName(tool.id.clone()));
        }
    }
    if let Some(cost) = tool.cost_estimate {
        if cost < 0.0 {
            return Err(ToolValidationError::NegativeCost(tool.id.clone()));
        }
    }
    if let Some(sla) = &tool.sla {
        if sla.p95_ms == 0 {
            return Err(ToolValidationError::NonPositiveP95(tool.id.clone()));
        }
        if !(0.0..=1.0).contains(&sla.success_rate_min) {
            return Err(ToolValidationError::SuccessRateOutOfRange(tool.id.clone()));
        }
    }
    if let Some(endpoint) = &tool.endpoint {
        if endpoint.timeout_ms() < 1 {
            return Err(ToolValidationError::NonPositiveTimeout(tool.id.clone()));
        }
    }
    Ok(())
}

/// A registry document: an ordered set of tools plus a refresh timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDocument {
    /// Declared tools.
    pub tools: Vec<Tool>,
    /// RFC-3339 timestamp of when this document was produced.
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}
