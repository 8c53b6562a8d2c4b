//! Candidate scoring: ranks tools competing for a capability.
//!
//! The capability gate runs upstream (in the planner), so every tool handed
//! to [`Scorer::score`] is already a valid fit; this crate only orders them.

use router_core::Tool;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Weights for the linear scoring formula. Defaults match the documented
/// baseline (`wFit=0.45, wSla=0.25, wReward=0.15, wCost=0.15`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorerWeights {
    /// Weight applied to the (constant) fit term.
    pub w_fit: f64,
    /// Weight applied to the SLA term.
    pub w_sla: f64,
    /// Weight applied to the (constant) reward placeholder term.
    pub w_reward: f64,
    /// Weight applied to the cost term (subtracted).
    pub w_cost: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self { w_fit: 0.45, w_sla: 0.25, w_reward: 0.15, w_cost: 0.15 }
    }
}

/// Default p95 latency assumed for a tool with no declared SLA.
const DEFAULT_P95_MS: f64 = 3000.0;
/// p95 latency beyond which the SLA term bottoms out at zero.
const P95_CEILING_MS: f64 = 5000.0;
/// Neutral placeholder for the reward term (pluggable in future revisions).
const NEUTRAL_REWARD: f64 = 0.5;

fn clamp01(x: f64) -> f64 {
    x.max(0.0).min(1.0)
}

/// Scores a single tool for a capability request.
pub trait Scorer: Send + Sync {
    /// Compute a tool's score. Implementations must return
    /// `f64::NEG_INFINITY` rather than NaN/infinite values, so that
    /// non-finite tools sort last deterministically.
    fn score(&self, tool: &Tool) -> f64;
}

/// The documented linear scorer: `wFit*fit + wSla*sla + wReward*reward -
/// wCost*cost`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScorer {
    weights: ScorerWeights,
}

impl DefaultScorer {
    /// Build a scorer with the default weights.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scorer with custom weights.
    #[must_use]
    pub fn with_weights(weights: ScorerWeights) -> Self {
        Self { weights }
    }
}

impl Scorer for DefaultScorer {
    fn score(&self, tool: &Tool) -> f64 {
        let fit = 1.0;
        let p95_ms = tool.sla.map_or(DEFAULT_P95_MS, |sla| f64::from(sla.p95_ms));
        let sla = clamp01(1.0 - p95_ms.min(P95_CEILING_MS) / P95_CEILING_MS);
        let reward = NEUTRAL_REWARD;
        let cost = tool.cost_estimate.unwrap_or(0.0);

        let score = self.weights.w_fit * fit + self.weights.w_sla * sla
            + self.weights.w_reward * reward
            - self.weights.w_cost * cost;

        if score.is_finite() {
            score
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// A scored candidate: a tool ranked for one capability request. Carries a
/// strong reference to the tool so it can be executed without a second
/// registry lookup.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The candidate tool's id.
    pub tool_id: String,
    /// Its computed score.
    pub score: f64,
    /// Strong reference to the tool, for execution.
    pub tool: Arc<Tool>,
}

/// Score and sort candidates descending by score, stable on ties (input
/// order preserved among equal scores, non-finite scores sort last).
pub fn rank<'a>(
    tools: impl IntoIterator<Item = &'a Arc<Tool>>,
    scorer: &dyn Scorer,
) -> Vec<ScoredCandidate> {
    let mut candidates: Vec<ScoredCandidate> = tools
        .into_iter()
        .map(|tool| {
            let score = scorer.score(tool);
            let score = if score.is_finite() { score } else { f64::NEG_INFINITY };
            ScoredCandidate { tool_id: tool.id.clone(), score, tool: tool.clone() }
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::{Capability, Sla};

    fn tool(id: &str, p95_ms: Option<u32>, cost: Option<f64>) -> Arc<Tool> {
        Arc::new(Tool {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            description: None,
            capabilities: vec![Capability {
                name: "cap".into(),
                inputs: Default::default(),
                outputs: Default::default(),
            }],
            cost_estimate: cost,
            sla: p95_ms.map(|p95_ms| Sla { p95_ms, success_rate_min: 0.9 }),
            preconditions: None,
            endpoint: None,
        })
    }

    #[test]
    fn lower_latency_scores_higher_all_else_equal() {
        let scorer = DefaultScorer::new();
        let fast = tool("fast", Some(100), Some(0.0));
        let slow = tool("slow", Some(4000), Some(0.0));
        assert!(scorer.score(&fast) > scorer.score(&slow));
    }

    #[test]
    fn higher_cost_scores_lower_all_else_equal() {
        let scorer = DefaultScorer::new();
        let cheap = tool("cheap", Some(200), Some(0.0));
        let pricey = tool("pricey", Some(200), Some(10.0));
        assert!(scorer.score(&cheap) > scorer.score(&pricey));
    }

    #[test]
    fn missing_sla_defaults_to_3000ms() {
        let scorer = DefaultScorer::new();
        let missing = tool("missing", None, Some(0.0));
        let explicit_3000 = tool("explicit", Some(3000), Some(0.0));
        assert!((scorer.score(&missing) - scorer.score(&explicit_3000)).abs() < 1e-9);
    }

    #[test]
    fn p95_beyond_ceiling_clamps_sla_term_to_zero() {
        let scorer = DefaultScorer::new();
        let at_ceiling = tool("at", Some(5000), Some(0.0));
        let beyond = tool("beyond", Some(50_000), Some(0.0));
        assert!((scorer.score(&at_ceiling) - scorer.score(&beyond)).abs() < 1e-9);
    }

    #[test]
    fn rank_sorts_descending_and_is_stable_on_ties() {
        let scorer = DefaultScorer::new();
        let a = tool("a", Some(200), Some(1.0));
        let b = tool("b", Some(200), Some(1.0)); // ties with a
        let c = tool("c", Some(100), Some(0.0)); // best
        let ranked = rank([&a, &b, &c], &scorer);
        assert_eq!(ranked[0].tool_id, "c");
        assert_eq!(ranked[1].tool_id, "a");
        assert_eq!(ranked[2].tool_id, "b");
    }

    #[test]
    fn non_finite_score_sorts_last() {
        struct AlwaysNan;
        impl Scorer for AlwaysNan {
            fn score(&self, _tool: &Tool) -> f64 {
                f64::NAN
            }
        }
        let weird = AlwaysNan;
        let a = tool("a", Some(200), Some(0.0));
        let ranked = rank([&a], &weird);
        assert_eq!(ranked[0].score, f64::NEG_INFINITY);
    }
}
