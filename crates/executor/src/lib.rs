//! Executor interface: the planner's injected collaborator for outbound
//! tool calls. The concrete transport (HTTP, RPA) lives outside this crate;
//! this crate only defines the contract and a composed-deadline helper.

use async_trait::async_trait;
use router_core::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a single tool invocation attempt. Exactly one variant is
/// produced per call; implementations must never propagate a protocol
/// error as an `Err`/panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The tool call completed successfully.
    Success {
        /// Wall-clock latency of the attempt.
        latency_ms: u64,
        /// Tool-defined output, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    /// The tool call completed but reported failure.
    Failure {
        /// Short, stable failure code.
        error: String,
        /// Wall-clock latency, if measurable.
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
    /// Neither the endpoint timeout nor the overall deadline allowed the
    /// call to complete.
    Timeout {
        /// Which deadline fired (`"endpoint timeout"` or `"overall deadline
        /// exceeded"`).
        error: String,
        /// Wall-clock latency, if measurable.
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
}

/// Executes a tool call over its declared transport.
///
/// Implementations must (a) honor `overall_deadline` in addition to (b)
/// the tool's own `endpoint.timeout_ms`, and (c) report every outcome —
/// including a transport error — as an [`ExecutionResult`] rather than an
/// `Err`/panic; the planner normalizes any violation of that contract.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke `tool` with `input`, racing it against `overall_deadline`
    /// when present.
    async fn execute(
        &self,
        tool: &Tool,
        input: &Value,
        overall_deadline: Option<Instant>,
    ) -> ExecutionResult;
}

/// Races `attempt` against both the endpoint's own timeout and an optional
/// overall deadline, reporting whichever fires first as a `Timeout`.
/// Intended as the common core of a real `ToolExecutor`'s `execute`.
pub async fn with_composed_deadline<F>(
    endpoint_timeout_ms: u64,
    overall_deadline: Option<Instant>,
    attempt: F,
) -> ExecutionResult
where
    F: Future<Output = Result<Value, String>>,
{
    let started = Instant::now();
    tokio::pin!(attempt);
    let endpoint_sleep = tokio::time::sleep(Duration::from_millis(endpoint_timeout_ms.max(1)));
    tokio::pin!(endpoint_sleep);

    let outcome = if let Some(deadline) = overall_deadline {
        tokio::select! {
            res = &mut attempt => Ok(res),
            () = &mut endpoint_sleep => Err("endpoint timeout".to_string()),
            () = tokio::time::sleep_until(deadline) => Err("overall deadline exceeded".to_string()),
        }
    } else {
        tokio::select! {
            res = &mut attempt => Ok(res),
            () = &mut endpoint_sleep => Err("endpoint timeout".to_string()),
        }
    };

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(Ok(output)) => ExecutionResult::Success { latency_ms, output: Some(output) },
        Ok(Err(error)) => ExecutionResult::Failure { error, latency_ms: Some(latency_ms) },
        Err(error) => ExecutionResult::Timeout { error, latency_ms: Some(latency_ms) },
    }
}

/// A test double returning pre-scripted results per tool id after a
/// simulated delay. Used by planner unit tests to exercise the state
/// machine without a real transport.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, (ExecutionResult, Duration)>>,
}

impl ScriptedExecutor {
    /// Build an executor with no scripted tools; unscripted tools fail
    /// with `NO_SCRIPT`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result (and simulated delay) for a tool id.
    pub fn script(&self, tool_id: impl Into<String>, result: ExecutionResult, delay: Duration) {
        self.scripts.lock().expect("script map poisoned").insert(tool_id.into(), (result, delay));
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        tool: &Tool,
        _input: &Value,
        overall_deadline: Option<Instant>,
    ) -> ExecutionResult {
        let (result, delay) = {
            let scripts = self.scripts.lock().expect("script map poisoned");
            scripts.get(&tool.id).cloned().unwrap_or_else(|| {
                (ExecutionResult::Failure { error: "NO_SCRIPT".into(), latency_ms: None }, Duration::ZERO)
            })
        };
        if let Some(deadline) = overall_deadline {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = tokio::time::sleep_until(deadline) => {
                    return ExecutionResult::Timeout {
                        error: "overall deadline exceeded".into(),
                        latency_ms: None,
                    };
                }
            }
        } else {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn success_within_both_deadlines() {
        let result = with_composed_deadline(1000, None, async { Ok(json!({"ok": true})) }).await;
        assert!(matches!(result, ExecutionResult::Success { .. }));
    }

    #[tokio::test]
    async fn endpoint_timeout_fires_before_attempt_completes() {
        let result =
            with_composed_deadline(10, None, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!({}))
            })
            .await;
        assert!(matches!(result, ExecutionResult::Timeout { .. }));
    }

    #[tokio::test]
    async fn overall_deadline_fires_before_endpoint_timeout() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let result =
            with_composed_deadline(1000, Some(deadline), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!({}))
            })
            .await;
        assert!(matches!(result, ExecutionResult::Timeout { error, .. } if error == "overall deadline exceeded"));
    }

    #[tokio::test]
    async fn failure_is_reported_not_propagated() {
        let result = with_composed_deadline(1000, None, async { Err("BAD_INPUT".to_string()) }).await;
        assert!(matches!(result, ExecutionResult::Failure { error, .. } if error == "BAD_INPUT"));
    }

    fn sample_tool(id: &str) -> Tool {
        Tool {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            description: None,
            capabilities: vec![router_core::Capability {
                name: "cap".into(),
                inputs: Default::default(),
                outputs: Default::default(),
            }],
            cost_estimate: None,
            sla: None,
            preconditions: None,
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn scripted_executor_returns_configured_result() {
        let exec = ScriptedExecutor::new();
        exec.script("fast", ExecutionResult::Success { latency_ms: 5, output: None }, Duration::ZERO);
        let result = exec.execute(&sample_tool("fast"), &json!({}), None).await;
        assert!(matches!(result, ExecutionResult::Success { .. }));
    }

    #[tokio::test]
    async fn scripted_executor_defaults_unscripted_tool_to_no_script_failure() {
        let exec = ScriptedExecutor::new();
        let result = exec.execute(&sample_tool("ghost"), &json!({}), None).await;
        assert!(matches!(result, ExecutionResult::Failure { error, .. } if error == "NO_SCRIPT"));
    }

    #[tokio::test]
    async fn scripted_executor_honors_overall_deadline() {
        let exec = ScriptedExecutor::new();
        exec.script(
            "slow",
            ExecutionResult::Success { latency_ms: 5, output: None },
            Duration::from_millis(200),
        );
        let deadline = Instant::now() + Duration::from_millis(10);
        let result = exec.execute(&sample_tool("slow"), &json!({}), Some(deadline)).await;
        assert!(matches!(result, ExecutionResult::Timeout { .. }));
    }
}
