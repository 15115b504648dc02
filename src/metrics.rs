//! Prometheus metrics for the agent workflow
//!
//! All metrics live in the default registry so a host process can expose
//! them with `prometheus::gather()`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter,
    CounterVec, Histogram, HistogramVec, IntCounter,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Workflow Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed workflow runs by outcome.
    ///
    /// Labels:
    /// - outcome: "result", "error" or "failed" (infrastructure fault)
    pub static ref WORKFLOW_RUNS: CounterVec = register_counter_vec!(
        "sandforge_workflow_runs_total",
        "Workflow runs by outcome",
        &["outcome"]
    ).expect("failed to register WORKFLOW_RUNS metric");

    /// Agent turns taken per run.
    pub static ref AGENT_TURNS: Histogram = register_histogram!(
        "sandforge_agent_turns",
        "Agent turns taken per workflow run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0]
    ).expect("failed to register AGENT_TURNS metric");

    /// Tool invocations by tool name and status.
    ///
    /// Labels:
    /// - tool: "terminal", "createOrUpdateFiles", "readFiles" or "unknown"
    /// - status: "ok" or "error"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "sandforge_tool_calls_total",
        "Tool invocations by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Durable Step Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Step executions by result.
    ///
    /// Labels:
    /// - result: "executed", "replayed", "retried" or "exhausted"
    pub static ref STEP_EXECUTIONS: CounterVec = register_counter_vec!(
        "sandforge_step_executions_total",
        "Durable step executions by result",
        &["result"]
    ).expect("failed to register STEP_EXECUTIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Collaborator Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Latency of chat completion calls, by model.
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "sandforge_llm_call_duration_seconds",
        "Chat completion latency",
        &["model"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    /// Sandboxes created.
    pub static ref SANDBOXES_CREATED: IntCounter = register_int_counter!(
        "sandforge_sandboxes_created_total",
        "Sandboxes created"
    ).expect("failed to register SANDBOXES_CREATED metric");
}

/// Encode the default registry in the Prometheus text format
pub fn render() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_metrics_render() {
        TOOL_CALLS.with_label_values(&["terminal", "ok"]).inc();
        SANDBOXES_CREATED.inc();
        let text = render();
        assert!(text.contains("sandforge_tool_calls_total"));
        assert!(text.contains("sandforge_sandboxes_created_total"));
    }
}
