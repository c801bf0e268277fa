//! Prometheus metrics for orchestration runs
//!
//! All metrics live in the default registry so they can be scraped or dumped
//! with [`gather`].
//!
//! | Metric | Labels |
//! |---|---|
//! | `forgeloop_runs_total` | outcome |
//! | `forgeloop_agent_iterations` | |
//! | `forgeloop_tool_calls_total` | tool, status |
//! | `forgeloop_llm_call_duration_seconds` | model, purpose |
//! | `forgeloop_sandbox_operations_total` | operation, status |
//! | `forgeloop_step_replays_total` | |

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Finished runs by outcome: success, error, failed, quota_exceeded
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "forgeloop_runs_total",
        "Orchestration runs by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");

    /// Agent steps taken per run
    pub static ref AGENT_ITERATIONS: Histogram = register_histogram!(
        "forgeloop_agent_iterations",
        "Agent steps taken per run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0]
    )
    .expect("metric can be registered");

    /// Tool invocations by tool name and status (ok, error)
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "forgeloop_tool_calls_total",
        "Tool invocations by tool and status",
        &["tool", "status"]
    )
    .expect("metric can be registered");

    /// Model call latency by model and purpose (agent, title, response)
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "forgeloop_llm_call_duration_seconds",
        "Model call latency",
        &["model", "purpose"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be registered");

    /// Sandbox control plane calls by operation and status
    pub static ref SANDBOX_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "forgeloop_sandbox_operations_total",
        "Sandbox operations by operation and status",
        &["operation", "status"]
    )
    .expect("metric can be registered");

    /// Steps answered from a checkpoint instead of being executed
    pub static ref STEP_REPLAYS: IntCounter = register_int_counter!(
        "forgeloop_step_replays_total",
        "Steps replayed from checkpoints"
    )
    .expect("metric can be registered");
}

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
