//! Forgeloop - agentic code generation against remote sandboxes
//!
//! This library drives an LLM coding agent through a bounded tool loop
//! (shell commands, file reads and writes) inside an ephemeral remote sandbox,
//! then turns the result into a titled, persisted outcome.
//!
//! # Modules
//!
//! - `agent` - Run orchestration: tools, agent step, loop, finalizer, checkpoints
//! - `sandbox` - Remote sandbox provider and control plane client
//! - `llm` - Chat types and the OpenAI-compatible client
//! - `conversation` - History source, result sink and stores
//! - `quota` - Credit gating before admission
//! - `config` - Environment configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use forgeloop::{AgentController, Dispatcher, RunEvent};
//!
//! let controller = Arc::new(AgentController::new(config, model, sandbox, store.clone(), store, checkpoints));
//! let dispatcher = Dispatcher::new(controller, Arc::new(CreditLimiter::with_defaults()));
//! let report = dispatcher.submit(RunEvent::new("conv-1", "Build a todo app")).await?;
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod metrics;
pub mod quota;
pub mod sandbox;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentError, Dispatcher, RunEvent, RunReport};
pub use conversation::{HistorySource, ResultSink, RunOutcome};
pub use sandbox::{SandboxHandle, SandboxProvider};
