//! Agent module for sandboxed code generation
//!
//! This module provides the agent loop that orchestrates:
//! - An OpenAI-compatible model with tool calling
//! - One remote sandbox per run, reconnected by id for every tool call
//! - Durable, individually retriable steps
//!
//! # Architecture
//!
//! ```text
//! RunEvent → Dispatcher (quota gate, run id, retries)
//!                  ↓
//!           AgentController → get-sandbox-id, get-previous-messages
//!                  ↓
//!           NetworkController ⇄ Router
//!                  ↓
//!           AgentStep → model (with tools)
//!                  ↓
//!           ToolRegistry → terminal / createOrUpdateFiles / readFiles
//!                  ↓
//!           SharedState (files, summary) → loop or DONE
//!                  ↓
//!           get-sandbox-url → ResultFinalizer → save-result
//! ```

pub mod checkpoint;
pub mod completion;
pub mod controller;
pub mod finalizer;
pub mod network;
pub mod prompts;
pub mod router;
pub mod state;
pub mod step;
pub mod tools;
pub mod trigger;

pub use checkpoint::{
    CheckpointError, CheckpointStore, CheckpointSummary, FileCheckpointStore, MemoryCheckpointStore, RunCheckpoint,
    StepRunner,
};
pub use completion::Completion;
pub use controller::{AgentConfig, AgentController, AgentError, RunReport};
pub use finalizer::ResultFinalizer;
pub use network::{NetworkController, NetworkResult, Termination, Transition, MAX_ITERATIONS};
pub use router::{Router, SingleAgentRouter};
pub use state::SharedState;
pub use step::{AgentStep, StepReport};
pub use tools::{FileEntry, ToolContext, ToolName, ToolRegistry, ToolRequest};
pub use trigger::{DispatchError, Dispatcher, RunEvent};
