//! Agent Controller - end-to-end orchestration of one run
//!
//! A run is a fixed sequence of durable steps:
//!
//! ```text
//! get-sandbox-id → get-previous-messages → network (code-agent, tools)*
//!     → get-sandbox-url → fragment-title-generator → response-generator
//!     → save-result
//! ```
//!
//! Every step is checkpointed, so calling [`AgentController::run`] again with
//! the same run id replays finished steps and continues where the previous
//! attempt stopped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use super::checkpoint::{CheckpointError, CheckpointStore, StepRunner};
use super::finalizer::ResultFinalizer;
use super::network::{NetworkController, Termination, MAX_ITERATIONS};
use super::prompts::CODE_AGENT_PROMPT;
use super::router::SingleAgentRouter;
use super::state::SharedState;
use super::step::AgentStep;
use super::tools::ToolRegistry;
use crate::conversation::{HistorySource, MessageRole, ResultSink, RunOutcome, StoreError, StoredMessage};
use crate::llm::{ChatError, ChatMessage, ChatModel, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::metrics::{AGENT_ITERATIONS, RUNS_TOTAL};
use crate::sandbox::{SandboxError, SandboxProvider};

/// Name of the coding agent, also its checkpoint step name
pub const CODE_AGENT: &str = "code-agent";

/// Sandbox template with the Next.js toolchain preinstalled
pub const DEFAULT_TEMPLATE: &str = "vibe-nextjs-kc-test-2";

/// Port the template's dev server listens on
pub const PREVIEW_PORT: u16 = 3000;

/// Prior messages used to seed the first agent step
pub const HISTORY_LIMIT: usize = 5;

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model for the coding agent (e.g., "gpt-4.1")
    pub model: String,
    /// Sampling temperature for the coding agent
    pub temperature: f32,
    /// Maximum agent steps before the run is declared inconclusive
    pub max_iterations: usize,
    /// How many prior conversation messages to include
    pub history_limit: usize,
    /// Sandbox template to provision from
    pub sandbox_template: String,
    /// Port whose URL is returned as the preview
    pub preview_port: u16,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_iterations: MAX_ITERATIONS,
            history_limit: HISTORY_LIMIT,
            sandbox_template: DEFAULT_TEMPLATE.to_string(),
            preview_port: PREVIEW_PORT,
            system_prompt: None,
        }
    }
}

/// Error type for agent runs
///
/// Every variant is fatal to the current attempt. Whether the run is retried
/// is up to the caller (see [`super::trigger::Dispatcher`]).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Sandbox provisioning failed: {0}")]
    Provisioning(#[from] SandboxError),

    #[error("Model invocation failed: {0}")]
    Model(#[from] ChatError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Conversation store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub conversation_id: String,
    pub outcome: RunOutcome,
    /// Agent steps taken, replayed steps included
    pub iterations: usize,
    pub completed: bool,
}

/// Agent Controller orchestrating the sandbox, the model and the stores
pub struct AgentController {
    config: AgentConfig,
    model: Arc<dyn ChatModel>,
    sandbox: Arc<dyn SandboxProvider>,
    history: Arc<dyn HistorySource>,
    sink: Arc<dyn ResultSink>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `config` - Run behaviour
    /// * `model` - Chat model for the agent and the result generators
    /// * `sandbox` - Provider for the run's sandbox
    /// * `history` - Source of prior conversation messages
    /// * `sink` - Destination for the run outcome
    /// * `checkpoints` - Storage for step checkpoints
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ChatModel>,
        sandbox: Arc<dyn SandboxProvider>,
        history: Arc<dyn HistorySource>,
        sink: Arc<dyn ResultSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            model,
            sandbox,
            history,
            sink,
            checkpoints,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Run (or resume) one orchestration
    ///
    /// # Arguments
    /// * `run_id` - Identifier of the run; reusing it resumes from checkpoints
    /// * `conversation_id` - Conversation the request belongs to
    /// * `request` - The user's request text
    pub async fn run(&self, run_id: &str, conversation_id: &str, request: &str) -> Result<RunReport, AgentError> {
        let root_span = info_span!(
            "agent_run",
            run_id = %run_id,
            conversation_id = %conversation_id,
            model = %self.config.model,
            otel.name = "agent_run"
        );

        async {
            info!(request_len = request.len(), "Starting agent run");

            let steps = StepRunner::open(self.checkpoints.clone(), run_id, conversation_id, request).await?;

            let sandbox_id: String = steps
                .run("get-sandbox-id", || async {
                    let handle = self.sandbox.create(&self.config.sandbox_template).await?;
                    info!(sandbox_id = %handle.sandbox_id, template = %handle.template, "Sandbox created");
                    Ok::<_, AgentError>(handle.sandbox_id)
                })
                .await?;

            let previous: Vec<StoredMessage> = steps
                .run("get-previous-messages", || async {
                    let messages = self
                        .history
                        .fetch_recent_messages(conversation_id, self.config.history_limit)
                        .await?;
                    Ok::<_, AgentError>(messages)
                })
                .await?;

            let messages = self.seed_messages(&previous, request);
            let network = self.network();
            let result = network
                .run(SharedState::new(), messages, &sandbox_id, &steps)
                .await?;

            AGENT_ITERATIONS.observe(result.iterations as f64);

            let sandbox_url: String = steps
                .run("get-sandbox-url", || async {
                    let handle = self.sandbox.connect(&sandbox_id).await?;
                    Ok::<_, AgentError>(handle.exposed_url(self.config.preview_port))
                })
                .await?;

            let finalizer = ResultFinalizer::new(self.model.clone());
            let outcome = finalizer.finalize(&result.state, &sandbox_url, &steps).await?;

            let _: () = steps
                .run("save-result", || async {
                    self.sink.record_result(conversation_id, &outcome).await?;
                    Ok::<_, AgentError>(())
                })
                .await?;

            steps.finish(outcome.label()).await?;
            RUNS_TOTAL.with_label_values(&[outcome.label()]).inc();

            info!(
                outcome = outcome.label(),
                iterations = result.iterations,
                files = result.state.files.len(),
                "Agent run finished"
            );

            Ok::<_, AgentError>(RunReport {
                run_id: run_id.to_string(),
                conversation_id: conversation_id.to_string(),
                outcome,
                iterations: result.iterations,
                completed: result.termination == Termination::Completed,
            })
        }
        .instrument(root_span)
        .await
    }

    /// Record the error outcome for a run that will not be retried
    ///
    /// Goes through the `save-result` step, so a run whose result was already
    /// saved is not recorded twice.
    pub async fn record_failure(&self, run_id: &str, conversation_id: &str, request: &str) -> Result<(), AgentError> {
        let outcome = RunOutcome::error();
        match StepRunner::open(self.checkpoints.clone(), run_id, conversation_id, request).await {
            Ok(steps) => {
                let _: () = steps
                    .run("save-result", || async {
                        self.sink.record_result(conversation_id, &outcome).await?;
                        Ok::<_, AgentError>(())
                    })
                    .await?;
                steps.finish("failed").await?;
            }
            Err(e) => {
                error!(run_id, error = %e, "Checkpoint unavailable, recording failure directly");
                self.sink.record_result(conversation_id, &outcome).await?;
            }
        }
        Ok(())
    }

    fn network(&self) -> NetworkController {
        let tools = Arc::new(ToolRegistry::new(self.sandbox.clone()));
        let agent = AgentStep::new(CODE_AGENT, self.model.clone(), tools);
        NetworkController::new(vec![agent], Box::new(SingleAgentRouter))
            .with_max_iterations(self.config.max_iterations)
    }

    /// System prompt, prior conversation, then the request
    fn seed_messages(&self, previous: &[StoredMessage], request: &str) -> Vec<ChatMessage> {
        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| CODE_AGENT_PROMPT.to_string());

        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(seed_history(previous, request));
        messages.push(ChatMessage::user(request));
        messages
    }
}

/// Convert stored messages, dropping the request itself if it was already stored
pub fn seed_history(previous: &[StoredMessage], request: &str) -> Vec<ChatMessage> {
    let mut previous = previous;
    if let Some((last, rest)) = previous.split_last() {
        if last.role == MessageRole::User && last.content.trim() == request.trim() {
            previous = rest;
        }
    }

    previous
        .iter()
        .map(|message| match message.role {
            MessageRole::User => ChatMessage::user(message.content.as_str()),
            MessageRole::Assistant => ChatMessage::assistant(message.content.as_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.preview_port, 3000);
    }

    #[test]
    fn test_seed_history_drops_stored_request() {
        let previous = vec![
            StoredMessage::user("build a todo app"),
            StoredMessage::from_outcome(&RunOutcome::error()),
            StoredMessage::user("add dark mode"),
        ];
        let seeded = seed_history(&previous, "add dark mode");
        assert_eq!(seeded.len(), 2);
        assert_eq!(seeded[0].role, Role::User);
        assert_eq!(seeded[1].role, Role::Assistant);
    }

    #[test]
    fn test_seed_history_keeps_unrelated_messages() {
        let previous = vec![StoredMessage::user("build a todo app")];
        let seeded = seed_history(&previous, "add dark mode");
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].text().as_deref(), Some("build a todo app"));
    }
}
