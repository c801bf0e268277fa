//! A single agent step: one model call and the tools it asks for

use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use super::checkpoint::StepRunner;
use super::completion::Completion;
use super::controller::AgentError;
use super::state::SharedState;
use super::tools::{ToolContext, ToolRegistry};
use crate::llm::{ChatMessage, ChatModel};

/// What one step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub tool_calls: usize,
    /// The reply carried a completion marker and the summary was set
    pub completed: bool,
}

/// One agent in the network: a model, a system prompt and a tool registry
pub struct AgentStep {
    name: String,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
}

impl AgentStep {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            name: name.into(),
            model,
            tools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the model once over `messages`, run the requested tools and
    /// fold their results into `state`
    ///
    /// The reply and every tool result are appended to `messages`. The model
    /// call is checkpointed under the agent's name.
    pub async fn run(
        &self,
        messages: &mut Vec<ChatMessage>,
        state: &mut SharedState,
        sandbox_id: &str,
        steps: &StepRunner,
    ) -> Result<StepReport, AgentError> {
        let definitions = self.tools.definitions();

        let llm_span = info_span!(
            "llm_call",
            agent = %self.name,
            model = %self.model.model_name(),
            context_len = messages.len(),
            otel.name = "llm_call"
        );

        let context: &[ChatMessage] = messages;
        let reply: ChatMessage = steps
            .run(&self.name, || async {
                self.model.chat(context, &definitions).await.map_err(AgentError::from)
            })
            .instrument(llm_span)
            .await?;

        let calls = reply.requested_tools().to_vec();
        let output_start = messages.len();
        messages.push(reply);

        let ctx = ToolContext { sandbox_id, steps };
        for call in &calls {
            debug!(tool = %call.function.name, call_id = %call.id, "Executing tool call");
            let content = self.tools.execute(call, ctx, state).await?;
            messages.push(ChatMessage::tool_result(call.id.clone(), content));
        }

        let completed = match Completion::detect(&messages[output_start..]) {
            Completion::Completed(summary) => {
                let set = state.set_summary_once(summary);
                if set {
                    info!(agent = %self.name, "Completion marker found");
                }
                set
            }
            Completion::Incomplete => false,
        };

        Ok(StepReport {
            tool_calls: calls.len(),
            completed,
        })
    }
}
