//! Turn the final run state into the outcome that gets persisted

use std::sync::Arc;

use tracing::{info, info_span, Instrument};

use super::checkpoint::StepRunner;
use super::controller::AgentError;
use super::prompts::{RESPONSE_PROMPT, TITLE_PROMPT};
use super::state::SharedState;
use crate::conversation::RunOutcome;
use crate::llm::{ChatMessage, ChatModel};

/// Title used when the title generator returns no text
pub const TITLE_FALLBACK: &str = "Fragment";

/// Message used when the response generator returns no text
pub const RESPONSE_FALLBACK: &str = "Here you go";

/// Success needs both a summary and at least one written file
pub fn is_success(state: &SharedState) -> bool {
    state.is_complete() && !state.files.is_empty()
}

/// Text of a generator reply, or the fallback
pub fn reply_text(reply: &ChatMessage, fallback: &str) -> String {
    reply
        .text()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Derives title and user-facing message for finished runs
pub struct ResultFinalizer {
    model: Arc<dyn ChatModel>,
}

impl ResultFinalizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Classify the run and build its outcome
    ///
    /// Error outcomes skip both generators.
    pub async fn finalize(
        &self,
        state: &SharedState,
        sandbox_url: &str,
        steps: &StepRunner,
    ) -> Result<RunOutcome, AgentError> {
        let summary = match state.summary() {
            Some(summary) if is_success(state) => summary,
            _ => {
                info!(
                    has_summary = state.is_complete(),
                    files = state.files.len(),
                    "Run classified as error"
                );
                return Ok(RunOutcome::error());
            }
        };

        let title = self.generate(steps, "fragment-title-generator", TITLE_PROMPT, summary, TITLE_FALLBACK).await?;
        let message = self.generate(steps, "response-generator", RESPONSE_PROMPT, summary, RESPONSE_FALLBACK).await?;

        Ok(RunOutcome::Success {
            title,
            message,
            files: state.files.clone(),
            url: sandbox_url.to_string(),
        })
    }

    async fn generate(
        &self,
        steps: &StepRunner,
        step: &str,
        prompt: &str,
        summary: &str,
        fallback: &str,
    ) -> Result<String, AgentError> {
        let span = info_span!("llm_call", agent = step, model = %self.model.model_name(), otel.name = "llm_call");
        let messages = [ChatMessage::system(prompt), ChatMessage::user(summary)];

        let reply: ChatMessage = steps
            .run(step, || async {
                self.model.chat(&messages, &[]).await.map_err(AgentError::from)
            })
            .instrument(span)
            .await?;

        Ok(reply_text(&reply, fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentPart, MessageContent};

    #[test]
    fn test_classification() {
        let mut state = SharedState::new();
        assert!(!is_success(&state));

        state.set_summary_once("<task_summary>Built a todo app</task_summary>");
        assert!(!is_success(&state), "summary without files is an error");

        state.merge_files([("index.html".to_string(), "<html></html>".to_string())]);
        assert!(is_success(&state));

        let mut files_only = SharedState::new();
        files_only.merge_files([("index.html".to_string(), "<html></html>".to_string())]);
        assert!(!is_success(&files_only), "files without summary is an error");
    }

    #[test]
    fn test_reply_text_concatenates_parts() {
        let mut reply = ChatMessage::assistant("");
        reply.content = Some(MessageContent::Parts(vec![
            ContentPart {
                kind: "text".to_string(),
                text: Some("Todo ".to_string()),
            },
            ContentPart {
                kind: "text".to_string(),
                text: Some("App".to_string()),
            },
        ]));
        assert_eq!(reply_text(&reply, TITLE_FALLBACK), "Todo App");
    }

    #[test]
    fn test_reply_text_fallbacks() {
        let mut empty = ChatMessage::assistant("");
        empty.content = None;
        assert_eq!(reply_text(&empty, TITLE_FALLBACK), "Fragment");

        let blank = ChatMessage::assistant("   ");
        assert_eq!(reply_text(&blank, RESPONSE_FALLBACK), "Here you go");
    }
}
