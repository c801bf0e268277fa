//! Chat completion client
//!
//! [`ChatModel`] is the seam the agent loop talks through; [`OpenAiClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{ChatMessage, Tool};
use crate::metrics::LLM_CALL_DURATION;

/// Default model for the coding agent
pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// Default sampling temperature for the coding agent
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Error type for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from model")]
    EmptyResponse,
}

/// A language model that can answer a conversation, optionally calling tools
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, used for logs and metrics
    fn model_name(&self) -> &str;

    /// Run one completion over `messages` and return the assistant message
    async fn chat(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<ChatMessage, ChatError>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for OpenAI-compatible chat completion endpoints
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://api.openai.com/v1"
    /// * `api_key` - Bearer token
    /// * `model` - Model name, e.g. "gpt-4.1"
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<ChatMessage, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let purpose = if tools.is_empty() { "generate" } else { "agent" };
        let start = Instant::now();

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        LLM_CALL_DURATION
            .with_label_values(&[&self.model, purpose])
            .observe(start.elapsed().as_secs_f64());

        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let completion: CompletionResponse = serde_json::from_str(&text)?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ChatError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_chat_sends_tools_and_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4.1",
                "tools": [{"type": "function", "function": {"name": "terminal"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "terminal", "arguments": "{\"command\":\"ls\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", DEFAULT_MODEL);
        let tool = Tool::function("terminal", "Run commands", serde_json::json!({"type": "object"}));
        let reply = client.chat(&[ChatMessage::user("hi")], &[tool]).await.unwrap();

        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.requested_tools().len(), 1);
        assert_eq!(reply.requested_tools()[0].function.arguments, "{\"command\":\"ls\"}");
    }

    #[tokio::test]
    async fn test_chat_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", DEFAULT_MODEL);
        let err = client.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_chat_without_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", DEFAULT_MODEL);
        let err = client.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyResponse));
    }
}
