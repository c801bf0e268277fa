//! Conversation history and result persistence
//!
//! The orchestrator only sees conversations through two narrow traits:
//! [`HistorySource`] seeds the first agent step and [`ResultSink`] receives the
//! single outcome of each run. Two stores implement both: an in-memory one
//! for embedding and tests, and a JSON-file one used by the CLI.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text shown to the user when a run ends without a usable result
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Error type for conversation stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt conversation record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Who wrote a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Whether a stored message is a normal result or an error notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Result,
    Error,
}

/// Generated app attached to a successful assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// A message as persisted in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            kind: MessageKind::Result,
            fragment: None,
            created_at: Utc::now(),
        }
    }

    /// Project a run outcome into the assistant message that records it
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success {
                title,
                message,
                files,
                url,
            } => Self {
                role: MessageRole::Assistant,
                content: message.clone(),
                kind: MessageKind::Result,
                fragment: Some(Fragment {
                    sandbox_url: url.clone(),
                    title: title.clone(),
                    files: files.clone(),
                }),
                created_at: Utc::now(),
            },
            RunOutcome::Error { message } => Self {
                role: MessageRole::Assistant,
                content: message.clone(),
                kind: MessageKind::Error,
                fragment: None,
                created_at: Utc::now(),
            },
        }
    }
}

/// The single recorded result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Success {
        title: String,
        message: String,
        files: BTreeMap<String, String>,
        url: String,
    },
    Error {
        message: String,
    },
}

impl RunOutcome {
    pub fn error() -> Self {
        RunOutcome::Error {
            message: ERROR_MESSAGE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success { .. } => "success",
            RunOutcome::Error { .. } => "error",
        }
    }
}

/// Source of prior conversation messages
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// The most recent `limit` messages, oldest first
    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Destination for run outcomes
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record_result(&self, conversation_id: &str, outcome: &RunOutcome) -> Result<(), StoreError>;
}

fn tail(messages: &[StoredMessage], limit: usize) -> Vec<StoredMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..].to_vec()
}

/// Conversation store kept in process memory
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, conversation_id: &str, message: StoredMessage) {
        let mut conversations = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    /// All messages of a conversation, oldest first
    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        let conversations = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        conversations.get(conversation_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HistorySource for MemoryConversationStore {
    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(tail(&self.messages(conversation_id), limit))
    }
}

#[async_trait]
impl ResultSink for MemoryConversationStore {
    async fn record_result(&self, conversation_id: &str, outcome: &RunOutcome) -> Result<(), StoreError> {
        self.append(conversation_id, StoredMessage::from_outcome(outcome));
        Ok(())
    }
}

/// Conversation store with one JSON file per conversation
pub struct FileConversationStore {
    base_dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", conversation_id))
    }

    /// All messages of a conversation, oldest first
    pub async fn load(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let path = self.conversation_path(conversation_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn append(&self, conversation_id: &str, message: StoredMessage) -> Result<(), StoreError> {
        let mut messages = self.load(conversation_id).await?;
        messages.push(message);
        let json = serde_json::to_string_pretty(&messages)?;

        let path = self.conversation_path(conversation_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl HistorySource for FileConversationStore {
    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(tail(&self.load(conversation_id).await?, limit))
    }
}

#[async_trait]
impl ResultSink for FileConversationStore {
    async fn record_result(&self, conversation_id: &str, outcome: &RunOutcome) -> Result<(), StoreError> {
        self.append(conversation_id, StoredMessage::from_outcome(outcome)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_messages_are_oldest_first_and_capped() {
        let store = MemoryConversationStore::new();
        for i in 0..8 {
            store.append("c1", StoredMessage::user(format!("msg {}", i)));
        }

        let recent = store.fetch_recent_messages("c1", 5).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 3", "msg 4", "msg 5", "msg 6", "msg 7"]);
    }

    #[tokio::test]
    async fn test_error_outcome_is_stored_as_error_message() {
        let store = MemoryConversationStore::new();
        store.record_result("c1", &RunOutcome::error()).await.unwrap();

        let messages = store.messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Error);
        assert_eq!(messages[0].content, ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_file_store_round_trips_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path()).unwrap();

        store.append("c1", StoredMessage::user("build a todo app")).await.unwrap();
        let outcome = RunOutcome::Success {
            title: "Todo App".to_string(),
            message: "Here is your todo app.".to_string(),
            files: BTreeMap::from([("app/page.tsx".to_string(), "export {}".to_string())]),
            url: "https://3000-sbx.sandbox.test".to_string(),
        };
        store.record_result("c1", &outcome).await.unwrap();

        let messages = store.fetch_recent_messages("c1", 5).await.unwrap();
        assert_eq!(messages.len(), 2);
        let fragment = messages[1].fragment.as_ref().unwrap();
        assert_eq!(fragment.title, "Todo App");
        assert_eq!(fragment.files["app/page.tsx"], "export {}");
    }

    #[tokio::test]
    async fn test_file_store_ignores_interrupted_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path()).unwrap();
        store.append("c1", StoredMessage::user("build a todo app")).await.unwrap();

        // Torn output from a crash mid-write stays in the temp file
        let tmp = dir.path().join("c1.json.tmp");
        std::fs::write(&tmp, "[{\"role\": \"assis").unwrap();
        assert_eq!(store.load("c1").await.unwrap().len(), 1);

        store.append("c1", StoredMessage::user("add dark mode")).await.unwrap();
        assert_eq!(store.load("c1").await.unwrap().len(), 2);
        assert!(!tmp.exists());
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(RunOutcome::error()).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["message"], ERROR_MESSAGE);
    }
}
