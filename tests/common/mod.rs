//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use forgeloop::agent::prompts::TITLE_PROMPT;
use forgeloop::agent::{AgentConfig, AgentController, CheckpointStore, MemoryCheckpointStore};
use forgeloop::conversation::MemoryConversationStore;
use forgeloop::llm::{ChatError, ChatMessage, ChatModel, Tool, ToolCall};
use forgeloop::sandbox::{CommandOutput, SandboxError, SandboxHandle, SandboxProvider, SANDBOX_TIMEOUT};

pub const SANDBOX_DOMAIN: &str = "sandbox.test";

// ═══════════════════════════════════════════════════════════════════════════
// ScriptedModel
// ═══════════════════════════════════════════════════════════════════════════

/// Chat model that replays canned agent replies
///
/// Agent calls (with tools) pop from the script; once it is empty the model
/// keeps answering with plain text that never completes. Generator calls
/// (without tools) get the title or response reply depending on the prompt.
pub struct ScriptedModel {
    script: Mutex<VecDeque<ChatMessage>>,
    title: ChatMessage,
    response: ChatMessage,
    agent_calls: Mutex<Vec<Vec<ChatMessage>>>,
    generator_calls: AtomicUsize,
    /// Remaining generator calls that fail before succeeding
    failing_generator_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: Vec<ChatMessage>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            title: ChatMessage::assistant("Todo App"),
            response: ChatMessage::assistant("Your todo app is ready."),
            agent_calls: Mutex::new(Vec::new()),
            generator_calls: AtomicUsize::new(0),
            failing_generator_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_title(mut self, title: ChatMessage) -> Self {
        self.title = title;
        self
    }

    pub fn failing_generator_calls(self, count: usize) -> Self {
        self.failing_generator_calls.store(count, Ordering::SeqCst);
        self
    }

    /// Context sent on every agent call, in order
    pub fn agent_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.agent_calls.lock().unwrap().clone()
    }

    pub fn agent_call_count(&self) -> usize {
        self.agent_calls.lock().unwrap().len()
    }

    pub fn generator_call_count(&self) -> usize {
        self.generator_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[Tool]) -> Result<ChatMessage, ChatError> {
        if tools.is_empty() {
            self.generator_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing_generator_calls.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_generator_calls.store(failing - 1, Ordering::SeqCst);
                return Err(ChatError::EmptyResponse);
            }
            let is_title = messages.first().and_then(ChatMessage::text).as_deref() == Some(TITLE_PROMPT);
            return Ok(if is_title { self.title.clone() } else { self.response.clone() });
        }

        self.agent_calls.lock().unwrap().push(messages.to_vec());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatMessage::assistant("Still working on it.")))
    }
}

/// Assistant reply that only requests tools
pub fn tool_reply(calls: Vec<ToolCall>) -> ChatMessage {
    let mut message = ChatMessage::assistant("");
    message.content = None;
    message.tool_calls = Some(calls);
    message
}

pub fn write_call(id: &str, files: &[(&str, &str)]) -> ToolCall {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(path, content)| serde_json::json!({"path": path, "content": content}))
        .collect();
    ToolCall::new(id, "createOrUpdateFiles", serde_json::json!({ "files": files }))
}

pub fn terminal_call(id: &str, command: &str) -> ToolCall {
    ToolCall::new(id, "terminal", serde_json::json!({ "command": command }))
}

pub fn read_call(id: &str, paths: &[&str]) -> ToolCall {
    ToolCall::new(id, "readFiles", serde_json::json!({ "files": paths }))
}

pub fn summary_reply(summary: &str) -> ChatMessage {
    ChatMessage::assistant(format!("Done.\n<task_summary>{}</task_summary>", summary))
}

/// Text of the tool result answering `call_id`
pub fn tool_result(messages: &[ChatMessage], call_id: &str) -> Option<String> {
    messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some(call_id))
        .and_then(ChatMessage::text)
}

// ═══════════════════════════════════════════════════════════════════════════
// FakeSandbox
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct FakeBox {
    pub files: HashMap<String, String>,
    pub commands: Vec<String>,
    pub connects: usize,
}

/// Sandboxes that outlive any single provider instance
#[derive(Default)]
pub struct SandboxRegistry {
    boxes: Mutex<HashMap<String, FakeBox>>,
    created: AtomicUsize,
    fail_create: AtomicBool,
    failing_commands: Mutex<Vec<String>>,
    failing_writes: Mutex<Vec<String>>,
}

impl SandboxRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_command(&self, command: &str) {
        self.failing_commands.lock().unwrap().push(command.to_string());
    }

    pub fn fail_write(&self, path: &str) {
        self.failing_writes.lock().unwrap().push(path.to_string());
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sandbox(&self, sandbox_id: &str) -> Option<FakeBox> {
        self.boxes.lock().unwrap().get(sandbox_id).cloned()
    }
}

/// Provider with no state of its own; everything lives in the registry
pub struct FakeSandbox {
    registry: Arc<SandboxRegistry>,
}

impl FakeSandbox {
    pub fn new(registry: Arc<SandboxRegistry>) -> Self {
        Self { registry }
    }

    fn with_box<T>(&self, handle: &SandboxHandle, f: impl FnOnce(&mut FakeBox) -> T) -> Result<T, SandboxError> {
        let mut boxes = self.registry.boxes.lock().unwrap();
        let sandbox = boxes.get_mut(&handle.sandbox_id).ok_or_else(|| SandboxError::NotFound {
            sandbox_id: handle.sandbox_id.clone(),
        })?;
        Ok(f(sandbox))
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    async fn create(&self, template: &str) -> Result<SandboxHandle, SandboxError> {
        if self.registry.fail_create.load(Ordering::SeqCst) {
            return Err(SandboxError::Provisioning {
                template: template.to_string(),
                reason: "capacity exhausted".to_string(),
            });
        }
        let n = self.registry.created.fetch_add(1, Ordering::SeqCst) + 1;
        let sandbox_id = format!("sbx-{}", n);
        self.registry.boxes.lock().unwrap().insert(sandbox_id.clone(), FakeBox::default());
        Ok(SandboxHandle::new(sandbox_id, template, SANDBOX_DOMAIN, SANDBOX_TIMEOUT))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError> {
        let mut boxes = self.registry.boxes.lock().unwrap();
        let sandbox = boxes.get_mut(sandbox_id).ok_or_else(|| SandboxError::NotFound {
            sandbox_id: sandbox_id.to_string(),
        })?;
        sandbox.connects += 1;
        Ok(SandboxHandle::new(sandbox_id, "", SANDBOX_DOMAIN, SANDBOX_TIMEOUT).mark_connected())
    }

    async fn run_command(&self, handle: &SandboxHandle, command: &str) -> Result<CommandOutput, SandboxError> {
        let failing = self.registry.failing_commands.lock().unwrap().iter().any(|c| c == command);
        self.with_box(handle, |sandbox| {
            sandbox.commands.push(command.to_string());
            if failing {
                CommandOutput {
                    stdout: "partial output".to_string(),
                    stderr: format!("{}: command failed", command),
                    exit_code: 1,
                }
            } else {
                CommandOutput {
                    stdout: format!("ran {}", command),
                    stderr: String::new(),
                    exit_code: 0,
                }
            }
        })
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> Result<(), SandboxError> {
        if self.registry.failing_writes.lock().unwrap().iter().any(|p| p == path) {
            return Err(SandboxError::Api {
                endpoint: format!("/files?path={}", path),
                status: 500,
                body: "disk full".to_string(),
            });
        }
        self.with_box(handle, |sandbox| {
            sandbox.files.insert(path.to_string(), content.to_string());
        })
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String, SandboxError> {
        self.with_box(handle, |sandbox| sandbox.files.get(path).cloned())?
            .ok_or_else(|| SandboxError::FileNotFound { path: path.to_string() })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub model: Arc<ScriptedModel>,
    pub registry: Arc<SandboxRegistry>,
    pub store: Arc<MemoryConversationStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub controller: Arc<AgentController>,
}

impl Harness {
    pub fn new(model: ScriptedModel) -> Self {
        Self::with_config(model, AgentConfig::default())
    }

    pub fn with_config(model: ScriptedModel, config: AgentConfig) -> Self {
        Self::build(
            Arc::new(model),
            SandboxRegistry::new(),
            Arc::new(MemoryConversationStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
            config,
        )
    }

    /// A second harness sharing sandboxes, stores and checkpoints, as a
    /// restarted process would
    pub fn restarted(&self) -> Self {
        Self::build(
            self.model.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.checkpoints.clone(),
            self.controller.config().clone(),
        )
    }

    fn build(
        model: Arc<ScriptedModel>,
        registry: Arc<SandboxRegistry>,
        store: Arc<MemoryConversationStore>,
        checkpoints: Arc<MemoryCheckpointStore>,
        config: AgentConfig,
    ) -> Self {
        let checkpoint_store: Arc<dyn CheckpointStore> = checkpoints.clone();
        let controller = AgentController::new(
            config,
            model.clone(),
            Arc::new(FakeSandbox::new(registry.clone())),
            store.clone(),
            store.clone(),
            checkpoint_store,
        );
        Self {
            model,
            registry,
            store,
            checkpoints,
            controller: Arc::new(controller),
        }
    }
}
