//! Tool definitions and sandbox adapters
//!
//! The agent can call three tools. Each execution is its own durable step and
//! reconnects to the sandbox by identifier, so any single call can be retried
//! without repeating earlier ones.
//!
//! | Tool | Step | On failure |
//! |---|---|---|
//! | `terminal` | `terminal` | logged, model gets empty output |
//! | `createOrUpdateFiles` | `create-or-update-files` | logged, earlier writes kept |
//! | `readFiles` | `read-files` | model gets `Error reading files: ...` |
//!
//! Losing the sandbox is never soft: a failed reconnect, or a sandbox that
//! disappears mid-call, aborts the run as a provisioning error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use super::checkpoint::StepRunner;
use super::controller::AgentError;
use super::state::SharedState;
use crate::llm::{Tool, ToolCall};
use crate::metrics::TOOL_CALLS;
use crate::sandbox::{SandboxHandle, SandboxProvider};

/// The tools the agent may call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "terminal")]
    Terminal,
    #[serde(rename = "createOrUpdateFiles")]
    CreateOrUpdateFiles,
    #[serde(rename = "readFiles")]
    ReadFiles,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [ToolName::Terminal, ToolName::CreateOrUpdateFiles, ToolName::ReadFiles];

    /// Name exposed to the model
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Terminal => "terminal",
            ToolName::CreateOrUpdateFiles => "createOrUpdateFiles",
            ToolName::ReadFiles => "readFiles",
        }
    }

    /// Checkpoint step name for one execution
    pub fn step_name(&self) -> &'static str {
        match self {
            ToolName::Terminal => "terminal",
            ToolName::CreateOrUpdateFiles => "create-or-update-files",
            ToolName::ReadFiles => "read-files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Definition sent to the model
    pub fn definition(&self) -> Tool {
        match self {
            ToolName::Terminal => Tool::function(
                self.as_str(),
                "Run commands in the terminal",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Shell command to run"}
                    },
                    "required": ["command"]
                }),
            ),
            ToolName::CreateOrUpdateFiles => Tool::function(
                self.as_str(),
                "Create or update files in the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": {"type": "string"},
                                    "content": {"type": "string"}
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["files"]
                }),
            ),
            ToolName::ReadFiles => Tool::function(
                self.as_str(),
                "Read files from the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["files"]
                }),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TerminalParams {
    pub command: String,
}

/// One file, as written by `createOrUpdateFiles` or returned by `readFiles`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateOrUpdateFilesParams {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadFilesParams {
    pub files: Vec<String>,
}

/// A tool call with validated parameters
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Terminal(TerminalParams),
    CreateOrUpdateFiles(CreateOrUpdateFilesParams),
    ReadFiles(ReadFilesParams),
}

impl ToolRequest {
    /// Look up the tool and validate its arguments
    ///
    /// The error is the text handed back to the model.
    pub fn parse(call: &ToolCall) -> Result<Self, String> {
        let name = ToolName::from_name(&call.function.name)
            .ok_or_else(|| format!("Error: unknown tool '{}'", call.function.name))?;

        let arguments = match call.function.arguments.trim() {
            "" => "{}",
            raw => raw,
        };

        let parsed = match name {
            ToolName::Terminal => serde_json::from_str(arguments).map(ToolRequest::Terminal),
            ToolName::CreateOrUpdateFiles => serde_json::from_str(arguments).map(ToolRequest::CreateOrUpdateFiles),
            ToolName::ReadFiles => serde_json::from_str(arguments).map(ToolRequest::ReadFiles),
        };

        parsed.map_err(|e| format!("Error: invalid arguments for {}: {}", name.as_str(), e))
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolRequest::Terminal(_) => ToolName::Terminal,
            ToolRequest::CreateOrUpdateFiles(_) => ToolName::CreateOrUpdateFiles,
            ToolRequest::ReadFiles(_) => ToolName::ReadFiles,
        }
    }
}

/// Stored output of a `create-or-update-files` step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct WriteOutcome {
    /// Files applied before any failure
    written: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Where a tool call runs
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub sandbox_id: &'a str,
    pub steps: &'a StepRunner,
}

/// Registered tools and their sandbox adapters
pub struct ToolRegistry {
    sandbox: Arc<dyn SandboxProvider>,
    tools: Vec<ToolName>,
}

impl ToolRegistry {
    /// Registry with every tool enabled
    pub fn new(sandbox: Arc<dyn SandboxProvider>) -> Self {
        Self {
            sandbox,
            tools: ToolName::ALL.to_vec(),
        }
    }

    /// Definitions for the model, in registration order
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolName::definition).collect()
    }

    /// Execute one tool call and return the text for the model
    ///
    /// Tool failures come back as text. Only a failed sandbox reconnect or a
    /// checkpoint error is returned as `Err`.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: ToolContext<'_>,
        state: &mut SharedState,
    ) -> Result<String, AgentError> {
        let request = match ToolRequest::parse(call) {
            Ok(request) if self.tools.contains(&request.name()) => request,
            Ok(request) => {
                warn!(tool = request.name().as_str(), "Tool is not registered");
                TOOL_CALLS.with_label_values(&[request.name().as_str(), "rejected"]).inc();
                return Ok(format!("Error: unknown tool '{}'", request.name().as_str()));
            }
            Err(message) => {
                warn!(tool = %call.function.name, reason = %message, "Rejecting tool call");
                TOOL_CALLS.with_label_values(&["unknown", "rejected"]).inc();
                return Ok(message);
            }
        };

        let span = info_span!(
            "tool_call",
            tool = request.name().as_str(),
            call_id = %call.id,
            sandbox_id = %ctx.sandbox_id,
            otel.name = "tool_call"
        );

        async {
            match request {
                ToolRequest::Terminal(params) => {
                    let stdout: Option<String> = ctx
                        .steps
                        .run(ToolName::Terminal.step_name(), || {
                            self.run_terminal(ctx.sandbox_id, &params.command)
                        })
                        .await?;
                    Ok::<_, AgentError>(stdout.unwrap_or_default())
                }
                ToolRequest::CreateOrUpdateFiles(params) => {
                    let outcome: WriteOutcome = ctx
                        .steps
                        .run(ToolName::CreateOrUpdateFiles.step_name(), || {
                            self.write_files(ctx.sandbox_id, &params.files)
                        })
                        .await?;

                    let paths: Vec<String> = outcome.written.keys().cloned().collect();
                    state.merge_files(outcome.written);

                    Ok(match outcome.error {
                        None => format!("Updated files: {}", paths.join(", ")),
                        Some(e) => format!("Error creating or updating files: {}", e),
                    })
                }
                ToolRequest::ReadFiles(params) => {
                    ctx.steps
                        .run(ToolName::ReadFiles.step_name(), || {
                            self.read_files(ctx.sandbox_id, &params.files)
                        })
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle, AgentError> {
        self.sandbox.connect(sandbox_id).await.map_err(AgentError::Provisioning)
    }

    async fn run_terminal(&self, sandbox_id: &str, command: &str) -> Result<Option<String>, AgentError> {
        let handle = self.connect(sandbox_id).await?;

        match self.sandbox.run_command(&handle, command).await {
            Ok(output) if output.success() => {
                debug!(command, "Command succeeded");
                TOOL_CALLS.with_label_values(&["terminal", "ok"]).inc();
                Ok(Some(output.stdout))
            }
            Ok(output) => {
                warn!(
                    command,
                    exit_code = output.exit_code,
                    stdout = %output.stdout,
                    stderr = %output.stderr,
                    "Command failed"
                );
                TOOL_CALLS.with_label_values(&["terminal", "error"]).inc();
                Ok(None)
            }
            Err(e) if e.is_provisioning() => Err(AgentError::Provisioning(e)),
            Err(e) => {
                warn!(command, error = %e, "Command failed");
                TOOL_CALLS.with_label_values(&["terminal", "error"]).inc();
                Ok(None)
            }
        }
    }

    async fn write_files(&self, sandbox_id: &str, files: &[FileEntry]) -> Result<WriteOutcome, AgentError> {
        let handle = self.connect(sandbox_id).await?;
        let mut outcome = WriteOutcome::default();

        for file in files {
            if let Err(e) = self.sandbox.write_file(&handle, &file.path, &file.content).await {
                if e.is_provisioning() {
                    return Err(AgentError::Provisioning(e));
                }
                warn!(path = %file.path, written = outcome.written.len(), error = %e, "Error creating or updating files");
                outcome.error = Some(e.to_string());
                break;
            }
            outcome.written.insert(file.path.clone(), file.content.clone());
        }

        let status = if outcome.error.is_some() { "error" } else { "ok" };
        TOOL_CALLS.with_label_values(&["createOrUpdateFiles", status]).inc();
        Ok(outcome)
    }

    async fn read_files(&self, sandbox_id: &str, paths: &[String]) -> Result<String, AgentError> {
        let handle = self.connect(sandbox_id).await?;
        let mut contents = Vec::with_capacity(paths.len());

        for path in paths {
            match self.sandbox.read_file(&handle, path).await {
                Ok(content) => contents.push(FileEntry {
                    path: path.clone(),
                    content,
                }),
                Err(e) if e.is_provisioning() => return Err(AgentError::Provisioning(e)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Error reading files");
                    TOOL_CALLS.with_label_values(&["readFiles", "error"]).inc();
                    return Ok(format!("Error reading files: {}", e));
                }
            }
        }

        TOOL_CALLS.with_label_values(&["readFiles", "ok"]).inc();
        Ok(serde_json::to_string(&contents).unwrap_or_else(|e| format!("Error reading files: {}", e)))
    }
}
