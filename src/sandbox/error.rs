//! Error types for remote sandbox operations.

/// Errors that can occur while talking to the sandbox control plane.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox could not be created from its template.
    #[error("Sandbox provisioning failed for template {template}: {reason}")]
    Provisioning { template: String, reason: String },

    /// No live sandbox exists for the identifier (expired or never created).
    #[error("Sandbox {sandbox_id} not found")]
    NotFound { sandbox_id: String },

    /// A file path does not exist inside the sandbox.
    #[error("File not found in sandbox: {path}")]
    FileNotFound { path: String },

    /// The control plane answered with a non-success status.
    #[error("Sandbox API error on {endpoint}: {status} - {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Transport-level failure.
    #[error("Sandbox request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("Invalid sandbox response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether this error means the sandbox itself is unreachable.
    ///
    /// Only these errors are fatal to a run; everything else is a tool-level
    /// failure that the agent gets to see.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            SandboxError::Provisioning { .. } | SandboxError::NotFound { .. }
        )
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
