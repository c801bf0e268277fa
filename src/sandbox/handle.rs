//! Sandbox Handle - a reconnectable reference to one remote environment
//!
//! A handle is cheap to rebuild: everything needed to reach the sandbox again
//! is derivable from its identifier, so handles are never kept across steps.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Status of a sandbox as last reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Freshly provisioned from a template
    Created,
    /// Reconnected and idle timeout re-armed
    Connected,
}

/// Represents a single remote sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Opaque identifier assigned by the control plane
    pub sandbox_id: String,
    /// Template the sandbox was provisioned from
    pub template: String,
    /// Domain under which exposed ports are reachable
    pub domain: String,
    /// Idle timeout armed on the sandbox by the last create/connect
    pub timeout: Duration,
    pub status: SandboxStatus,
}

impl SandboxHandle {
    pub fn new(
        sandbox_id: impl Into<String>,
        template: impl Into<String>,
        domain: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            template: template.into(),
            domain: domain.into(),
            timeout,
            status: SandboxStatus::Created,
        }
    }

    /// Mark the handle as reconnected
    pub fn mark_connected(mut self) -> Self {
        self.status = SandboxStatus::Connected;
        self
    }

    /// Host name for a port exposed inside the sandbox
    /// Format: {port}-{sandbox_id}.{domain}
    pub fn host(&self, port: u16) -> String {
        format!("{}-{}.{}", port, self.sandbox_id, self.domain)
    }

    /// Externally reachable URL for a service listening on `port`
    pub fn exposed_url(&self, port: u16) -> String {
        format!("https://{}", self.host(port))
    }
}

/// Captured result of a shell command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
