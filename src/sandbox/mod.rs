//! Remote sandbox module
//!
//! A run owns exactly one sandbox. It is created once from a template and
//! then reached again, by identifier only, from every step that needs it:
//!
//! ```text
//! get-sandbox-id ──create(template)──► control plane ──► sandbox_id
//!                                                          │
//!  terminal / files ──connect(sandbox_id)──► re-arm idle timeout ──► op
//!                                                          │
//! get-sandbox-url ──connect(sandbox_id)──► exposed_url(3000)
//! ```
//!
//! No connection object survives between steps, so a step can be retried in
//! a fresh process with nothing but the stored identifier.

pub mod client;
pub mod error;
pub mod handle;

use std::time::Duration;

use async_trait::async_trait;

pub use client::{RemoteSandboxClient, RemoteSandboxConfig};
pub use error::SandboxError;
pub use handle::{CommandOutput, SandboxHandle, SandboxStatus};

/// Idle timeout re-armed on every connect
pub const SANDBOX_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Access to ephemeral remote compute environments
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a fresh sandbox from a named template
    async fn create(&self, template: &str) -> error::Result<SandboxHandle>;

    /// Reconnect to an existing sandbox and re-arm its idle timeout
    async fn connect(&self, sandbox_id: &str) -> error::Result<SandboxHandle>;

    /// Run a shell command, capturing stdout and stderr separately
    async fn run_command(&self, handle: &SandboxHandle, command: &str) -> error::Result<CommandOutput>;

    /// Create or overwrite a file
    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> error::Result<()>;

    /// Read a file as text
    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> error::Result<String>;
}
