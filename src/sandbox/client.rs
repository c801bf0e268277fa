//! Sandbox control plane client
//!
//! Provides a high-level client for the remote sandbox HTTP API. Every
//! operation is addressed by sandbox identifier, so the client itself is
//! stateless and can be rebuilt from configuration at any time.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{Result, SandboxError};
use super::handle::{CommandOutput, SandboxHandle};
use super::{SandboxProvider, SANDBOX_TIMEOUT};
use crate::metrics::SANDBOX_OPERATIONS;

/// Connection settings for the control plane
#[derive(Debug, Clone)]
pub struct RemoteSandboxConfig {
    /// Base URL of the API (e.g., "https://api.sandbox.example.dev")
    pub api_url: String,
    pub api_key: String,
    /// Domain used when the API does not report one
    pub domain: String,
    /// Idle timeout armed on create and on every connect
    pub timeout: Duration,
}

impl RemoteSandboxConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            domain: domain.into(),
            timeout: SANDBOX_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct CreateSandbox<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Serialize)]
struct SetTimeout {
    timeout: u64,
}

#[derive(Serialize)]
struct RunCommand<'a> {
    cmd: &'a str,
}

#[derive(Deserialize)]
struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "templateID", default)]
    template_id: String,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Deserialize)]
struct CommandResult {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(rename = "exitCode")]
    exit_code: i32,
}

/// Client for the remote sandbox control plane
#[derive(Clone)]
pub struct RemoteSandboxClient {
    client: reqwest::Client,
    config: RemoteSandboxConfig,
}

impl RemoteSandboxClient {
    pub fn new(config: RemoteSandboxConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), endpoint)
    }

    /// Send a request to the control plane and reject non-success statuses
    async fn send_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&T>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .request(method, self.url(endpoint))
            .header("X-API-Key", &self.config.api_key)
            .query(query);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::check(endpoint, response).await
    }

    async fn check(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn handle_from(&self, info: SandboxInfo) -> SandboxHandle {
        let domain = info.domain.unwrap_or_else(|| self.config.domain.clone());
        SandboxHandle::new(info.sandbox_id, info.template_id, domain, self.config.timeout)
    }

    fn sandbox_path(sandbox_id: &str, suffix: &str) -> String {
        format!("/sandboxes/{}{}", sandbox_id, suffix)
    }
}

fn not_found(err: SandboxError, sandbox_id: &str) -> SandboxError {
    match err {
        SandboxError::Api { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            SandboxError::NotFound {
                sandbox_id: sandbox_id.to_string(),
            }
        }
        other => other,
    }
}

fn record<T>(operation: &str, result: &Result<T>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    SANDBOX_OPERATIONS.with_label_values(&[operation, status]).inc();
}

#[async_trait]
impl SandboxProvider for RemoteSandboxClient {
    async fn create(&self, template: &str) -> Result<SandboxHandle> {
        let body = CreateSandbox {
            template_id: template,
            timeout: self.config.timeout.as_secs(),
        };

        let result: Result<SandboxHandle> = async {
            let response = self
                .send_request(Method::POST, "/sandboxes", &[], Some(&body))
                .await
                .map_err(|e| SandboxError::Provisioning {
                    template: template.to_string(),
                    reason: e.to_string(),
                })?;
            let mut info: SandboxInfo = serde_json::from_str(&response.text().await?)?;
            if info.template_id.is_empty() {
                info.template_id = template.to_string();
            }
            Ok::<_, SandboxError>(self.handle_from(info))
        }
        .await;

        record("create", &result);
        if let Ok(handle) = &result {
            debug!(sandbox_id = %handle.sandbox_id, template, "Sandbox created");
        }
        result
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let result: Result<SandboxHandle> = async {
            let timeout = SetTimeout {
                timeout: self.config.timeout.as_secs(),
            };
            self.send_request(
                Method::POST,
                &Self::sandbox_path(sandbox_id, "/timeout"),
                &[],
                Some(&timeout),
            )
            .await
            .map_err(|e| not_found(e, sandbox_id))?;

            let response = self
                .send_request::<()>(Method::GET, &Self::sandbox_path(sandbox_id, ""), &[], None)
                .await
                .map_err(|e| not_found(e, sandbox_id))?;
            let info: SandboxInfo = serde_json::from_str(&response.text().await?)?;
            Ok::<_, SandboxError>(self.handle_from(info).mark_connected())
        }
        .await;

        record("connect", &result);
        result
    }

    async fn run_command(&self, handle: &SandboxHandle, command: &str) -> Result<CommandOutput> {
        let result: Result<CommandOutput> = async {
            let response = self
                .send_request(
                    Method::POST,
                    &Self::sandbox_path(&handle.sandbox_id, "/commands"),
                    &[],
                    Some(&RunCommand { cmd: command }),
                )
                .await?;
            let output: CommandResult = serde_json::from_str(&response.text().await?)?;
            Ok::<_, SandboxError>(CommandOutput {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            })
        }
        .await;

        record("command", &result);
        result
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> Result<()> {
        let endpoint = Self::sandbox_path(&handle.sandbox_id, "/files");
        let result: Result<()> = async {
            let response = self
                .client
                .put(self.url(&endpoint))
                .header("X-API-Key", &self.config.api_key)
                .query(&[("path", path)])
                .body(content.to_string())
                .send()
                .await?;
            Self::check(&endpoint, response).await?;
            Ok::<_, SandboxError>(())
        }
        .await;

        record("write_file", &result);
        result
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String> {
        let endpoint = Self::sandbox_path(&handle.sandbox_id, "/files");
        let result: Result<String> = async {
            let response = self
                .send_request::<()>(Method::GET, &endpoint, &[("path", path)], None)
                .await
                .map_err(|e| match e {
                    SandboxError::Api { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
                        SandboxError::FileNotFound {
                            path: path.to_string(),
                        }
                    }
                    other => other,
                })?;
            Ok::<_, SandboxError>(response.text().await?)
        }
        .await;

        record("read_file", &result);
        result
    }
}
