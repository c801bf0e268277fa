//! Run admission and at-least-once execution
//!
//! [`Dispatcher`] is the trigger transport: it admits a request through the
//! quota gate, gives it a run id and drives [`AgentController::run`] until it
//! succeeds or the attempts run out. Retries reuse the run id, so finished
//! steps are replayed from checkpoints rather than executed again.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::controller::{AgentController, AgentError, RunReport};
use crate::metrics::RUNS_TOTAL;
use crate::quota::{QuotaDenied, QuotaError, QuotaGate};

/// Default attempts per run, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Request to run the agent for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub conversation_id: String,
    /// The user's request text
    pub value: String,
}

impl RunEvent {
    pub fn new(conversation_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            value: value.into(),
        }
    }
}

/// Error type for dispatching runs
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Rejected before admission; no run was created
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaDenied),

    /// Every attempt failed; the error outcome has been recorded
    #[error("Run {run_id} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        run_id: String,
        attempts: u32,
        #[source]
        last_error: AgentError,
    },

    /// The quota gate could not be consulted; no run was created
    #[error("Quota check failed: {0}")]
    Quota(QuotaError),

    #[error("No checkpoint for run {0}")]
    UnknownRun(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Admits and executes runs
pub struct Dispatcher {
    controller: Arc<AgentController>,
    quota: Arc<dyn QuotaGate>,
    max_attempts: u32,
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(controller: Arc<AgentController>, quota: Arc<dyn QuotaGate>) -> Self {
        Self {
            controller,
            quota,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Admit a new run and execute it
    pub async fn submit(&self, event: RunEvent) -> Result<RunReport, DispatchError> {
        match self.quota.admit(&event.conversation_id).await {
            Ok(()) => {}
            Err(QuotaError::Exceeded(denied)) => {
                warn!(
                    conversation_id = %event.conversation_id,
                    retry_after_secs = denied.retry_after.as_secs(),
                    "Quota exceeded"
                );
                RUNS_TOTAL.with_label_values(&["quota_exceeded"]).inc();
                return Err(DispatchError::QuotaExceeded(denied));
            }
            Err(e) => {
                error!(conversation_id = %event.conversation_id, error = %e, "Quota check failed");
                return Err(DispatchError::Quota(e));
            }
        }

        let run_id = Uuid::now_v7().to_string();
        info!(run_id = %run_id, conversation_id = %event.conversation_id, "Run admitted");
        self.execute(&run_id, &event).await
    }

    /// Continue a previously admitted run from its checkpoint
    pub async fn resume(&self, run_id: &str) -> Result<RunReport, DispatchError> {
        let checkpoint = self
            .controller
            .checkpoints()
            .load(run_id)
            .await
            .map_err(AgentError::from)?
            .ok_or_else(|| DispatchError::UnknownRun(run_id.to_string()))?;

        let event = RunEvent::new(checkpoint.conversation_id, checkpoint.request);
        self.execute(run_id, &event).await
    }

    async fn execute(&self, run_id: &str, event: &RunEvent) -> Result<RunReport, DispatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.controller.run(run_id, &event.conversation_id, &event.value).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < self.max_attempts => {
                    warn!(run_id, attempt, error = %e, "Run attempt failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(run_id, attempts = attempt, error = %e, "Run failed");
                    self.on_failure(run_id, event).await;
                    return Err(DispatchError::Exhausted {
                        run_id: run_id.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }

    async fn on_failure(&self, run_id: &str, event: &RunEvent) {
        RUNS_TOTAL.with_label_values(&["failed"]).inc();
        if let Err(e) = self
            .controller
            .record_failure(run_id, &event.conversation_id, &event.value)
            .await
        {
            error!(run_id, error = %e, "Failed to record error outcome");
        }
    }
}
