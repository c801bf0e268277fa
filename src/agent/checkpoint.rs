//! Durable step checkpoints
//!
//! A run is a sequence of named steps. [`StepRunner`] executes each step at
//! most once per checkpoint: the first time it runs, its serialized output is
//! saved; when the run is retried (possibly in a fresh process) the stored
//! output is returned instead and execution resumes at the first unfinished
//! step.
//!
//! Steps that repeat within a run get an ordinal suffix, so the third
//! `terminal` call is stored as `terminal:2`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::STEP_REPLAYS;

/// Error type for checkpoint storage
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("No checkpoint for run {0}")]
    NotFound(String),
}

/// Everything needed to resume a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub conversation_id: String,
    /// The request text that triggered the run
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Completed step outputs, keyed by step key
    pub steps: BTreeMap<String, serde_json::Value>,
    /// Outcome label once the run has finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl RunCheckpoint {
    pub fn new(run_id: impl Into<String>, conversation_id: impl Into<String>, request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            conversation_id: conversation_id.into(),
            request: request.into(),
            created_at: now,
            updated_at: now,
            steps: BTreeMap::new(),
            outcome: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            run_id: self.run_id.clone(),
            conversation_id: self.conversation_id.clone(),
            request: truncate(&self.request, 50),
            created_at: self.created_at,
            steps: self.steps.len(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Summary of a checkpoint for listing
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub run_id: String,
    pub conversation_id: String,
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub steps: usize,
    pub outcome: Option<String>,
}

/// Storage for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError>;

    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError>;

    /// All checkpoints, newest first
    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError>;
}

/// Checkpoints kept in process memory
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, RunCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        Ok(checkpoints.get(run_id).cloned())
    }

    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        checkpoints.insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<_> = checkpoints.values().map(RunCheckpoint::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

/// Checkpoints stored as one JSON file per run
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a new checkpoint store
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create with default directory (~/.forgeloop/checkpoints)
    pub fn default_store() -> std::io::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(PathBuf::from(home).join(".forgeloop").join("checkpoints"))
    }

    fn checkpoint_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", run_id))
    }

    async fn load_from_path(path: &Path) -> Result<RunCheckpoint, CheckpointError> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        match Self::load_from_path(&self.checkpoint_path(run_id)).await {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(CheckpointError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        // Write then rename so a crash never leaves a torn checkpoint
        let path = self.checkpoint_path(&checkpoint.run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Self::load_from_path(&path).await {
                    Ok(checkpoint) => summaries.push(checkpoint.summary()),
                    Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
                }
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

/// Executes named steps against a run checkpoint
pub struct StepRunner {
    store: Arc<dyn CheckpointStore>,
    checkpoint: Mutex<RunCheckpoint>,
    occurrences: Mutex<HashMap<String, usize>>,
}

impl StepRunner {
    /// Resume the checkpoint for `run_id`, or start a new one
    pub async fn open(
        store: Arc<dyn CheckpointStore>,
        run_id: &str,
        conversation_id: &str,
        request: &str,
    ) -> Result<Self, CheckpointError> {
        let checkpoint = match store.load(run_id).await? {
            Some(existing) => {
                debug!(run_id, completed_steps = existing.steps.len(), "Resuming run from checkpoint");
                existing
            }
            None => {
                let fresh = RunCheckpoint::new(run_id, conversation_id, request);
                store.save(&fresh).await?;
                fresh
            }
        };

        Ok(Self {
            store,
            checkpoint: Mutex::new(checkpoint),
            occurrences: Mutex::new(HashMap::new()),
        })
    }

    /// Whether a step key already has a stored output
    pub fn has_completed(&self, key: &str) -> bool {
        self.lock_checkpoint().steps.contains_key(key)
    }

    /// Run `f` as step `name`, or replay its stored output
    ///
    /// Failed steps are not stored, so a retry runs them again.
    pub async fn run<T, E, F, Fut>(&self, name: &str, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CheckpointError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.next_key(name);

        let stored = self.lock_checkpoint().steps.get(&key).cloned();
        if let Some(value) = stored {
            STEP_REPLAYS.inc();
            debug!(step = %key, "Replaying step from checkpoint");
            return serde_json::from_value(value).map_err(|e| E::from(CheckpointError::Corrupt(e)));
        }

        let output = f().await?;
        let value = serde_json::to_value(&output).map_err(CheckpointError::from)?;

        let snapshot = {
            let mut checkpoint = self.lock_checkpoint();
            checkpoint.steps.insert(key, value);
            checkpoint.updated_at = Utc::now();
            checkpoint.clone()
        };
        self.store.save(&snapshot).await?;

        Ok(output)
    }

    /// Mark the run finished with an outcome label
    pub async fn finish(&self, outcome: &str) -> Result<(), CheckpointError> {
        let snapshot = {
            let mut checkpoint = self.lock_checkpoint();
            checkpoint.outcome = Some(outcome.to_string());
            checkpoint.updated_at = Utc::now();
            checkpoint.clone()
        };
        self.store.save(&snapshot).await
    }

    fn next_key(&self, name: &str) -> String {
        let mut occurrences = self.occurrences.lock().unwrap_or_else(|e| e.into_inner());
        let seen = occurrences.entry(name.to_string()).or_insert(0);
        let key = if *seen == 0 {
            name.to_string()
        } else {
            format!("{}:{}", name, seen)
        };
        *seen += 1;
        key
    }

    fn lock_checkpoint(&self) -> std::sync::MutexGuard<'_, RunCheckpoint> {
        self.checkpoint.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Truncate a string to max chars, adding ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("checkpoint: {0}")]
        Checkpoint(#[from] CheckpointError),
        #[error("boom")]
        Boom,
    }

    async fn runner(store: Arc<dyn CheckpointStore>) -> StepRunner {
        StepRunner::open(store, "run-1", "conv-1", "build a todo app").await.unwrap()
    }

    #[tokio::test]
    async fn test_step_output_is_replayed() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let calls = AtomicUsize::new(0);

        let first = runner(store.clone()).await;
        let id: String = first
            .run("get-sandbox-id", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("sbx-1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(id, "sbx-1");

        // A fresh runner over the same store replays instead of executing
        let second = runner(store).await;
        let replayed: String = second
            .run("get-sandbox-id", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("sbx-2".to_string())
            })
            .await
            .unwrap();
        assert_eq!(replayed, "sbx-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_names_get_ordinals() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let steps = runner(store.clone()).await;

        for i in 0..3 {
            let _: usize = steps.run("terminal", || async move { Ok::<_, TestError>(i) }).await.unwrap();
        }

        let checkpoint = store.load("run-1").await.unwrap().unwrap();
        let keys: Vec<&str> = checkpoint.steps.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["terminal", "terminal:1", "terminal:2"]);
        assert_eq!(checkpoint.steps["terminal:2"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_failed_step_is_not_stored() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let steps = runner(store.clone()).await;

        let result: Result<String, TestError> = steps.run("code-agent", || async { Err(TestError::Boom) }).await;
        assert!(result.is_err());
        assert!(!steps.has_completed("code-agent"));

        let retry = runner(store).await;
        let value: String = retry
            .run("code-agent", || async { Ok::<_, TestError>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_file_store_persists_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());

        let steps = runner(store.clone()).await;
        let _: String = steps
            .run("get-sandbox-id", || async { Ok::<_, TestError>("sbx-1".to_string()) })
            .await
            .unwrap();
        steps.finish("success").await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert!(loaded.is_complete());
        assert_eq!(loaded.steps["get-sandbox-id"], serde_json::json!("sbx-1"));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id, "run-1");
        assert_eq!(listed[0].outcome.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
