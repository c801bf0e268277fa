//! Shared run state
//!
//! The accumulator a run threads through every step. It is a plain value that
//! is passed in and out explicitly, so a retried step can rebuild it from
//! checkpointed step results instead of relying on in-memory references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Files written by the agent plus the completion summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// Path → full contents. Last write wins.
    pub files: BTreeMap<String, String>,
    summary: Option<String>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge written files, overwriting existing paths
    pub fn merge_files<I>(&mut self, written: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.files.extend(written);
    }

    /// Set the summary unless one is already present
    ///
    /// Returns `true` if this call set it. Empty summaries are ignored.
    pub fn set_summary_once(&mut self, summary: impl Into<String>) -> bool {
        if self.is_complete() {
            return false;
        }
        let summary = summary.into();
        if summary.trim().is_empty() {
            return false;
        }
        self.summary = Some(summary);
        true
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// The termination signal: a non-empty summary has been recorded
    pub fn is_complete(&self) -> bool {
        self.summary().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_last_write_wins() {
        let mut state = SharedState::new();
        state.merge_files(files(&[("a.txt", "1")]));
        state.merge_files(files(&[("a.txt", "2")]));
        assert_eq!(state.files["a.txt"], "2");
        assert_eq!(state.files.len(), 1);
    }

    #[test]
    fn test_disjoint_writes_accumulate() {
        let mut state = SharedState::new();
        state.merge_files(files(&[("a.txt", "1"), ("b.txt", "2")]));
        state.merge_files(files(&[("c.txt", "3")]));
        assert_eq!(state.files.len(), 3);
        assert_eq!(state.files["b.txt"], "2");
        assert_eq!(state.files["c.txt"], "3");
    }

    #[test]
    fn test_summary_is_set_once() {
        let mut state = SharedState::new();
        assert!(!state.is_complete());

        assert!(state.set_summary_once("<task_summary>first</task_summary>"));
        assert!(!state.set_summary_once("<task_summary>second</task_summary>"));
        assert_eq!(state.summary(), Some("<task_summary>first</task_summary>"));
    }

    #[test]
    fn test_blank_summary_does_not_complete() {
        let mut state = SharedState::new();
        assert!(!state.set_summary_once("   "));
        assert!(!state.is_complete());
        assert!(state.set_summary_once("done"));
    }

    #[test]
    fn test_state_survives_serialization() {
        let mut state = SharedState::new();
        state.merge_files(files(&[("index.html", "<html></html>")]));
        state.set_summary_once("done");

        let restored: SharedState = serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(restored, state);
    }
}
