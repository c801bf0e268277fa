//! Completion marker detection
//!
//! The agent signals it is done by wrapping a summary in `<task_summary>`
//! tags somewhere in its reply. Parsing is kept here, away from the loop, so
//! it can be tested without a model.

use crate::llm::{ChatMessage, Role};

pub const SUMMARY_OPEN_TAG: &str = "<task_summary>";
pub const SUMMARY_CLOSE_TAG: &str = "</task_summary>";

/// Result of inspecting one assistant reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Incomplete,
    /// Full text of the message that carried the marker
    Completed(String),
}

impl Completion {
    /// Inspect a piece of assistant text
    ///
    /// A marker counts only if it wraps non-blank content. A missing closing
    /// tag is tolerated (models sometimes stop right after the summary).
    pub fn parse(text: &str) -> Completion {
        match marker_body(text) {
            Some(body) if !body.trim().is_empty() => Completion::Completed(text.to_string()),
            _ => Completion::Incomplete,
        }
    }

    /// Inspect the most recent assistant message that has text, scanning backward
    pub fn detect(messages: &[ChatMessage]) -> Completion {
        messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(ChatMessage::text)
            .map(|text| Completion::parse(&text))
            .unwrap_or(Completion::Incomplete)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Completion::Completed(_))
    }
}

/// Text between the opening tag and the closing tag (or end of text)
pub fn marker_body(text: &str) -> Option<&str> {
    let start = text.find(SUMMARY_OPEN_TAG)? + SUMMARY_OPEN_TAG.len();
    let rest = &text[start..];
    let end = rest.find(SUMMARY_CLOSE_TAG).unwrap_or(rest.len());
    Some(&rest[..end])
}
