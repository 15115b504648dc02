//! Agent State carried across the network loop

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::COMPLETION_MARKER;

/// Decoded completion signal of an assistant message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Incomplete,
    /// Carries the whole message text, verbatim
    Complete(String),
}

impl TaskStatus {
    /// Decode the most recent assistant text of a response
    pub fn decode(text: Option<&str>) -> Self {
        match text {
            Some(text) if text.contains(COMPLETION_MARKER) => TaskStatus::Complete(text.to_string()),
            _ => TaskStatus::Incomplete,
        }
    }
}

/// Data the loop accumulates for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// First completion-bearing assistant message; empty until then
    pub summary: String,
    /// Every file written so far, path to full content
    pub files: BTreeMap<String, String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        !self.summary.is_empty()
    }

    /// Apply a completion signal. Returns true when this call set the
    /// summary; later signals never overwrite it.
    pub fn observe(&mut self, status: TaskStatus) -> bool {
        match status {
            TaskStatus::Complete(summary) if !self.is_complete() => {
                self.summary = summary;
                true
            }
            _ => false,
        }
    }

    /// Merge written files; later content wins per path
    pub fn merge_files(&mut self, files: impl IntoIterator<Item = (String, String)>) {
        self.files.extend(files);
    }

    /// A run succeeds only with both a summary and at least one file
    pub fn is_success(&self) -> bool {
        self.is_complete() && !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_marker() {
        assert_eq!(TaskStatus::decode(None), TaskStatus::Incomplete);
        assert_eq!(TaskStatus::decode(Some("still working")), TaskStatus::Incomplete);

        let text = "<task_summary>\nBuilt a counter.\n</task_summary>";
        assert_eq!(TaskStatus::decode(Some(text)), TaskStatus::Complete(text.to_string()));
    }

    #[test]
    fn test_summary_is_set_once() {
        let mut state = AgentState::new();
        assert!(!state.observe(TaskStatus::Incomplete));
        assert!(state.observe(TaskStatus::Complete("<task_summary>a</task_summary>".into())));
        assert!(!state.observe(TaskStatus::Complete("<task_summary>b</task_summary>".into())));
        assert_eq!(state.summary, "<task_summary>a</task_summary>");
    }

    #[test]
    fn test_success_requires_summary_and_files() {
        let mut state = AgentState::new();
        assert!(!state.is_success());

        state.observe(TaskStatus::Complete("<task_summary>x</task_summary>".into()));
        assert!(!state.is_success());

        state.merge_files([("app/page.tsx".to_string(), "v1".to_string())]);
        state.merge_files([("app/page.tsx".to_string(), "v2".to_string())]);
        assert!(state.is_success());
        assert_eq!(state.files["app/page.tsx"], "v2");
    }
}
