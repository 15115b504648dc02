//! Conversation persistence
//!
//! The workflow needs two things from persistence: the most recent messages
//! of a project (newest first) and a way to append exactly one outcome
//! record. [`MessageStore`] is that contract; [`JsonMessageStore`] keeps one
//! JSON file per project and [`MemoryMessageStore`] keeps everything in
//! memory.

pub mod json;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use json::JsonMessageStore;
pub use memory::MemoryMessageStore;

/// Fixed user-facing content of an ERROR record
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Kind of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Result,
    Error,
}

/// Artifact attached to a successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// A stored conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
    /// Creation order within the project
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// A message to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub project_id: String,
    pub role: MessageRole,
    pub kind: MessageType,
    pub content: String,
    pub fragment: Option<Fragment>,
    /// Creating twice with the same key yields the first record
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    /// A user instruction
    pub fn user(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            role: MessageRole::User,
            kind: MessageType::Result,
            content: content.into(),
            fragment: None,
            idempotency_key: None,
        }
    }

    /// A successful assistant result with its fragment
    pub fn result(
        project_id: impl Into<String>,
        content: impl Into<String>,
        fragment: Fragment,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Result,
            content: content.into(),
            fragment: Some(fragment),
            idempotency_key: None,
        }
    }

    /// The fixed assistant error record
    pub fn error(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Error,
            content: ERROR_MESSAGE.to_string(),
            fragment: None,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid project id {0:?}")]
    InvalidProjectId(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read/append contract of the conversation store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` most recent messages of a project, newest first
    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Append one message
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;
}

/// Append `new` to a project's messages, honouring its idempotency key
pub(crate) fn append(messages: &mut Vec<Message>, new: NewMessage) -> Message {
    if let Some(key) = &new.idempotency_key {
        if let Some(existing) = messages
            .iter()
            .find(|m| m.idempotency_key.as_ref() == Some(key))
        {
            return existing.clone();
        }
    }

    let sequence = messages.iter().map(|m| m.sequence + 1).max().unwrap_or(0);
    let message = Message {
        id: uuid::Uuid::now_v7().to_string(),
        project_id: new.project_id,
        role: new.role,
        kind: new.kind,
        content: new.content,
        fragment: new.fragment,
        created_at: Utc::now(),
        sequence,
        idempotency_key: new.idempotency_key,
    };
    messages.push(message.clone());
    message
}

/// The `limit` newest messages, newest first
pub(crate) fn newest_first(messages: &[Message], limit: usize) -> Vec<Message> {
    let mut sorted = messages.to_vec();
    sorted.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    sorted.truncate(limit);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut messages = Vec::new();
        let first = append(&mut messages, NewMessage::user("p1", "hello"));
        let second = append(&mut messages, NewMessage::error("p1"));
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.content, ERROR_MESSAGE);
        assert_eq!(second.kind, MessageType::Error);
    }

    #[test]
    fn test_idempotency_key_returns_first_record() {
        let mut messages = Vec::new();
        let first = append(&mut messages, NewMessage::error("p1").with_idempotency_key("run-1"));
        let again = append(&mut messages, NewMessage::error("p1").with_idempotency_key("run-1"));
        assert_eq!(first, again);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_newest_first_is_bounded() {
        let mut messages = Vec::new();
        for i in 0..7 {
            append(&mut messages, NewMessage::user("p1", format!("m{}", i)));
        }
        let recent = newest_first(&messages, 5);
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m6", "m5", "m4", "m3", "m2"]);
    }

    #[test]
    fn test_record_wire_format() {
        let mut messages = Vec::new();
        let mut files = BTreeMap::new();
        files.insert("app/page.tsx".to_string(), "x".to_string());
        let message = append(
            &mut messages,
            NewMessage::result(
                "p1",
                "Here you go",
                Fragment {
                    sandbox_url: "https://3000-sbx.localhost".into(),
                    title: "Counter".into(),
                    files,
                },
            ),
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "ASSISTANT");
        assert_eq!(json["type"], "RESULT");
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["fragment"]["sandboxUrl"], "https://3000-sbx.localhost");
    }
}
