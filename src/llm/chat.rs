//! Chat model types with tool calling support
//!
//! These are the provider-neutral shapes the agent loop works with. A
//! [`ChatModel`] turns a [`CompletionRequest`] into a [`Completion`], an
//! ordered list of output items (text and tool calls) produced by one
//! inference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Textual content of a message.
///
/// Some providers return text as a list of segments instead of one string,
/// so both shapes are accepted and [`MessageContent::to_text`] joins them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<String>),
}

impl MessageContent {
    /// Flatten to a single string (segments are joined without a separator)
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Segments(segments) => segments.concat(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Segments(segments) => segments.iter().all(|s| s.is_empty()),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on `Role::Tool` messages: the call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// One item of model output, in the order the model produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Text { role: Role, content: MessageContent },
    ToolCall(ToolCall),
}

/// Result of a single inference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub output: Vec<OutputItem>,
}

impl Completion {
    /// A completion holding only assistant text
    pub fn text(content: impl Into<MessageContent>) -> Self {
        Self {
            output: vec![OutputItem::Text {
                role: Role::Assistant,
                content: content.into(),
            }],
        }
    }

    /// Text of the first output item, or `None` when that item is absent or
    /// not text
    pub fn first_text(&self) -> Option<String> {
        match self.output.first() {
            Some(OutputItem::Text { content, .. }) => Some(content.to_text()),
            _ => None,
        }
    }

    /// Most recent assistant text item
    pub fn last_assistant_text(&self) -> Option<String> {
        self.output.iter().rev().find_map(|item| match item {
            OutputItem::Text {
                role: Role::Assistant,
                content,
            } => Some(content.to_text()),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Fold the output into the assistant message appended to the
    /// conversation. Returns `None` for an empty completion.
    pub fn to_assistant_message(&self) -> Option<ChatMessage> {
        if self.output.is_empty() {
            return None;
        }

        let text: String = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { content, .. } => Some(content.to_text()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let calls: Vec<ToolCall> = self.tool_calls().into_iter().cloned().collect();

        let mut message = ChatMessage::assistant(text);
        if !calls.is_empty() {
            message.tool_calls = Some(calls);
        }
        Some(message)
    }
}

/// Everything needed for one inference
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Tool>,
    pub temperature: Option<f32>,
}

/// Error type for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Empty response from model")]
    EmptyResponse,
}

/// Opaque text-completion capability used by every agent
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_are_joined() {
        let content = MessageContent::Segments(vec!["Counter ".into(), "App".into()]);
        assert_eq!(content.to_text(), "Counter App");
        assert_eq!(MessageContent::from("plain").to_text(), "plain");
    }

    #[test]
    fn test_first_text_requires_text_item() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "terminal".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let completion = Completion {
            output: vec![OutputItem::ToolCall(call), OutputItem::Text {
                role: Role::Assistant,
                content: "done".into(),
            }],
        };
        assert_eq!(completion.first_text(), None);
        assert_eq!(Completion::default().first_text(), None);
        assert_eq!(Completion::text("hi").first_text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_assistant_message_carries_tool_calls() {
        let completion = Completion {
            output: vec![
                OutputItem::Text {
                    role: Role::Assistant,
                    content: "Installing".into(),
                },
                OutputItem::ToolCall(ToolCall {
                    id: "call_1".into(),
                    name: "terminal".into(),
                    arguments: serde_json::json!({"command": "npm i"}),
                }),
            ],
        };
        let message = completion.to_assistant_message().unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.to_text(), "Installing");
        assert_eq!(message.tool_calls.unwrap()[0].name, "terminal");
        assert!(Completion::default().to_assistant_message().is_none());
    }

    #[test]
    fn test_chat_message_serialization() {
        let msg = ChatMessage::user("test message");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"test message\""));
        // tool_calls should be skipped when None
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_completion_survives_journal_encoding() {
        let completion = Completion {
            output: vec![
                OutputItem::Text {
                    role: Role::Assistant,
                    content: MessageContent::Segments(vec!["a".into(), "b".into()]),
                },
                OutputItem::ToolCall(ToolCall {
                    id: "call_9".into(),
                    name: "readFiles".into(),
                    arguments: serde_json::json!({"files": ["package.json"]}),
                }),
            ],
        };
        let value = serde_json::to_value(&completion).unwrap();
        assert_eq!(value["output"][0]["type"], "text");
        assert_eq!(value["output"][1]["type"], "tool_call");
        let back: Completion = serde_json::from_value(value).unwrap();
        assert_eq!(back, completion);
    }
}
