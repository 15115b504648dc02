//! Client for OpenAI-compatible `/chat/completions` endpoints

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chat::{
    ChatError, ChatMessage, ChatModel, Completion, CompletionRequest, MessageContent, OutputItem,
    Role, Tool, ToolCall,
};
use crate::metrics::LLM_CALL_DURATION;

/// Wire shape of a message
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Message content: a plain string or an array of typed parts
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContentPart {
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl From<WireContent> for MessageContent {
    fn from(content: WireContent) -> Self {
        match content {
            WireContent::Text(text) => MessageContent::Text(text),
            // Only text parts carry anything the agents read
            WireContent::Parts(parts) => MessageContent::Segments(
                parts
                    .into_iter()
                    .filter(|part| part.part_type == "text" || part.part_type == "output_text")
                    .filter_map(|part| part.text)
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

/// Arguments travel as a JSON-encoded string
#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [Tool],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let tool_calls = message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect::<Vec<_>>()
        });

        // Assistant turns that only call tools carry no content
        let content = if message.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(WireContent::Text(message.content.to_text()))
        };

        Self {
            role: message.role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<WireMessage> for Completion {
    fn from(message: WireMessage) -> Self {
        let mut output = Vec::new();

        if let Some(content) = message.content.map(MessageContent::from) {
            if !content.is_empty() {
                output.push(OutputItem::Text {
                    role: message.role,
                    content,
                });
            }
        }

        for call in message.tool_calls.unwrap_or_default() {
            // Malformed argument JSON is kept verbatim; the tool layer reports
            // it back to the model as an argument error.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::String(call.function.arguments));
            output.push(OutputItem::ToolCall(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }));
        }

        Completion { output }
    }
}

/// Chat client for any OpenAI-compatible provider
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Bearer token, if the provider requires one
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_body<'a>(request: &'a CompletionRequest) -> WireRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(WireMessage::from(&ChatMessage::system(request.system.as_str())));
        }
        messages.extend(request.messages.iter().map(WireMessage::from));

        WireRequest {
            model: &request.model,
            messages,
            tools: &request.tools,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);

        let timer = LLM_CALL_DURATION
            .with_label_values(&[&request.model])
            .start_timer();

        let mut http = self.client.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        let text = response.text().await?;
        timer.observe_duration();

        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let parsed: WireResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;

        let completion = Completion::from(choice.message);
        debug!(
            model = %request.model,
            items = completion.output.len(),
            tool_calls = completion.tool_calls().len(),
            "Chat completion received"
        );
        Ok(completion)
    }
}
