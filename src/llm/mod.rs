//! LLM integration module
//!
//! This module provides the provider-neutral chat types used by the agent
//! loop, a client for OpenAI-compatible chat completion APIs, and the
//! system prompts of every agent.

pub mod chat;
pub mod openai;
pub mod prompts;

pub use chat::{
    ChatError, ChatMessage, ChatModel, Completion, CompletionRequest, MessageContent, OutputItem,
    Role, Tool, ToolCall, ToolFunction,
};
pub use openai::ChatClient;
pub use prompts::{CODE_AGENT_PROMPT, COMPLETION_MARKER, FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT};
