//! Sandforge - durable coding-agent orchestration
//!
//! This library runs an LLM coding agent against a sandbox until it reports
//! a task summary or exhausts its turn budget, then derives a title and a
//! reply and persists exactly one outcome record per run.
//!
//! # Modules
//!
//! - `agent` - Agent State, sandbox tools, coding agent, router, post-processing
//! - `workflow` - End-to-end orchestration of one run
//! - `step` - Durable steps with a replayable JSON journal
//! - `llm` - Chat types, OpenAI-compatible client, prompts
//! - `sandbox` - Sandbox provider contract and the local provider
//! - `store` - Conversation message store (JSON files or memory)
//! - `config` - Runtime configuration with env overrides
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sandforge::{AgentConfig, ChatClient, CodeAgentWorkflow, JsonMessageStore, LocalSandboxProvider, RunEvent};
//!
//! let config = AgentConfig::from_env()?;
//! let workflow = CodeAgentWorkflow::new(
//!     config.clone(),
//!     Arc::new(ChatClient::new(&config.api_base_url, config.api_key.clone())),
//!     Arc::new(LocalSandboxProvider::new(&config.sandbox_root, &config.sandbox_host_suffix)),
//!     Arc::new(JsonMessageStore::new(&config.store_dir)?),
//! );
//! let output = workflow.run(RunEvent::new("project-1", "create a React counter")).await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod step;
pub mod store;
pub mod tracing;
pub mod workflow;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentState, TaskStatus};
pub use config::AgentConfig;
pub use llm::{ChatClient, ChatModel};
pub use sandbox::{LocalSandboxProvider, SandboxProvider};
pub use step::{RetryPolicy, StepRunner};
pub use store::{JsonMessageStore, MemoryMessageStore, MessageStore};
pub use workflow::{CodeAgentWorkflow, RunEvent, WorkflowError, WorkflowOutput};
