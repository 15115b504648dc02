//! Agent module for the coding-agent loop
//!
//! This module provides the pieces the workflow wires together:
//! - A coding agent that runs one inference plus its tool calls per turn
//! - Sandbox tools (terminal, createOrUpdateFiles, readFiles)
//! - A router that stops on the task summary or after the turn budget
//! - Tool-less post-processing agents for the title and the reply
//!
//! # Architecture
//!
//! ```text
//! User Instruction + History → AgentNetwork
//!                  ↓
//!           route(state) → CodingAgent
//!                  ↓
//!           Chat model (with tools)      [step: turn-N/inference]
//!                  ↓
//!           observe <task_summary>
//!                  ↓
//!           Tool calls → Sandbox         [step: turn-N/tool-I/<name>]
//!                  ↓
//!           Tool messages → Loop or Stop
//! ```

pub mod coding;
pub mod network;
pub mod post;
pub mod state;
pub mod tools;

pub use coding::{CodingAgent, TurnReport};
pub use network::{route, AgentNetwork, NetworkPhase, NetworkRun, NextAction, StopReason, DEFAULT_MAX_ITERATIONS};
pub use post::{text_or_fallback, OneShotAgent, RESPONSE_FALLBACK, TITLE_FALLBACK};
pub use state::{AgentState, TaskStatus};
pub use tools::{FileEntry, FileWriteOutcome, ToolSet, CREATE_OR_UPDATE_FILES, READ_FILES, TERMINAL};
