//! Coding Agent - one inference plus tool execution per turn

use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use super::state::{AgentState, TaskStatus};
use super::tools::ToolSet;
use crate::llm::{ChatMessage, ChatModel, CompletionRequest};
use crate::step::{StepError, StepRunner};

/// Outcome of a single turn, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub turn: usize,
    pub tool_calls: usize,
    /// Whether this turn's response completed the task
    pub completed: bool,
}

/// The only agent in the network
pub struct CodingAgent {
    name: String,
    model_name: String,
    system_prompt: String,
    temperature: f32,
    model: Arc<dyn ChatModel>,
    tools: ToolSet,
}

impl CodingAgent {
    /// Create a coding agent
    ///
    /// # Arguments
    /// * `model` - Chat model used for every inference
    /// * `model_name` - Model identifier sent with each request
    /// * `system_prompt` - Fixed coding instructions
    /// * `temperature` - Sampling temperature
    /// * `tools` - Sandbox tools bound to this run's sandbox
    pub fn new(
        model: Arc<dyn ChatModel>,
        model_name: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        tools: ToolSet,
    ) -> Self {
        Self {
            name: "code-agent".to_string(),
            model_name: model_name.into(),
            system_prompt: system_prompt.into(),
            temperature,
            model,
            tools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run turn `turn` (1-based) against the running conversation
    ///
    /// The assistant message and one tool message per call are appended to
    /// `conversation`. The completion signal is observed before any tool of
    /// this turn runs.
    pub async fn run_turn(
        &self,
        turn: usize,
        conversation: &mut Vec<ChatMessage>,
        state: &mut AgentState,
        steps: &StepRunner,
    ) -> Result<TurnReport, StepError> {
        let request = CompletionRequest {
            model: self.model_name.clone(),
            system: self.system_prompt.clone(),
            messages: conversation.clone(),
            tools: self.tools.definitions(),
            temperature: Some(self.temperature),
        };

        let llm_span = info_span!(
            "llm_call",
            agent = %self.name,
            turn,
            model = %self.model_name,
            otel.name = "llm_call"
        );
        let request = &request;
        let model = &self.model;
        let completion = steps
            .run(&format!("turn-{}/inference", turn), || async move {
                model.complete(request).await
            })
            .instrument(llm_span)
            .await?;

        if let Some(message) = completion.to_assistant_message() {
            conversation.push(message);
        }

        let completed = state.observe(TaskStatus::decode(completion.last_assistant_text().as_deref()));
        if completed {
            info!(agent = %self.name, turn, "Task summary received");
        }

        let calls = completion.tool_calls();
        debug!(agent = %self.name, turn, tool_calls = calls.len(), "Executing tool calls");
        for (index, call) in calls.iter().enumerate() {
            let step_id = format!("turn-{}/tool-{}/{}", turn, index, call.name);
            let output = self.tools.invoke(call, &step_id, state, steps).await?;
            conversation.push(ChatMessage::tool(call.id.clone(), output));
        }

        Ok(TurnReport {
            turn,
            tool_calls: calls.len(),
            completed,
        })
    }
}

impl std::fmt::Debug for CodingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodingAgent")
            .field("name", &self.name)
            .field("model", &self.model_name)
            .field("tools", &self.tools)
            .finish()
    }
}
