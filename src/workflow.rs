//! Code Agent Workflow - end-to-end orchestration of one run
//!
//! ```text
//! RunEvent { projectId, value }
//!     │
//!     ├─ get-sandbox-id          create sandbox, set its timeout once
//!     ├─ get-previous-messages   5 newest messages, reordered oldest first
//!     ├─ AgentNetwork::run       turn-N/inference, turn-N/tool-I/<name>
//!     ├─ generate-title          fallback "Fragment"
//!     ├─ generate-response       fallback "Here you go"
//!     ├─ get-sandbox-url         https://<host> of the app port
//!     └─ save-result             exactly one RESULT or ERROR record
//!     │
//!     ▼
//! WorkflowOutput { url, title, files, summary }
//! ```
//!
//! Every side effect runs as a durable step of the run's [`StepRunner`], so
//! a resumed run replays completed steps and re-executes only the rest.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::agent::{AgentNetwork, AgentState, CodingAgent, OneShotAgent, ToolSet};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatModel, CODE_AGENT_PROMPT};
use crate::metrics::WORKFLOW_RUNS;
use crate::sandbox::{SandboxError, SandboxProvider};
use crate::step::{RetryPolicy, StepError, StepRunner};
use crate::store::{Fragment, Message, MessageRole, MessageStore, NewMessage};

/// Trigger of one workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub project_id: String,
    /// The user instruction
    pub value: String,
    /// Id used for the step journal and the result idempotency key; a new
    /// UUID v7 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunEvent {
    pub fn new(project_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            value: value.into(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Value returned by a completed run, whatever its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
    pub summary: String,
}

/// Error type for workflow runs
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid run event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Step(#[from] StepError),
}

/// Convert stored history (newest first) into chat messages, oldest first
pub fn history_to_conversation(messages: Vec<Message>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .rev()
        .map(|message| match message.role {
            MessageRole::Assistant => ChatMessage::assistant(message.content),
            MessageRole::User => ChatMessage::user(message.content),
        })
        .collect()
}

/// The coding-agent workflow bound to its collaborators
pub struct CodeAgentWorkflow {
    config: AgentConfig,
    model: Arc<dyn ChatModel>,
    sandboxes: Arc<dyn SandboxProvider>,
    store: Arc<dyn MessageStore>,
}

impl CodeAgentWorkflow {
    /// Create a workflow
    ///
    /// # Arguments
    /// * `config` - Models, budgets, sandbox and journal settings
    /// * `model` - Chat model shared by all agents of a run
    /// * `sandboxes` - Provider the sandbox of each run is created on
    /// * `store` - Conversation store for history and results
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ChatModel>,
        sandboxes: Arc<dyn SandboxProvider>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            config,
            model,
            sandboxes,
            store,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.step_retries,
            delay: self.config.step_retry_delay(),
        }
    }

    /// Open the step journal of `run_id`, resuming it when present
    pub async fn step_runner(&self, run_id: &str) -> Result<StepRunner, StepError> {
        match &self.config.journal_dir {
            Some(dir) => StepRunner::open(dir, run_id, self.retry_policy()).await,
            None => Ok(StepRunner::in_memory(run_id, self.retry_policy())),
        }
    }

    /// Handle one trigger event
    pub async fn run(&self, event: RunEvent) -> Result<WorkflowOutput, WorkflowError> {
        let run_id = event
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let steps = self.step_runner(&run_id).await?;
        self.run_with(&event, &steps).await
    }

    /// Handle one trigger event on an existing step runner
    pub async fn run_with(
        &self,
        event: &RunEvent,
        steps: &StepRunner,
    ) -> Result<WorkflowOutput, WorkflowError> {
        if event.project_id.is_empty() {
            return Err(WorkflowError::InvalidEvent("projectId is empty".to_string()));
        }

        let span = info_span!(
            "code_agent_run",
            run_id = %steps.run_id(),
            project_id = %event.project_id,
            otel.name = "code_agent_run"
        );

        let result = self.execute(event, steps).instrument(span).await;
        match &result {
            Ok((_, outcome)) => WORKFLOW_RUNS.with_label_values(&[*outcome]).inc(),
            Err(_) => WORKFLOW_RUNS.with_label_values(&["failed"]).inc(),
        }
        result.map(|(output, _)| output)
    }

    async fn execute(
        &self,
        event: &RunEvent,
        steps: &StepRunner,
    ) -> Result<(WorkflowOutput, &'static str), WorkflowError> {
        info!(run_id = %steps.run_id(), project_id = %event.project_id, "Starting code agent run");

        let sandboxes = &self.sandboxes;
        let store = &self.store;
        let config = &self.config;
        let project_id = event.project_id.as_str();

        let sandbox_id: String = steps
            .run("get-sandbox-id", || async move {
                let handle = sandboxes.create(&config.sandbox_template).await?;
                let handle = sandboxes.set_timeout(&handle, config.sandbox_timeout()).await?;
                Ok::<_, SandboxError>(handle.sandbox_id)
            })
            .await?;

        let history: Vec<ChatMessage> = steps
            .run("get-previous-messages", || async move {
                store
                    .recent_messages(project_id, config.history_limit)
                    .await
                    .map(history_to_conversation)
            })
            .await?;
        info!(sandbox_id = %sandbox_id, history = history.len(), "Sandbox ready");

        let agent = CodingAgent::new(
            self.model.clone(),
            &config.model,
            config
                .system_prompt
                .clone()
                .unwrap_or_else(|| CODE_AGENT_PROMPT.to_string()),
            config.temperature,
            ToolSet::new(self.sandboxes.clone(), sandbox_id.clone()),
        );
        let network = AgentNetwork::new(agent, config.max_iterations);
        let run = network
            .run(&event.value, history, AgentState::new(), steps)
            .await?;
        let state = run.state;

        let title = OneShotAgent::title_generator(self.model.clone(), &config.post_processing_model)
            .generate("generate-title", &state.summary, steps)
            .await?;
        let response =
            OneShotAgent::response_generator(self.model.clone(), &config.post_processing_model)
                .generate("generate-response", &state.summary, steps)
                .await?;

        let is_error = !state.is_success();

        let sandbox_id = sandbox_id.as_str();
        let url: String = steps
            .run("get-sandbox-url", || async move {
                let handle = sandboxes.resolve(sandbox_id).await?;
                Ok::<_, SandboxError>(format!(
                    "https://{}",
                    sandboxes.host(&handle, config.sandbox_port)
                ))
            })
            .await?;

        let record = if is_error {
            NewMessage::error(project_id)
        } else {
            NewMessage::result(
                project_id,
                response.clone(),
                Fragment {
                    sandbox_url: url.clone(),
                    title: title.clone(),
                    files: state.files.clone(),
                },
            )
        };
        let record = record.with_idempotency_key(steps.run_id());

        let record = &record;
        let saved: Message = steps
            .run("save-result", || async move {
                store.create_message(record.clone()).await
            })
            .await?;

        let outcome = if is_error { "error" } else { "result" };
        info!(
            run_id = %steps.run_id(),
            message_id = %saved.id,
            outcome,
            turns = run.turns,
            stop_reason = run.stop_reason.as_str(),
            files = state.files.len(),
            "Code agent run finished"
        );

        Ok((
            WorkflowOutput {
                url,
                title,
                files: state.files,
                summary: state.summary,
            },
            outcome,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_event_wire_format() {
        let event: RunEvent =
            serde_json::from_str(r#"{"projectId":"p1","value":"make a counter"}"#).unwrap();
        assert_eq!(event, RunEvent::new("p1", "make a counter"));

        let json = serde_json::to_value(event.with_run_id("r1")).unwrap();
        assert_eq!(json["runId"], "r1");
    }

    #[test]
    fn test_history_is_reordered_oldest_first() {
        let mut stored = Vec::new();
        let first = crate::store::append(&mut stored, NewMessage::user("p1", "first"));
        let second = crate::store::append(&mut stored, NewMessage::error("p1"));

        let conversation = history_to_conversation(vec![second, first]);
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, crate::llm::Role::User);
        assert_eq!(conversation[0].content.to_text(), "first");
        assert_eq!(conversation[1].role, crate::llm::Role::Assistant);
    }
}
