//! Agent Network - routes turns until the task completes or the budget runs out
//!
//! ```text
//!   Iterating ──route()──► Continue(agent) ──run_turn()──┐
//!       ▲                                                 │
//!       └─────────────────────────────────────────────────┘
//!       │
//!       └──route()──► Stop ──► Done(Completed)
//!       └──turns == max_iterations ──► Done(IterationLimit)
//! ```

use tracing::{debug, info, info_span, warn, Instrument};

use super::coding::{CodingAgent, TurnReport};
use super::state::AgentState;
use crate::llm::ChatMessage;
use crate::metrics::AGENT_TURNS;
use crate::step::{StepError, StepRunner};

/// Default upper bound on turns per run
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Router decision taken before each turn
#[derive(Debug, Clone, Copy)]
pub enum NextAction<'a> {
    Continue(&'a CodingAgent),
    Stop,
}

/// Phase of the network loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPhase {
    Iterating,
    Done(StopReason),
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The task summary was captured
    Completed,
    /// The turn budget was exhausted without a summary
    IterationLimit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::IterationLimit => "iteration_limit",
        }
    }
}

/// Stop once a summary exists, otherwise hand the turn to the coding agent
pub fn route<'a>(agent: &'a CodingAgent, state: &AgentState) -> NextAction<'a> {
    if state.is_complete() {
        NextAction::Stop
    } else {
        NextAction::Continue(agent)
    }
}

/// Final result of a network run
#[derive(Debug, Clone)]
pub struct NetworkRun {
    pub state: AgentState,
    pub turns: usize,
    pub stop_reason: StopReason,
    pub conversation: Vec<ChatMessage>,
    /// One report per executed turn, in order
    pub reports: Vec<TurnReport>,
}

/// A single-agent network with a bounded turn budget
pub struct AgentNetwork {
    name: String,
    agent: CodingAgent,
    max_iterations: usize,
}

impl AgentNetwork {
    pub fn new(agent: CodingAgent, max_iterations: usize) -> Self {
        Self {
            name: "coding-agent-network".to_string(),
            agent,
            max_iterations,
        }
    }

    pub fn agent(&self) -> &CodingAgent {
        &self.agent
    }

    /// Run the loop for one user instruction
    ///
    /// # Arguments
    /// * `input` - The user instruction, appended after `history`
    /// * `history` - Prior conversation, oldest first
    /// * `state` - Initial Agent State
    /// * `steps` - Step runner of the enclosing workflow run
    pub async fn run(
        &self,
        input: &str,
        history: Vec<ChatMessage>,
        state: AgentState,
        steps: &StepRunner,
    ) -> Result<NetworkRun, StepError> {
        let mut conversation = history;
        conversation.push(ChatMessage::user(input));

        let mut state = state;
        let mut turns = 0;
        let mut reports = Vec::new();
        let mut phase = NetworkPhase::Iterating;

        while phase == NetworkPhase::Iterating {
            phase = match route(&self.agent, &state) {
                NextAction::Stop => NetworkPhase::Done(StopReason::Completed),
                NextAction::Continue(_) if turns >= self.max_iterations => {
                    NetworkPhase::Done(StopReason::IterationLimit)
                }
                NextAction::Continue(agent) => {
                    turns += 1;
                    let span = info_span!(
                        "agent_turn",
                        network = %self.name,
                        agent = %agent.name(),
                        turn = turns,
                        otel.name = "agent_turn"
                    );
                    let report = agent
                        .run_turn(turns, &mut conversation, &mut state, steps)
                        .instrument(span)
                        .await?;
                    debug!(
                        network = %self.name,
                        turn = report.turn,
                        tool_calls = report.tool_calls,
                        completed = report.completed,
                        "Turn finished"
                    );
                    reports.push(report);
                    NetworkPhase::Iterating
                }
            };
        }

        let stop_reason = match phase {
            NetworkPhase::Done(reason) => reason,
            NetworkPhase::Iterating => StopReason::IterationLimit,
        };
        AGENT_TURNS.observe(turns as f64);
        match stop_reason {
            StopReason::Completed => {
                info!(network = %self.name, turns, files = state.files.len(), "Network finished")
            }
            StopReason::IterationLimit => {
                warn!(network = %self.name, turns, "Turn budget exhausted without a task summary")
            }
        }

        Ok(NetworkRun {
            state,
            turns,
            stop_reason,
            conversation,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::agent::tools::ToolSet;
    use crate::llm::{ChatError, ChatModel, Completion, CompletionRequest, OutputItem, ToolCall};
    use crate::sandbox::{LocalSandboxProvider, SandboxProvider};
    use crate::step::RetryPolicy;

    /// Replays canned completions; repeats the last one when exhausted
    struct Scripted {
        replies: Mutex<VecDeque<Completion>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Completion>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ChatError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.pop_front().unwrap())
            } else {
                replies.front().cloned().ok_or(ChatError::EmptyResponse)
            }
        }
    }

    async fn network(model: Arc<Scripted>, dir: &tempfile::TempDir) -> AgentNetwork {
        let sandboxes = Arc::new(LocalSandboxProvider::new(dir.path(), "sandbox.test"));
        let handle = sandboxes.create("nextjs").await.unwrap();
        let tools = ToolSet::new(sandboxes, handle.sandbox_id);
        let agent = CodingAgent::new(model, "test-model", "be helpful", 0.1, tools);
        AgentNetwork::new(agent, DEFAULT_MAX_ITERATIONS)
    }

    fn write_call(path: &str) -> Completion {
        Completion {
            output: vec![OutputItem::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "createOrUpdateFiles".into(),
                arguments: serde_json::json!({"files": [{"path": path, "content": "x"}]}),
            })],
        }
    }

    #[tokio::test]
    async fn test_route_stops_once_summary_exists() {
        let dir = tempfile::tempdir().unwrap();
        let net = network(Scripted::new(vec![]), &dir).await;
        let mut state = AgentState::new();

        assert!(matches!(route(net.agent(), &state), NextAction::Continue(_)));
        state.summary = "<task_summary>done</task_summary>".into();
        assert!(matches!(route(net.agent(), &state), NextAction::Stop));
    }

    #[tokio::test]
    async fn test_completes_after_write_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![
            write_call("app/page.tsx"),
            Completion::text("<task_summary>\nAdded a page.\n</task_summary>"),
        ]);
        let net = network(model.clone(), &dir).await;
        let steps = StepRunner::in_memory("net-1", RetryPolicy::default());

        let run = net
            .run("build a page", Vec::new(), AgentState::new(), &steps)
            .await
            .unwrap();

        assert_eq!(run.stop_reason, StopReason::Completed);
        assert_eq!(run.turns, 2);
        assert_eq!(model.calls(), 2);
        assert!(run.state.summary.contains("<task_summary>"));
        assert!(run.state.files.contains_key("app/page.tsx"));
        // user, assistant(tool call), tool, assistant(summary)
        assert_eq!(run.conversation.len(), 4);
        assert_eq!(run.conversation[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            run.reports,
            vec![
                TurnReport { turn: 1, tool_calls: 1, completed: false },
                TurnReport { turn: 2, tool_calls: 0, completed: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_at_iteration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![Completion::text("still thinking")]);
        let net = network(model.clone(), &dir).await;
        let steps = StepRunner::in_memory("net-2", RetryPolicy::default());

        let run = net
            .run("never finish", Vec::new(), AgentState::new(), &steps)
            .await
            .unwrap();

        assert_eq!(run.stop_reason, StopReason::IterationLimit);
        assert_eq!(run.turns, DEFAULT_MAX_ITERATIONS);
        assert_eq!(model.calls(), DEFAULT_MAX_ITERATIONS);
        assert!(run.state.summary.is_empty());
    }

    #[tokio::test]
    async fn test_tools_in_summary_turn_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut reply = write_call("late.txt");
        reply.output.insert(
            0,
            OutputItem::Text {
                role: crate::llm::Role::Assistant,
                content: "<task_summary>done</task_summary>".into(),
            },
        );
        let net = network(Scripted::new(vec![reply]), &dir).await;
        let steps = StepRunner::in_memory("net-3", RetryPolicy::default());

        let run = net
            .run("one shot", Vec::new(), AgentState::new(), &steps)
            .await
            .unwrap();
        assert_eq!(run.turns, 1);
        assert_eq!(run.reports, vec![TurnReport { turn: 1, tool_calls: 1, completed: true }]);
        assert!(run.state.files.contains_key("late.txt"));
    }
}
