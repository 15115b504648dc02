//! Post-processing agents - fragment title and user-facing reply
//!
//! Both are single-inference agents without tools that read the task
//! summary. When the model gives nothing usable, a fixed fallback is used.

use std::sync::Arc;

use tracing::{info_span, warn, Instrument};

use crate::llm::{
    ChatMessage, ChatModel, Completion, CompletionRequest, FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT,
};
use crate::step::{StepError, StepRunner};

pub const TITLE_FALLBACK: &str = "Fragment";
pub const RESPONSE_FALLBACK: &str = "Here you go";

/// Text of the first output item, or `fallback` when that item is absent
/// or is not text
pub fn text_or_fallback(completion: &Completion, fallback: &str) -> String {
    completion
        .first_text()
        .unwrap_or_else(|| fallback.to_string())
}

/// A tool-less agent that turns the summary into one piece of text
pub struct OneShotAgent {
    name: &'static str,
    model_name: String,
    system_prompt: &'static str,
    fallback: &'static str,
    model: Arc<dyn ChatModel>,
}

impl OneShotAgent {
    pub fn title_generator(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            name: "fragment-title-generator",
            model_name: model_name.into(),
            system_prompt: FRAGMENT_TITLE_PROMPT,
            fallback: TITLE_FALLBACK,
            model,
        }
    }

    pub fn response_generator(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            name: "response-generator",
            model_name: model_name.into(),
            system_prompt: RESPONSE_PROMPT,
            fallback: RESPONSE_FALLBACK,
            model,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Run the agent as step `step_id` on `summary`
    ///
    /// An inference that still fails after retries degrades to the
    /// fallback; only journal errors are returned.
    pub async fn generate(
        &self,
        step_id: &str,
        summary: &str,
        steps: &StepRunner,
    ) -> Result<String, StepError> {
        let request = CompletionRequest {
            model: self.model_name.clone(),
            system: self.system_prompt.to_string(),
            messages: vec![ChatMessage::user(summary)],
            tools: Vec::new(),
            temperature: None,
        };

        let span = info_span!("post_process", agent = self.name, step_id, otel.name = "post_process");
        let request = &request;
        let model = &self.model;
        let result = steps
            .run(step_id, || async move { model.complete(request).await })
            .instrument(span)
            .await;

        match result {
            Ok(completion) => Ok(text_or_fallback(&completion, self.fallback)),
            Err(StepError::Exhausted { id, attempts, message }) => {
                warn!(
                    agent = self.name,
                    step_id = %id,
                    attempts,
                    error = %message,
                    fallback = self.fallback,
                    "Post-processing failed, using fallback"
                );
                Ok(self.fallback.to_string())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::{ChatError, OutputItem, Role, ToolCall};
    use crate::step::RetryPolicy;

    struct Fixed(Option<Completion>);

    #[async_trait]
    impl ChatModel for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ChatError> {
            self.0.clone().ok_or(ChatError::EmptyResponse)
        }
    }

    fn quick_steps(run_id: &str) -> StepRunner {
        StepRunner::in_memory(
            run_id,
            RetryPolicy {
                max_attempts: 2,
                delay: std::time::Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_text_or_fallback() {
        assert_eq!(text_or_fallback(&Completion::text("Counter App"), TITLE_FALLBACK), "Counter App");
        assert_eq!(text_or_fallback(&Completion::default(), TITLE_FALLBACK), "Fragment");

        let tool_first = Completion {
            output: vec![
                OutputItem::ToolCall(ToolCall {
                    id: "c".into(),
                    name: "terminal".into(),
                    arguments: serde_json::json!({}),
                }),
                OutputItem::Text {
                    role: Role::Assistant,
                    content: "late text".into(),
                },
            ],
        };
        assert_eq!(text_or_fallback(&tool_first, RESPONSE_FALLBACK), "Here you go");
    }

    #[tokio::test]
    async fn test_generate_uses_first_text() {
        let agent = OneShotAgent::title_generator(
            Arc::new(Fixed(Some(Completion::text("Todo List")))),
            "m",
        );
        let title = agent
            .generate("generate-title", "<task_summary>x</task_summary>", &quick_steps("p1"))
            .await
            .unwrap();
        assert_eq!(title, "Todo List");
    }

    #[tokio::test]
    async fn test_generate_falls_back_on_failure() {
        let agent = OneShotAgent::response_generator(Arc::new(Fixed(None)), "m");
        let reply = agent
            .generate("generate-response", "", &quick_steps("p2"))
            .await
            .unwrap();
        assert_eq!(reply, RESPONSE_FALLBACK);
    }
}
