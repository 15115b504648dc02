//! Tool Set - the agent's only access to the sandbox
//!
//! Each invocation runs as one durable step. Tool handlers never fail
//! toward the agent: sandbox and argument errors come back as text so the
//! model can react to them on its next turn. Only journal failures (an
//! infrastructure problem) propagate as [`StepError`].

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use super::state::AgentState;
use crate::llm::{Tool, ToolCall};
use crate::metrics::TOOL_CALLS;
use crate::sandbox::{OutputChunk, SandboxError, SandboxProvider};
use crate::step::{StepError, StepRunner};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// A file as exchanged with the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct TerminalArgs {
    command: String,
}

#[derive(Debug, Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

/// Journaled result of a `createOrUpdateFiles` batch
///
/// Files written before a failure are kept in `written`; the sandbox is
/// never rolled back, so Agent State follows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteOutcome {
    pub written: BTreeMap<String, String>,
    pub error: Option<String>,
}

/// The three sandbox tools bound to one sandbox
#[derive(Clone)]
pub struct ToolSet {
    sandboxes: Arc<dyn SandboxProvider>,
    sandbox_id: String,
}

impl ToolSet {
    pub fn new(sandboxes: Arc<dyn SandboxProvider>, sandbox_id: impl Into<String>) -> Self {
        Self {
            sandboxes,
            sandbox_id: sandbox_id.into(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Tool definitions advertised to the model
    pub fn definitions(&self) -> Vec<Tool> {
        vec![
            Tool::function(
                TERMINAL,
                "Use the terminal to run commands",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" }
                    },
                    "required": ["command"]
                }),
            ),
            Tool::function(
                CREATE_OR_UPDATE_FILES,
                "Create or update files in the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": { "type": "string" },
                                    "content": { "type": "string" }
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["files"]
                }),
            ),
            Tool::function(
                READ_FILES,
                "Read files from the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["files"]
                }),
            ),
        ]
    }

    /// Execute one tool call as the step `step_id` and return its output
    pub async fn invoke(
        &self,
        call: &ToolCall,
        step_id: &str,
        state: &mut AgentState,
        steps: &StepRunner,
    ) -> Result<String, StepError> {
        let span = info_span!("tool_call", tool = %call.name, step_id);
        let output = self.dispatch(call, step_id, state, steps).instrument(span).await?;

        let status = if is_failure(&output) { "error" } else { "ok" };
        let label = match call.name.as_str() {
            TERMINAL | CREATE_OR_UPDATE_FILES | READ_FILES => call.name.as_str(),
            _ => "unknown",
        };
        TOOL_CALLS.with_label_values(&[label, status]).inc();
        if status == "error" {
            warn!(tool = %call.name, step_id, "Tool reported a failure to the agent");
        } else {
            info!(tool = %call.name, step_id, output_len = output.len(), "Tool call completed");
        }
        Ok(output)
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        step_id: &str,
        state: &mut AgentState,
        steps: &StepRunner,
    ) -> Result<String, StepError> {
        match call.name.as_str() {
            TERMINAL => {
                let args: TerminalArgs = match parse_args(call) {
                    Ok(args) => args,
                    Err(message) => return Ok(message),
                };
                let command = args.command.as_str();
                steps
                    .run(step_id, || async move {
                        Ok::<_, Infallible>(self.terminal(command).await)
                    })
                    .await
            }
            CREATE_OR_UPDATE_FILES => {
                let args: WriteFilesArgs = match parse_args(call) {
                    Ok(args) => args,
                    Err(message) => return Ok(message),
                };
                let files = args.files.as_slice();
                let outcome: FileWriteOutcome = steps
                    .run(step_id, || async move {
                        Ok::<_, Infallible>(self.write_files(files).await)
                    })
                    .await?;

                // State follows the journaled outcome, so a replay rebuilds it
                let paths: Vec<String> = outcome.written.keys().cloned().collect();
                state.merge_files(outcome.written);
                Ok(match outcome.error {
                    Some(error) => format!("Error: {}", error),
                    None => format!("Updated {} file(s): {}", paths.len(), paths.join(", ")),
                })
            }
            READ_FILES => {
                let args: ReadFilesArgs = match parse_args(call) {
                    Ok(args) => args,
                    Err(message) => return Ok(message),
                };
                let paths = args.files.as_slice();
                steps
                    .run(step_id, || async move {
                        Ok::<_, Infallible>(self.read_files(paths).await)
                    })
                    .await
            }
            other => Ok(format!(
                "Error: unknown tool {:?}; available tools are {}, {} and {}",
                other, TERMINAL, CREATE_OR_UPDATE_FILES, READ_FILES
            )),
        }
    }

    /// Run a command, returning stdout or a formatted failure report
    async fn terminal(&self, command: &str) -> String {
        let mut stdout = String::new();
        let mut stderr = String::new();

        let result = match self.sandboxes.resolve(&self.sandbox_id).await {
            Ok(handle) => {
                let mut collect = |chunk: OutputChunk| match chunk {
                    OutputChunk::Stdout(s) => stdout.push_str(&s),
                    OutputChunk::Stderr(s) => stderr.push_str(&s),
                };
                self.sandboxes.run_command(&handle, command, &mut collect).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(result) if result.success() => result.stdout,
            Ok(result) => command_failed(
                &format!("exit status {}", result.exit_code),
                &stdout,
                &stderr,
            ),
            Err(e) => command_failed(&e.to_string(), &stdout, &stderr),
        }
    }

    async fn write_files(&self, files: &[FileEntry]) -> FileWriteOutcome {
        let mut outcome = FileWriteOutcome::default();

        let handle = match self.sandboxes.resolve(&self.sandbox_id).await {
            Ok(handle) => handle,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        for file in files {
            if let Err(e) = self
                .sandboxes
                .write_file(&handle, &file.path, &file.content)
                .await
            {
                outcome.error = Some(e.to_string());
                return outcome;
            }
            outcome.written.insert(file.path.clone(), file.content.clone());
        }
        outcome
    }

    async fn read_files(&self, paths: &[String]) -> String {
        let result: Result<Vec<FileEntry>, SandboxError> = async {
            let handle = self.sandboxes.resolve(&self.sandbox_id).await?;
            let mut contents = Vec::with_capacity(paths.len());
            for path in paths {
                let content = self.sandboxes.read_file(&handle, path).await?;
                contents.push(FileEntry {
                    path: path.clone(),
                    content,
                });
            }
            Ok(contents)
        }
        .await;

        match result {
            Ok(contents) => serde_json::to_string(&contents)
                .unwrap_or_else(|e| format!("Error: {}", e)),
            Err(e) => format!("Error: {}", e),
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("sandbox_id", &self.sandbox_id)
            .finish()
    }
}

/// Decode tool arguments, or describe why they are invalid
fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, String> {
    serde_json::from_value(call.arguments.clone())
        .map_err(|e| format!("Error: invalid arguments for {}: {}", call.name, e))
}

fn command_failed(error: &str, stdout: &str, stderr: &str) -> String {
    format!(
        "Command failed: {}\nstdout: {}\nstderr: {}",
        error, stdout, stderr
    )
}

fn is_failure(output: &str) -> bool {
    output.starts_with("Error:") || output.starts_with("Command failed:")
}
