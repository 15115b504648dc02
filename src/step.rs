//! Durable steps with a JSON journal
//!
//! Every side-effecting unit of a workflow run executes through
//! [`StepRunner::run`] under a stable step id. The first successful result
//! of a step is journaled; running the same id again (for example after the
//! process crashed and the run was resumed) returns the journaled value
//! instead of executing the step a second time.
//!
//! ```text
//! run("turn-2/tool-0/terminal", op)
//!        │
//!        ├── journaled? ──yes──► decode and return (replay)
//!        │
//!        └── no ──► op() ──ok──► journal + persist ──► return
//!                     │
//!                     └──err──► sleep(delay), retry up to max_attempts
//! ```
//!
//! A step that fails in a non-journaled state may run again on resume, so
//! step bodies must be safe to execute more than once.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics::STEP_EXECUTIONS;

/// How often, and how patiently, a failing step is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

/// Error type for step execution
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("step {id} failed after {attempts} attempt(s): {message}")]
    Exhausted {
        id: String,
        attempts: u32,
        message: String,
    },
    #[error("journal {path} belongs to run {found}, not {expected}")]
    RunMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("invalid run id {0:?}")]
    InvalidRunId(String),
    #[error("journal I/O error: {0}")]
    Journal(#[from] std::io::Error),
    #[error("journal encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// On-disk journal of one run
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    run_id: String,
    steps: BTreeMap<String, serde_json::Value>,
}

/// Executes and journals the steps of one workflow run
pub struct StepRunner {
    run_id: String,
    journal: Mutex<Journal>,
    /// Journal file; in-memory only when None
    path: Option<PathBuf>,
    policy: RetryPolicy,
}

impl StepRunner {
    /// Journal kept in memory only (no resume across processes)
    pub fn in_memory(run_id: impl Into<String>, policy: RetryPolicy) -> Self {
        let run_id = run_id.into();
        Self {
            journal: Mutex::new(Journal {
                run_id: run_id.clone(),
                steps: BTreeMap::new(),
            }),
            run_id,
            path: None,
            policy,
        }
    }

    /// Open (or start) the journal `<dir>/<run_id>.json`
    ///
    /// Steps already recorded there are replayed instead of re-executed.
    pub async fn open(
        dir: impl AsRef<Path>,
        run_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self, StepError> {
        let run_id = run_id.into();
        if !is_file_name(&run_id) {
            return Err(StepError::InvalidRunId(run_id));
        }
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", run_id));

        let journal = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let journal: Journal = serde_json::from_str(&json)?;
                if journal.run_id != run_id {
                    return Err(StepError::RunMismatch {
                        path,
                        expected: run_id,
                        found: journal.run_id,
                    });
                }
                debug!(run_id = %run_id, steps = journal.steps.len(), "Resuming journal");
                journal
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Journal {
                run_id: run_id.clone(),
                steps: BTreeMap::new(),
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            run_id,
            journal: Mutex::new(journal),
            path: Some(path),
            policy,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether `id` has a journaled result
    pub async fn is_completed(&self, id: &str) -> bool {
        self.journal.lock().await.steps.contains_key(id)
    }

    /// Ids of all journaled steps, sorted
    pub async fn completed_steps(&self) -> Vec<String> {
        self.journal.lock().await.steps.keys().cloned().collect()
    }

    /// Run a step at most once per journal
    ///
    /// # Arguments
    /// * `id` - Stable id of the step within this run
    /// * `op` - Step body; called again on failure per the retry policy
    pub async fn run<T, E, F, Fut>(&self, id: &str, mut op: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let journaled = self.journal.lock().await.steps.get(id).cloned();
        if let Some(value) = journaled {
            STEP_EXECUTIONS.with_label_values(&["replayed"]).inc();
            debug!(run_id = %self.run_id, step_id = id, "Replaying journaled step");
            return Ok(serde_json::from_value(value)?);
        }

        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let span = info_span!("step", run_id = %self.run_id, step_id = id, attempt);
            match op().instrument(span).await {
                Ok(value) => {
                    self.record(id, serde_json::to_value(&value)?).await?;
                    STEP_EXECUTIONS.with_label_values(&["executed"]).inc();
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        run_id = %self.run_id,
                        step_id = id,
                        attempt,
                        max_attempts = attempts,
                        error = %last_error,
                        "Step attempt failed"
                    );
                    if attempt < attempts {
                        STEP_EXECUTIONS.with_label_values(&["retried"]).inc();
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        STEP_EXECUTIONS.with_label_values(&["exhausted"]).inc();
        Err(StepError::Exhausted {
            id: id.to_string(),
            attempts,
            message: last_error,
        })
    }

    /// Journal a result and flush the journal file
    async fn record(&self, id: &str, value: serde_json::Value) -> Result<(), StepError> {
        let mut journal = self.journal.lock().await;
        journal.steps.insert(id.to_string(), value);

        if let Some(path) = &self.path {
            // Write-then-rename so a crash never leaves a torn journal
            let json = serde_json::to_string_pretty(&*journal)?;
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, path).await?;
        }
        Ok(())
    }
}

/// A run id names its journal file, so it must be a single plain path component
fn is_file_name(run_id: &str) -> bool {
    let mut components = Path::new(run_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !run_id.contains(|c: char| c == '/' || c == '\\')
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("run_id", &self.run_id)
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_completed_step_is_not_executed_again() {
        let steps = StepRunner::in_memory("run-1", fast());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: u32 = steps
                .run("count", || async {
                    Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) + 10)
                })
                .await
                .unwrap();
            assert_eq!(value, 10);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(steps.is_completed("count").await);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_retried() {
        let steps = StepRunner::in_memory("run-2", fast());
        let calls = AtomicU32::new(0);

        let value: String = steps
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("connection reset")
                } else {
                    Ok("ok".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_step_reports_last_error_and_is_not_journaled() {
        let steps = StepRunner::in_memory("run-3", fast());

        let result: Result<(), _> = steps
            .run("broken", || async { Err::<(), _>("disk full") })
            .await;

        match result {
            Err(StepError::Exhausted { id, attempts, message }) => {
                assert_eq!(id, "broken");
                assert_eq!(attempts, 3);
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!steps.is_completed("broken").await);
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let steps = StepRunner::open(dir.path(), "run-4", fast()).await.unwrap();
            let _: Vec<String> = steps
                .run("get-sandbox-id", || async { Ok::<_, String>(vec!["sbx-1".to_string()]) })
                .await
                .unwrap();
        }

        let resumed = StepRunner::open(dir.path(), "run-4", fast()).await.unwrap();
        let value: Vec<String> = resumed
            .run("get-sandbox-id", || async {
                Err::<Vec<String>, _>("must not run on resume")
            })
            .await
            .unwrap();
        assert_eq!(value, vec!["sbx-1".to_string()]);
        assert_eq!(resumed.completed_steps().await, vec!["get-sandbox-id".to_string()]);
    }

    #[tokio::test]
    async fn test_foreign_journal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"run_id": "someone-else", "steps": {}}"#;
        std::fs::write(dir.path().join("run-5.json"), json).unwrap();

        let result = StepRunner::open(dir.path(), "run-5", fast()).await;
        assert!(matches!(result, Err(StepError::RunMismatch { .. })));
    }

    #[tokio::test]
    async fn test_run_id_cannot_leave_the_journal_dir() {
        let root = tempfile::tempdir().unwrap();
        let journals = root.path().join("journals");

        for run_id in ["../escaped", "nested/run", "/tmp/absolute", "..", ".", ""] {
            let result = StepRunner::open(&journals, run_id, fast()).await;
            match result {
                Err(StepError::InvalidRunId(id)) => assert_eq!(id, run_id),
                other => panic!("{:?} accepted: {:?}", run_id, other),
            }
        }
        assert!(!root.path().join("escaped.json").exists());
        assert!(!journals.exists());

        let steps = StepRunner::open(&journals, "0192-run.v7", fast()).await.unwrap();
        assert_eq!(steps.run_id(), "0192-run.v7");
    }
}
