//! Sandbox management module
//!
//! A sandbox is an ephemeral environment with a filesystem, process
//! execution and a network-reachable endpoint. The workflow only talks to
//! it through [`SandboxProvider`], addressing it by id:
//!
//! ```text
//! create(template) ──► SandboxHandle { sandbox_id, expires_at }
//!        │
//!        ▼
//! set_timeout(handle) ─► deadline fixed for the whole run
//!        │
//!        ▼
//! resolve(sandbox_id) ─► handle (any step, any process)
//!        │
//!        ├──► run_command / write_file / read_file
//!        └──► host(port) ─► public endpoint
//! ```
//!
//! Sandboxes are never destroyed explicitly; they stop working once their
//! deadline passes.

pub mod handle;
pub mod local;

use std::time::Duration;

use async_trait::async_trait;

pub use handle::SandboxHandle;
pub use local::LocalSandboxProvider;

/// A chunk of streaming output from a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Final result after a command completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Error type for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox {0} not found")]
    NotFound(String),
    #[error("sandbox {0} has expired")]
    Expired(String),
    #[error("invalid path {0:?}: must stay inside the sandbox")]
    InvalidPath(String),
    #[error("failed to access {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt sandbox metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Access to a family of sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a sandbox from a template
    async fn create(&self, template: &str) -> Result<SandboxHandle, SandboxError>;

    /// Set the sandbox lifetime to `timeout` from now
    async fn set_timeout(
        &self,
        handle: &SandboxHandle,
        timeout: Duration,
    ) -> Result<SandboxHandle, SandboxError>;

    /// Look a sandbox up from its id alone
    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError>;

    /// Run a shell command, streaming output chunks as they arrive
    ///
    /// A non-zero exit status is reported in the result, not as an error.
    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> Result<CommandResult, SandboxError>;

    async fn write_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError>;

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String, SandboxError>;

    /// Public hostname for a port served from the sandbox
    fn host(&self, handle: &SandboxHandle, port: u16) -> String;
}
