//! Local sandbox provider - one directory per sandbox
//!
//! Layout under the provider root:
//!
//! ```text
//! <root>/
//! ├── sbx-0192...json   metadata (handle: id, template, deadline)
//! └── sbx-0192.../      sandbox filesystem, cwd of every command
//! ```
//!
//! Keeping the metadata next to (not inside) the sandbox directory means
//! commands run by the agent cannot rewrite their own deadline. Any process
//! that knows the root can resolve a sandbox from its id.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommandResult, OutputChunk, SandboxError, SandboxHandle, SandboxProvider};
use crate::metrics::SANDBOXES_CREATED;

/// Lifetime of a freshly created sandbox until `set_timeout` is called
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long output written before the shell exited may take to arrive
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Sandboxes backed by local directories and `sh -c` processes
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    /// Directory holding every sandbox and its metadata
    root: PathBuf,
    /// Directory of templates copied into new sandboxes, if any
    templates_dir: Option<PathBuf>,
    /// Domain appended to hostnames
    host_suffix: String,
}

impl LocalSandboxProvider {
    /// Create a provider rooted at `root` (created on first use)
    pub fn new(root: impl Into<PathBuf>, host_suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            templates_dir: None,
            host_suffix: host_suffix.into(),
        }
    }

    /// Seed new sandboxes from `<templates_dir>/<template>` when it exists
    pub fn with_templates(mut self, templates_dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(templates_dir.into());
        self
    }

    /// Filesystem root of a sandbox
    pub fn sandbox_dir(&self, sandbox_id: &str) -> PathBuf {
        self.root.join(sandbox_id)
    }

    fn metadata_path(&self, sandbox_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sandbox_id))
    }

    async fn save_metadata(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let json = serde_json::to_string_pretty(handle)?;
        tokio::fs::write(self.metadata_path(&handle.sandbox_id), json).await?;
        Ok(())
    }

    /// Resolve and reject expired sandboxes
    async fn live(&self, handle: &SandboxHandle) -> Result<SandboxHandle, SandboxError> {
        let current = self.resolve(&handle.sandbox_id).await?;
        if current.is_expired() {
            return Err(SandboxError::Expired(current.sandbox_id));
        }
        Ok(current)
    }

    /// Map a tool-supplied path onto the sandbox directory
    fn file_path(&self, handle: &SandboxHandle, path: &str) -> Result<PathBuf, SandboxError> {
        confine(&self.sandbox_dir(&handle.sandbox_id), path)
    }
}

/// Join `path` under `base`, re-rooting absolute paths and rejecting `..`
fn confine(base: &Path, path: &str) -> Result<PathBuf, SandboxError> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidPath(path.to_string()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(base.join(relative))
}

/// Recursively copy a template tree into a new sandbox
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Forward a child pipe to the output channel, chunked by line
async fn forward<R>(reader: R, tx: mpsc::UnboundedSender<OutputChunk>, wrap: fn(String) -> OutputChunk)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let chunk = wrap(String::from_utf8_lossy(&buf).into_owned());
                if tx.send(chunk).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template: &str) -> Result<SandboxHandle, SandboxError> {
        let sandbox_id = format!("sbx-{}", Uuid::now_v7().simple());
        let dir = self.sandbox_dir(&sandbox_id);
        tokio::fs::create_dir_all(&dir).await?;

        if let Some(templates) = &self.templates_dir {
            let source = templates.join(template);
            if source.is_dir() {
                let target = dir.clone();
                tokio::task::spawn_blocking(move || copy_tree(&source, &target))
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            } else {
                warn!(template, "Template directory not found, starting empty");
            }
        }

        let handle = SandboxHandle::new(sandbox_id, template.to_string(), DEFAULT_TIMEOUT);
        self.save_metadata(&handle).await?;
        SANDBOXES_CREATED.inc();

        info!(sandbox_id = %handle.sandbox_id, template, "Sandbox created");
        Ok(handle)
    }

    async fn set_timeout(
        &self,
        handle: &SandboxHandle,
        timeout: Duration,
    ) -> Result<SandboxHandle, SandboxError> {
        let mut current = self.live(handle).await?;
        current.extend(timeout);
        self.save_metadata(&current).await?;
        debug!(sandbox_id = %current.sandbox_id, expires_at = %current.expires_at, "Sandbox timeout set");
        Ok(current)
    }

    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError> {
        // Ids are single path components; anything else cannot be ours
        let mut parts = Path::new(sandbox_id).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }
        let json = match tokio::fs::read_to_string(self.metadata_path(sandbox_id)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::NotFound(sandbox_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&json)?)
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> Result<CommandResult, SandboxError> {
        let handle = self.live(handle).await?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.sandbox_dir(&handle.sandbox_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward(stdout, tx.clone(), OutputChunk::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(stderr, tx, OutputChunk::Stderr));
        }

        let mut stdout = String::new();
        let mut stderr = String::new();

        // The sandbox deadline bounds every command
        let outcome = tokio::time::timeout(handle.remaining(), async {
            let mut record = |chunk: OutputChunk| {
                match &chunk {
                    OutputChunk::Stdout(s) => stdout.push_str(s),
                    OutputChunk::Stderr(s) => stderr.push_str(s),
                }
                on_output(chunk);
            };

            // The shell's exit ends the command even when a background
            // child still holds the pipes open
            let status = loop {
                tokio::select! {
                    Some(chunk) = rx.recv() => record(chunk),
                    status = child.wait() => break status,
                }
            };

            let grace = tokio::time::sleep(OUTPUT_GRACE);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => record(chunk),
                        None => break,
                    },
                    _ = &mut grace => break,
                }
            }
            status
        })
        .await;

        match outcome {
            Ok(status) => {
                let status = status?;
                Ok(CommandResult {
                    stdout,
                    stderr,
                    // Killed by a signal
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!(sandbox_id = %handle.sandbox_id, command, "Command outlived the sandbox");
                Err(SandboxError::Expired(handle.sandbox_id))
            }
        }
    }

    async fn write_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        let handle = self.live(handle).await?;
        let target = self.file_path(&handle, path)?;
        let file_err = |source| SandboxError::File {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(file_err)?;
        }
        tokio::fs::write(&target, content).await.map_err(file_err)?;
        Ok(())
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String, SandboxError> {
        let handle = self.live(handle).await?;
        let target = self.file_path(&handle, path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|source| SandboxError::File {
                path: path.to_string(),
                source,
            })
    }

    fn host(&self, handle: &SandboxHandle, port: u16) -> String {
        format!("{}-{}.{}", port, handle.sandbox_id, self.host_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dir: &tempfile::TempDir) -> LocalSandboxProvider {
        LocalSandboxProvider::new(dir.path(), "sandbox.test")
    }

    #[test]
    fn test_confine_paths() {
        let base = Path::new("/srv/sbx");
        assert_eq!(confine(base, "src/App.tsx").unwrap(), base.join("src/App.tsx"));
        assert_eq!(
            confine(base, "/home/user/app/page.tsx").unwrap(),
            base.join("home/user/app/page.tsx")
        );
        assert!(matches!(confine(base, "../etc/passwd"), Err(SandboxError::InvalidPath(_))));
        assert!(matches!(confine(base, "/"), Err(SandboxError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_resolve_from_id_alone() {
        let dir = tempfile::tempdir().unwrap();
        let created = provider(&dir).create("nextjs").await.unwrap();

        // A second provider instance shares nothing but the root
        let resolved = provider(&dir).resolve(&created.sandbox_id).await.unwrap();
        assert_eq!(resolved, created);

        let missing = provider(&dir).resolve("sbx-missing").await;
        assert!(matches!(missing, Err(SandboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_files_round_trip_through_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sandboxes = provider(&dir);
        let handle = sandboxes.create("nextjs").await.unwrap();

        sandboxes
            .write_file(&handle, "app/page.tsx", "export default 1")
            .await
            .unwrap();
        let content = sandboxes.read_file(&handle, "app/page.tsx").await.unwrap();
        assert_eq!(content, "export default 1");

        let missing = sandboxes.read_file(&handle, "nope.txt").await;
        assert!(matches!(missing, Err(SandboxError::File { .. })));
    }

    #[tokio::test]
    async fn test_command_streams_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let sandboxes = provider(&dir);
        let handle = sandboxes.create("nextjs").await.unwrap();

        let mut chunks = Vec::new();
        let result = sandboxes
            .run_command(&handle, "echo hello; echo oops >&2; exit 3", &mut |c| chunks.push(c))
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert!(chunks.contains(&OutputChunk::Stdout("hello\n".into())));
        assert!(chunks.contains(&OutputChunk::Stderr("oops\n".into())));
    }

    #[tokio::test]
    async fn test_backgrounded_command_returns_when_shell_exits() {
        let dir = tempfile::tempdir().unwrap();
        let sandboxes = provider(&dir);
        let handle = sandboxes.create("nextjs").await.unwrap();
        let handle = sandboxes
            .set_timeout(&handle, Duration::from_secs(30))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let result = sandboxes
            .run_command(&handle, "sleep 5 & echo started", &mut |_| {})
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.stdout, "started\n");
        assert_eq!(result.exit_code, 0);

        // The sandbox is still usable afterwards
        let next = sandboxes.run_command(&handle, "echo again", &mut |_| {}).await.unwrap();
        assert_eq!(next.stdout, "again\n");
    }

    #[tokio::test]
    async fn test_expired_sandbox_rejects_work() {
        let dir = tempfile::tempdir().unwrap();
        let sandboxes = provider(&dir);
        let handle = sandboxes.create("nextjs").await.unwrap();
        let handle = sandboxes.set_timeout(&handle, Duration::ZERO).await.unwrap();

        let result = sandboxes.write_file(&handle, "a.txt", "x").await;
        assert!(matches!(result, Err(SandboxError::Expired(_))));
        let result = sandboxes.run_command(&handle, "true", &mut |_| {}).await;
        assert!(matches!(result, Err(SandboxError::Expired(_))));
    }

    #[tokio::test]
    async fn test_template_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let templates = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(templates.path().join("nextjs/app")).unwrap();
        std::fs::write(templates.path().join("nextjs/app/page.tsx"), "hello").unwrap();

        let sandboxes = provider(&dir).with_templates(templates.path());
        let handle = sandboxes.create("nextjs").await.unwrap();
        let content = sandboxes.read_file(&handle, "app/page.tsx").await.unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_host_format() {
        let sandboxes = LocalSandboxProvider::new("/tmp/x", "sandbox.test");
        let handle = SandboxHandle::new("sbx-42".into(), "t".into(), Duration::from_secs(1));
        assert_eq!(sandboxes.host(&handle, 3000), "3000-sbx-42.sandbox.test");
    }
}
