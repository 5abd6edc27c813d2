//! Command-run collaborator.
//!
//! Commands arrive already tokenized and allowlisted. They are spawned
//! directly, without an intermediate shell, in the workspace root with stdin
//! closed. A timed-out child is killed and reaped before returning.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Timeout for collecting stdout/stderr after the child exits or is killed.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum bytes kept from each of stdout and stderr.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("empty command")]
    Empty,
    #[error("program not found: {0}")]
    NotFound(String),
    #[error("command timed out after {0} seconds")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Exit code 0 is the only success signal.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, tokens: &[String], working_dir: &Path) -> Result<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Per-command timeout (zero disables it).
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, tokens: &[String], working_dir: &Path) -> Result<CommandOutput> {
        let (program, args) = tokens.split_first().ok_or(ShellError::Empty)?;
        debug!(command = %tokens.join(" "), "spawning command");

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ShellError::NotFound(program.clone()),
                _ => ShellError::Io(err),
            })?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let max = self.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_bounded(pipe, max)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_bounded(pipe, max)));

        let status = if self.timeout.is_zero() {
            child.wait().await?
        } else {
            match tokio::time::timeout(self.timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        command = %tokens.join(" "),
                        timeout_sec = self.timeout.as_secs(),
                        "command timed out; killing"
                    );
                    if let Err(err) = child.kill().await {
                        warn!(error = %err, "failed to kill timed-out command");
                    }
                    let _ = child.wait().await;
                    return Err(ShellError::Timeout(self.timeout.as_secs()));
                }
            }
        };

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let exit_code = status.code().unwrap_or(-1);

        debug!(
            command = %tokens.join(" "),
            exit_code,
            duration_ms,
            "command finished"
        );

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            duration_ms,
        })
    }
}

async fn collect(task: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>) -> Vec<u8> {
    let Some(task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(IO_CAPTURE_TIMEOUT, task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(err))) => {
            warn!(error = %err, "failed to read command output");
            Vec::new()
        }
        Ok(Err(err)) => {
            warn!(error = %err, "output reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!("output capture timed out");
            Vec::new()
        }
    }
}

/// Read from an async reader with a maximum byte limit, draining the rest.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "command output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }

        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }

    Ok(buf)
}
