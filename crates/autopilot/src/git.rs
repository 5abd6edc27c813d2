//! Version-control collaborator.
//!
//! Commits go through `git`, pull requests through `git push` followed by
//! `gh pr create` against the current branch.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute {program}: {source}")]
    Execution {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid utf-8 in {0} output")]
    InvalidUtf8(String),
    #[error("no current branch (detached HEAD)")]
    DetachedHead,
}

pub type Result<T> = std::result::Result<T, GitError>;

/// A commit that landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub sha: String,
    pub message: String,
}

/// A pull request that was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrOutcome {
    pub pr_url: String,
    pub branch: String,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage exactly `files` and commit them.
    async fn commit(&self, message: &str, files: &[String]) -> Result<CommitOutcome>;

    /// Stage every change in the working tree and commit.
    async fn commit_all(&self, message: &str) -> Result<CommitOutcome>;

    /// Push the current branch and open a pull request for it.
    async fn create_pr(&self, title: &str, body: &str) -> Result<PrOutcome>;
}

/// Shells out to `git` and `gh` in the workspace root.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    remote: String,
    excluded: Vec<String>,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
            excluded: Vec::new(),
        }
    }

    /// Root-relative paths that an all-changes commit never stages.
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Name of the checked-out branch.
    pub async fn current_branch(&self) -> Result<String> {
        let branch = self.git(&["branch", "--show-current"]).await?;
        if branch.is_empty() {
            return Err(GitError::DetachedHead);
        }
        Ok(branch)
    }

    async fn head_sha(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        self.exec(Path::new("git"), args).await
    }

    /// Run a program in the root and return trimmed stdout, failing on non-zero exit.
    async fn exec(&self, program: &Path, args: &[&str]) -> Result<String> {
        let name = program.display().to_string();
        debug!(program = %name, args = ?args, "running vcs command");
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|source| GitError::Execution {
                program: name.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(GitError::CommandFailed(format!(
                "{name} {}: {detail}",
                args.first().copied().unwrap_or_default()
            )));
        }

        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| GitError::InvalidUtf8(name))
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn commit(&self, message: &str, files: &[String]) -> Result<CommitOutcome> {
        let mut add = vec!["add", "--"];
        add.extend(files.iter().map(String::as_str));
        self.git(&add).await?;
        self.git(&["commit", "-m", message]).await?;
        let sha = self.head_sha().await?;
        info!(sha = %sha, files = files.len(), "committed changes");
        Ok(CommitOutcome {
            sha,
            message: message.to_string(),
        })
    }

    async fn commit_all(&self, message: &str) -> Result<CommitOutcome> {
        let excludes: Vec<String> = self
            .excluded
            .iter()
            .map(|path| format!(":(exclude){path}"))
            .collect();
        let mut add = vec!["add", "-A", "--", "."];
        add.extend(excludes.iter().map(String::as_str));
        self.git(&add).await?;
        self.git(&["commit", "-m", message]).await?;
        let sha = self.head_sha().await?;
        info!(sha = %sha, excluded = self.excluded.len(), "committed all changes");
        Ok(CommitOutcome {
            sha,
            message: message.to_string(),
        })
    }

    async fn create_pr(&self, title: &str, body: &str) -> Result<PrOutcome> {
        let branch = self.current_branch().await?;
        self.git(&["push", "-u", &self.remote, &branch]).await?;
        let pr_url = self
            .exec(
                Path::new("gh"),
                &["pr", "create", "--title", title, "--body", body, "--head", &branch],
            )
            .await?;
        info!(branch = %branch, pr_url = %pr_url, "pull request created");
        Ok(PrOutcome { pr_url, branch })
    }
}
