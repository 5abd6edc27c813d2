//! Decision executor.
//!
//! Dispatches a validated decision to the collaborators in a fixed order:
//! writes, runs, commit, then pull request. Every collaborator failure and
//! every safety rejection becomes a failed [`ActionRecord`]; nothing
//! propagates past [`Executor::dispatch`].

use crate::git::VersionControl;
use crate::shell::CommandRunner;
use crate::workspace::Workspace;
use autopilot_core::{
    ActionKind, ActionRecord, Command, CommitRequest, Decision, DecisionKind, DecisionOrigin,
    PrRequest, SafetyGate, TaskState, TurnReport,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error recorded when a commit names no usable file and nothing has progressed.
pub const NO_VALID_FILES: &str = "No valid files to commit";

pub struct Executor {
    gate: SafetyGate,
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    vcs: Arc<dyn VersionControl>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("root", &self.gate.root())
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(
        gate: SafetyGate,
        runner: Arc<dyn CommandRunner>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        let workspace = Workspace::new(gate.root()).with_hidden(gate.protected().to_vec());
        Self {
            gate,
            workspace,
            runner,
            vcs,
        }
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Execute one decision and fold the effects into `state`.
    pub async fn dispatch(&self, decision: &Decision, state: &mut TaskState) -> TurnReport {
        let mut report = TurnReport::default();
        let kind = decision.kind;

        for command in &decision.commands {
            match command {
                Command::Write { path, content } if kind.writes_files() => {
                    report.push(self.write(path, content, state));
                }
                Command::Run(line) if kind.runs_commands() => {
                    report.push(self.run(line, state).await);
                }
                Command::Write { path, .. } => {
                    report.push(skipped(kind, &format!("write {path}")));
                }
                Command::Run(line) => report.push(skipped(kind, line)),
            }
        }

        if !decision.commit.is_empty() {
            report.push(self.commit(&decision.commit, state).await);
        }

        if kind == DecisionKind::Pr {
            let (record, pr_url) = self.create_pr(&decision.pr, decision.origin, state).await;
            report.push(record);
            report.pr_url = pr_url;
        }

        if report.actions.is_empty() && kind != DecisionKind::Stop {
            report.error = Some(format!("no commands to dispatch for {}", kind.as_str()));
        }

        report
    }

    fn write(&self, raw_path: &str, content: &str, state: &mut TaskState) -> ActionRecord {
        let path = self.gate.normalize_path(raw_path);
        let target = match self.gate.check_path(&path) {
            Ok(target) => target,
            Err(err) => {
                warn!(path = %raw_path, error = %err, "write rejected");
                return ActionRecord::failed(ActionKind::Write, path, err.to_string());
            }
        };

        match self.workspace.write(&target, &path, content) {
            Ok(outcome) => {
                info!(
                    path = %outcome.path,
                    action = outcome.action.as_str(),
                    lines_added = outcome.lines_added,
                    lines_removed = outcome.lines_removed,
                    "file written"
                );
                state.record_write(&path);
                state.mark_progress();
                ActionRecord::ok(ActionKind::Write, path).with_detail(format!(
                    "{} +{}/-{}",
                    outcome.action.as_str(),
                    outcome.lines_added,
                    outcome.lines_removed
                ))
            }
            Err(err) => {
                warn!(path = %path, error = %err, "write failed");
                ActionRecord::failed(ActionKind::Write, path, err.to_string())
            }
        }
    }

    async fn run(&self, line: &str, state: &mut TaskState) -> ActionRecord {
        let tokens = match self.gate.check_command(line) {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(command = %line, error = %err, "command rejected");
                return ActionRecord::failed(ActionKind::Run, line, err.to_string());
            }
        };

        match self.runner.run(&tokens, self.gate.root()).await {
            Ok(output) => {
                let detail = format!("exit {}", output.exit_code);
                if output.success() {
                    info!(command = %line, duration_ms = output.duration_ms, "command succeeded");
                    state.record_command(&tokens);
                    state.mark_progress();
                    ActionRecord::ok(ActionKind::Run, line)
                        .with_detail(detail)
                        .with_output(output.stdout, output.stderr)
                } else {
                    warn!(command = %line, exit_code = output.exit_code, "command failed");
                    ActionRecord::failed(
                        ActionKind::Run,
                        line,
                        format!("exit status {}", output.exit_code),
                    )
                    .with_detail(detail)
                    .with_output(output.stdout, output.stderr)
                }
            }
            Err(err) => {
                warn!(command = %line, error = %err, "command errored");
                ActionRecord::failed(ActionKind::Run, line, err.to_string())
            }
        }
    }

    /// Commit the requested files that exist and pass the gate.
    ///
    /// With none left, an all-changes commit is made only once progress exists.
    async fn commit(&self, commit: &CommitRequest, state: &mut TaskState) -> ActionRecord {
        let mut files = Vec::new();
        for raw in &commit.files {
            let path = self.gate.normalize_path(raw);
            if files.contains(&path) {
                continue;
            }
            match self.gate.check_path(&path) {
                Ok(target) if target.exists() => files.push(path),
                Ok(_) => debug!(path = %path, "commit file does not exist; skipping"),
                Err(err) => warn!(path = %path, error = %err, "commit file rejected"),
            }
        }

        let result = if files.is_empty() {
            if !state.progress_made() {
                return ActionRecord::failed(ActionKind::Commit, &commit.message, NO_VALID_FILES);
            }
            self.vcs.commit_all(&commit.message).await
        } else {
            self.vcs.commit(&commit.message, &files).await
        };

        match result {
            Ok(outcome) => {
                state.mark_progress();
                ActionRecord::ok(ActionKind::Commit, &commit.message)
                    .with_detail(short_sha(&outcome.sha).to_string())
            }
            Err(err) => {
                warn!(error = %err, "commit failed");
                ActionRecord::failed(ActionKind::Commit, &commit.message, err.to_string())
            }
        }
    }

    async fn create_pr(
        &self,
        pr: &PrRequest,
        origin: DecisionOrigin,
        state: &mut TaskState,
    ) -> (ActionRecord, Option<String>) {
        if origin == DecisionOrigin::Inferred {
            warn!("refusing to open a pull request from an inferred decision");
            return (
                ActionRecord::failed(
                    ActionKind::Pr,
                    &pr.title,
                    "PR creation requires an explicit PR decision",
                ),
                None,
            );
        }

        match self.vcs.create_pr(&pr.title, &pr.body).await {
            Ok(outcome) => {
                state.mark_progress();
                let record = ActionRecord::ok(ActionKind::Pr, &pr.title)
                    .with_detail(format!("{} on {}", outcome.pr_url, outcome.branch));
                (record, Some(outcome.pr_url))
            }
            Err(err) => {
                warn!(error = %err, "pull request failed");
                (
                    ActionRecord::failed(ActionKind::Pr, &pr.title, format!("PR creation failed: {err}")),
                    None,
                )
            }
        }
    }
}

fn skipped(kind: DecisionKind, target: &str) -> ActionRecord {
    ActionRecord::failed(
        ActionKind::Skipped,
        target,
        format!("not dispatched for {}", kind.as_str()),
    )
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
