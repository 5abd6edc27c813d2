//! Per-turn execution results.
//!
//! The executor records one [`ActionRecord`] per side effect it attempts.
//! The resulting [`TurnReport`] is folded into the next turn's context.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Write,
    Run,
    Commit,
    Pr,
    /// A command the decision kind does not dispatch.
    Skipped,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Run => "run",
            Self::Commit => "commit",
            Self::Pr => "pr",
            Self::Skipped => "skipped",
        }
    }
}

/// One attempted side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    /// Path, command line, commit message or PR title.
    pub target: String,
    pub success: bool,
    /// Short human-readable summary, e.g. `created (+3/-0)` or `exit 0`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn ok(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            success: true,
            detail: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    pub fn failed(kind: ActionKind, target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok(kind, target)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }
}

/// Everything one dispatch produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub actions: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    /// Turn-level failure not tied to a single action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnReport {
    pub fn push(&mut self, record: ActionRecord) {
        self.actions.push(record);
    }

    /// No action failed and no turn-level error was recorded.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.actions.iter().all(|a| a.success)
    }

    /// Whether the PR collaborator reported success this turn.
    pub fn pr_created(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.kind == ActionKind::Pr && a.success)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.error.is_none()
    }
}
