//! Core types for the autopilot turn loop.
//!
//! A `Decision` is the unit the loop acts on. It is always built through the
//! protocol parser or the synthesis fallback, so its `kind` is one of the nine
//! recognized values and every optional field carries a neutral default.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default commit message used when the generator omits one.
pub const DEFAULT_COMMIT_MESSAGE: &str = "Auto-generated";

/// Default PR title used when the generator omits one.
pub const DEFAULT_PR_TITLE: &str = "Auto-generated";

/// Unique identifier for runs.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Enumerations ---

/// The closed set of decisions the generator may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Plan,
    Edit,
    Execute,
    Test,
    Migrate,
    Docs,
    Pr,
    Stop,
    Retry,
}

impl DecisionKind {
    pub const ALL: [Self; 9] = [
        Self::Plan,
        Self::Edit,
        Self::Execute,
        Self::Test,
        Self::Migrate,
        Self::Docs,
        Self::Pr,
        Self::Stop,
        Self::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "PLAN",
            Self::Edit => "EDIT",
            Self::Execute => "EXECUTE",
            Self::Test => "TEST",
            Self::Migrate => "MIGRATE",
            Self::Docs => "DOCS",
            Self::Pr => "PR",
            Self::Stop => "STOP",
            Self::Retry => "RETRY",
        }
    }

    /// Parse an exact protocol value. Anything else is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Whether this decision dispatches `write` commands.
    pub fn writes_files(&self) -> bool {
        matches!(self, Self::Edit | Self::Migrate | Self::Docs)
    }

    /// Whether this decision dispatches `run` commands.
    pub fn runs_commands(&self) -> bool {
        matches!(self, Self::Execute | Self::Test | Self::Migrate)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// A valid JSON object was found in the generator output.
    #[default]
    Structured,
    /// No JSON was found; the kind was inferred from keywords.
    Inferred,
    /// The output carried an upstream-overload marker.
    Transient,
    /// Built by the synthesis fallback without consulting the generator.
    Synthesized,
    /// The generation call exceeded its timeout.
    Timeout,
}

impl DecisionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Inferred => "inferred",
            Self::Transient => "transient",
            Self::Synthesized => "synthesized",
            Self::Timeout => "timeout",
        }
    }
}

/// Supported generation service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorProvider {
    #[default]
    Anthropic,
    Gemini,
}

impl GeneratorProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Environment variable holding the API key for this provider.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GOOGLE_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

// --- Decision record ---

/// A single side-effecting instruction inside a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Full-file replacement. `content` already reflects `patch` when one was given.
    Write { path: String, content: String },
    /// A single command line.
    Run(String),
}

impl Command {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn run(command_line: impl Into<String>) -> Self {
        Self::Run(command_line.into())
    }
}

/// Commit request attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    pub files: Vec<String>,
}

impl Default for CommitRequest {
    fn default() -> Self {
        Self {
            message: DEFAULT_COMMIT_MESSAGE.to_string(),
            files: Vec::new(),
        }
    }
}

impl CommitRequest {
    /// A commit is requested only when it names files or carries a real message.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.message == DEFAULT_COMMIT_MESSAGE
    }
}

/// Pull request attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
}

impl Default for PrRequest {
    fn default() -> Self {
        Self {
            title: DEFAULT_PR_TITLE.to_string(),
            body: String::new(),
        }
    }
}

/// A validated control decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub kind: DecisionKind,
    pub reason: String,
    pub plan: Vec<String>,
    pub commands: Vec<Command>,
    pub commit: CommitRequest,
    pub pr: PrRequest,
    pub next_hint: Option<String>,
    pub origin: DecisionOrigin,
}

impl Decision {
    /// A decision of the given kind with every optional field at its default.
    pub fn new(kind: DecisionKind) -> Self {
        Self {
            kind,
            reason: String::new(),
            plan: Vec::new(),
            commands: Vec::new(),
            commit: CommitRequest::default(),
            pr: PrRequest::default(),
            next_hint: None,
            origin: DecisionOrigin::Structured,
        }
    }

    pub fn retry(reason: impl Into<String>, origin: DecisionOrigin) -> Self {
        Self {
            reason: reason.into(),
            origin,
            ..Self::new(DecisionKind::Retry)
        }
    }

    /// Fill neutral defaults for empty optional fields.
    ///
    /// Completion is idempotent: completing an already-completed decision
    /// returns an equal value.
    pub fn complete(mut self) -> Self {
        if self.commit.message.trim().is_empty() {
            self.commit.message = DEFAULT_COMMIT_MESSAGE.to_string();
        }
        self.commit.files.retain(|f| !f.trim().is_empty());
        if self.pr.title.trim().is_empty() {
            self.pr.title = DEFAULT_PR_TITLE.to_string();
        }
        self.plan.retain(|item| !item.trim().is_empty());
        if self.next_hint.as_deref().is_some_and(|h| h.trim().is_empty()) {
            self.next_hint = None;
        }
        self
    }

    /// Paths targeted by `write` commands, in order.
    pub fn write_paths(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            Command::Write { path, .. } => Some(path.as_str()),
            Command::Run(_) => None,
        })
    }
}

/// Final, user-visible outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    pub turns: u32,
}

impl RunOutcome {
    pub fn success(reason: impl Into<String>, turns: u32) -> Self {
        Self {
            success: true,
            reason: reason.into(),
            pr_url: None,
            turns,
        }
    }

    pub fn failure(reason: impl Into<String>, turns: u32) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            pr_url: None,
            turns,
        }
    }

    pub fn with_pr_url(mut self, pr_url: Option<String>) -> Self {
        self.pr_url = pr_url;
        self
    }
}
