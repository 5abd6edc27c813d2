//! Workspace file collaborator and repository digest.

use autopilot_core::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Directories never shown in the repository digest.
const SKIPPED_DIRS: [&str; 7] = [
    "node_modules",
    "__pycache__",
    ".git",
    "dist",
    "build",
    ".next",
    "target",
];

/// Hidden entries that are still shown in the digest.
const VISIBLE_DOTFILES: [&str; 2] = [".gitignore", ".env.example"];

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    Created,
    Updated,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// What a full-file write changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub action: WriteAction,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub path: String,
}

/// File access rooted at the repository checkout.
///
/// Paths handed to [`Workspace::write`] must already have passed the safety
/// gate; this type performs no policy checks of its own.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    hidden: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hidden: Vec::new(),
        }
    }

    /// Leave these absolute paths out of the repository structure.
    pub fn with_hidden(mut self, hidden: Vec<PathBuf>) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the file at `target` with `content`, creating parents as needed.
    ///
    /// `display_path` is the root-relative path echoed in the outcome.
    pub fn write(&self, target: &Path, display_path: &str, content: &str) -> Result<WriteOutcome> {
        let io_err = |source| WorkspaceError::Io {
            path: target.to_path_buf(),
            source,
        };

        let previous = match std::fs::read(target) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(io_err(err)),
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(target, content).map_err(io_err)?;

        let (lines_added, lines_removed) = line_delta(previous.as_deref().unwrap_or(""), content);
        Ok(WriteOutcome {
            action: if previous.is_some() {
                WriteAction::Updated
            } else {
                WriteAction::Created
            },
            lines_added,
            lines_removed,
            path: display_path.to_string(),
        })
    }

    /// Read a root-relative file, `None` when it does not exist.
    pub fn read_file(&self, relative: &str) -> Result<Option<String>> {
        let path = self.root.join(relative);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WorkspaceError::Io { path, source }),
        }
    }

    /// Indented directory tree, directories first, limited in depth and lines.
    pub fn structure(&self, max_depth: usize, max_lines: usize) -> Result<String> {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by(|a, b| {
                b.file_type()
                    .is_dir()
                    .cmp(&a.file_type().is_dir())
                    .then_with(|| {
                        a.file_name()
                            .to_string_lossy()
                            .to_lowercase()
                            .cmp(&b.file_name().to_string_lossy().to_lowercase())
                    })
            })
            .into_iter()
            .filter_entry(|entry| {
                !is_hidden_from_digest(entry) && !self.hidden.iter().any(|path| entry.path() == path)
            });

        let mut lines = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().map_or_else(|| self.root.clone(), Path::to_path_buf);
                WorkspaceError::Io {
                    path,
                    source: err.into(),
                }
            })?;
            if lines.len() == max_lines {
                lines.push("...".to_string());
                break;
            }
            let indent = "  ".repeat(entry.depth() - 1);
            let name = entry.file_name().to_string_lossy();
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!("{indent}{name}{suffix}"));
        }
        Ok(lines.join("\n"))
    }

    /// Repository digest for the head of the turn context.
    ///
    /// Failures are embedded as text rather than returned.
    pub fn digest(&self, config: &Config) -> String {
        let mut parts = vec!["## Repository Structure".to_string()];
        match self.structure(config.digest_max_depth, config.digest_max_lines) {
            Ok(tree) => parts.push(tree),
            Err(err) => parts.push(format!("Error reading repo structure: {err}")),
        }

        for relative in &config.key_files {
            let Ok(Some(content)) = self.read_file(relative) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            let truncated = autopilot_core::prompt::truncate_chars(&content, config.key_file_max_chars);
            let ellipsis = if truncated.len() < content.len() { "..." } else { "" };
            parts.push(format!("## {relative}\n```\n{truncated}{ellipsis}\n```"));
        }

        parts.join("\n")
    }
}

fn is_hidden_from_digest(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()) {
        return true;
    }
    name.starts_with('.') && !VISIBLE_DOTFILES.contains(&name.as_ref())
}

/// Count lines only in `new` and lines only in `old`, as multisets.
fn line_delta(old: &str, new: &str) -> (usize, usize) {
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for line in old.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    for line in new.lines() {
        *counts.entry(line).or_default() += 1;
    }
    counts.values().fold((0, 0), |(added, removed), &delta| {
        if delta > 0 {
            (added + delta.unsigned_abs(), removed)
        } else {
            (added, removed + delta.unsigned_abs())
        }
    })
}
