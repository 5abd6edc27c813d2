//! Process-lifetime task state.

use crate::types::Decision;
use crate::watchdog::{StuckDetector, StuckVerdict};
use std::collections::BTreeSet;

/// Programs whose arguments are recorded as files read.
pub const READ_VERBS: [&str; 6] = ["cat", "head", "tail", "less", "more", "wc"];

/// State owned by the turn loop for the whole run.
///
/// Constructed once at run start. `progress_made` only ever moves from
/// `false` to `true`.
#[derive(Debug, Default)]
pub struct TaskState {
    pub files_written: BTreeSet<String>,
    pub files_read: BTreeSet<String>,
    detector: StuckDetector,
    progress_made: bool,
}

impl TaskState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_made(&self) -> bool {
        self.progress_made
    }

    pub fn mark_progress(&mut self) {
        self.progress_made = true;
    }

    pub fn record_write(&mut self, path: impl Into<String>) {
        self.files_written.insert(path.into());
    }

    /// Record the non-flag arguments of a read-like command.
    pub fn record_command(&mut self, tokens: &[String]) {
        let Some((program, args)) = tokens.split_first() else {
            return;
        };
        if !READ_VERBS.contains(&program.as_str()) {
            return;
        }
        self.files_read.extend(
            args.iter()
                .filter(|arg| !arg.starts_with('-'))
                .cloned(),
        );
    }

    /// Feed a dispatched decision to the stuck detector.
    pub fn observe(&mut self, decision: &Decision) -> StuckVerdict {
        self.detector.observe(decision)
    }

    pub fn consecutive_repeats(&self) -> u32 {
        self.detector.consecutive_repeats()
    }
}
