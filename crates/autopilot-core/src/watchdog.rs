//! Stuck/loop detection.
//!
//! One detector compares each action's fingerprint with the previous one and
//! counts consecutive identical actions. Only dispatching turns are
//! observed; `PLAN` and `RETRY` never reach it.

use crate::types::{Command, Decision, DecisionKind};
use sha2::{Digest, Sha256};

/// Consecutive repeats (beyond the first occurrence) that abort the run.
pub const MAX_CONSECUTIVE_REPEATS: u32 = 2;

/// Outcome of observing one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    /// Differs from the previous action.
    Fresh,
    /// Same as the previous action, still below threshold.
    Repeated { count: u32 },
    /// Threshold reached; the run should abort.
    Stuck,
}

impl StuckVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Repeated { .. } => "repeated",
            Self::Stuck => "stuck",
        }
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self, Self::Stuck)
    }
}

/// Comparable digest of a turn's `(decision, commands)`.
pub fn fingerprint(kind: DecisionKind, commands: &[Command]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    // Command serialization cannot fail: it only holds strings.
    hasher.update(serde_json::to_vec(commands).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct StuckDetector {
    previous: Option<String>,
    consecutive: u32,
    threshold: u32,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(MAX_CONSECUTIVE_REPEATS)
    }
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            previous: None,
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record one action and report whether the run is stuck.
    ///
    /// `PLAN` and `RETRY` decisions are ignored and always yield `Fresh`.
    pub fn observe(&mut self, decision: &Decision) -> StuckVerdict {
        if matches!(decision.kind, DecisionKind::Plan | DecisionKind::Retry) {
            return StuckVerdict::Fresh;
        }

        let print = fingerprint(decision.kind, &decision.commands);
        let repeated = self.previous.as_ref() == Some(&print);
        self.previous = Some(print);

        if !repeated {
            self.consecutive = 0;
            return StuckVerdict::Fresh;
        }

        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            StuckVerdict::Stuck
        } else {
            StuckVerdict::Repeated {
                count: self.consecutive,
            }
        }
    }

    pub fn consecutive_repeats(&self) -> u32 {
        self.consecutive
    }
}
