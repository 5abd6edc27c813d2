//! Audit event types.
//!
//! Each event becomes one JSON line tagged with `type` and stamped with the
//! time it was recorded.

use crate::turn::TurnReport;
use crate::types::{Decision, Id};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Start {
        run_id: Id,
        task: String,
        provider: String,
        model: String,
        max_turns: u32,
        max_minutes: u64,
    },
    TurnStart {
        turn: u32,
    },
    WorkerOutput {
        turn: u32,
        output: String,
    },
    ControlDecision {
        turn: u32,
        control: Decision,
    },
    TurnResult {
        turn: u32,
        result: TurnReport,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        turn: Option<u32>,
        error: String,
    },
    Finish {
        success: bool,
        reason: String,
        turns: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pr_url: Option<String>,
    },
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TurnStart { .. } => "turn_start",
            Self::WorkerOutput { .. } => "worker_output",
            Self::ControlDecision { .. } => "control_decision",
            Self::TurnResult { .. } => "turn_result",
            Self::Error { .. } => "error",
            Self::Finish { .. } => "finish",
        }
    }
}

/// A timestamped event as written to the log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord<'a> {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl<'a> AuditRecord<'a> {
    pub fn now(event: &'a AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
