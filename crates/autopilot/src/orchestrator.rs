//! Turn loop.
//!
//! Drives generate, parse, dispatch, then fold the result into context until a
//! terminal condition is reached. Termination is checked in a fixed order:
//! wall-clock budget (and cancellation), `STOP`, pull request success, stuck
//! detection, and finally the turn ceiling.

use crate::executor::Executor;
use crate::generator::Generator;
use autopilot_core::audit::AuditError;
use autopilot_core::prompt::{initial_context, plan_block, result_block, PLAN_HINT};
use autopilot_core::synthesis::synthesize_simple_create;
use autopilot_core::{
    parse_decision, AuditEvent, AuditLog, BudgetExceeded, BudgetGuard, Config, Decision,
    DecisionKind, DecisionOrigin, Id, RunOutcome, TaskState, TurnContext, TurnReport,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_NO_PROGRESS: &str = "no progress";
pub const REASON_PR_CREATED: &str = "PR created";
pub const REASON_STOPPED: &str = "Stopped";
pub const REASON_SYNTHESIZED: &str = "task completed via synthesized create";
pub const REASON_FINAL_SYNTHESIZED: &str = "task completed via final synthesized create";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// One autopilot run over one workspace.
pub struct Orchestrator {
    config: Config,
    generator: Arc<dyn Generator>,
    executor: Executor,
    audit: AuditLog,
    cancel: CancellationToken,
    run_id: Id,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.run_id)
            .field("model", &self.generator.model_name())
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

/// Mutable per-run state owned by the loop.
struct RunState<'a> {
    task: &'a str,
    context: TurnContext,
    state: TaskState,
    turns: u32,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        generator: Arc<dyn Generator>,
        executor: Executor,
        audit: AuditLog,
        run_id: Id,
    ) -> Self {
        Self {
            config,
            generator,
            executor,
            audit,
            cancel: CancellationToken::new(),
            run_id,
        }
    }

    /// Use an externally owned token; the loop checks it at each turn boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> &Id {
        &self.run_id
    }

    pub fn audit_path(&self) -> &std::path::Path {
        self.audit.path()
    }

    /// Run `task` to completion. Never fails: internal errors become an
    /// `exception: ...` outcome. A `finish` record is always attempted.
    pub async fn execute_task(&mut self, task: &str) -> RunOutcome {
        info!(
            run_id = %self.run_id,
            provider = self.config.provider.as_str(),
            model = %self.generator.model_name(),
            max_turns = self.config.max_turns,
            max_minutes = self.config.max_minutes,
            "starting run"
        );

        let mut run = RunState {
            task,
            context: TurnContext::new(String::new()),
            state: TaskState::new(),
            turns: 0,
        };

        let outcome = match self.run_turns(&mut run).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "run aborted");
                let turn = (run.turns > 0).then_some(run.turns);
                if let Err(log_err) = self.audit.record(&AuditEvent::Error {
                    turn,
                    error: err.to_string(),
                }) {
                    warn!(error = %log_err, "failed to record error event");
                }
                RunOutcome::failure(format!("exception: {err}"), run.turns)
            }
        };

        if let Err(err) = self.audit.record(&AuditEvent::Finish {
            success: outcome.success,
            reason: outcome.reason.clone(),
            turns: outcome.turns,
            pr_url: outcome.pr_url.clone(),
        }) {
            warn!(error = %err, "failed to record finish event");
        }

        info!(
            run_id = %self.run_id,
            success = outcome.success,
            reason = %outcome.reason,
            turns = outcome.turns,
            "run finished"
        );
        outcome
    }

    async fn run_turns(&mut self, run: &mut RunState<'_>) -> Result<RunOutcome> {
        self.audit.record(&AuditEvent::Start {
            run_id: self.run_id.clone(),
            task: run.task.to_string(),
            provider: self.config.provider.as_str().to_string(),
            model: self.generator.model_name().to_string(),
            max_turns: self.config.max_turns,
            max_minutes: self.config.max_minutes,
        })?;

        let digest = self.executor.workspace().digest(&self.config);
        run.context = TurnContext::new(initial_context(run.task, &digest));

        let budget = BudgetGuard::from_minutes(self.config.max_minutes, self.config.max_turns);

        let mut turn = 0;
        loop {
            turn += 1;
            match budget.check(turn) {
                Some(BudgetExceeded::Time) => {
                    info!(turn, elapsed_sec = budget.elapsed().as_secs(), "time budget exhausted");
                    return Ok(RunOutcome::failure(BudgetExceeded::Time.reason(), run.turns));
                }
                Some(BudgetExceeded::Turns) => break,
                None => {}
            }
            if self.cancel.is_cancelled() {
                info!(turn, "run cancelled");
                return Ok(RunOutcome::failure(REASON_CANCELLED, run.turns));
            }

            run.turns = turn;
            self.audit.record(&AuditEvent::TurnStart { turn })?;
            info!(turn, max_turns = budget.max_turns(), "turn started");

            let (output, decision) = self.generate(turn, &run.context).await;
            self.audit.record(&AuditEvent::WorkerOutput {
                turn,
                output: output.clone(),
            })?;
            self.audit.record(&AuditEvent::ControlDecision {
                turn,
                control: decision.clone(),
            })?;
            info!(
                turn,
                decision = decision.kind.as_str(),
                origin = decision.origin.as_str(),
                commands = decision.commands.len(),
                "decision parsed"
            );

            match decision.kind {
                DecisionKind::Retry => {
                    debug!(turn, reason = %decision.reason, "retrying turn");
                    continue;
                }
                DecisionKind::Plan => {
                    run.context.push(plan_block(turn, &decision.plan));
                    run.context.push(PLAN_HINT);
                    continue;
                }
                _ => {}
            }

            let report = self.executor.dispatch(&decision, &mut run.state).await;
            self.audit.record(&AuditEvent::TurnResult {
                turn,
                result: report.clone(),
            })?;
            let verdict = run.state.observe(&decision);

            if !run.state.progress_made() {
                if let Some(outcome) = self.try_synthesis(run, turn, &output).await? {
                    return Ok(outcome);
                }
            }

            if decision.kind == DecisionKind::Stop {
                let reason = if decision.reason.trim().is_empty() {
                    REASON_STOPPED.to_string()
                } else {
                    decision.reason.clone()
                };
                let outcome = if run.state.progress_made() {
                    RunOutcome::success(reason, turn)
                } else {
                    RunOutcome::failure(reason, turn)
                };
                return Ok(outcome);
            }

            if decision.kind == DecisionKind::Pr && report.pr_created() {
                return Ok(RunOutcome::success(REASON_PR_CREATED, turn).with_pr_url(report.pr_url));
            }

            run.context.push(result_block(turn, &report));

            if verdict.is_stuck() {
                warn!(
                    turn,
                    decision = decision.kind.as_str(),
                    repeats = run.state.consecutive_repeats(),
                    "identical actions repeated; aborting"
                );
                return Ok(RunOutcome::failure(REASON_NO_PROGRESS, turn));
            }
            debug!(turn, verdict = verdict.as_str(), "turn complete");
        }

        if !run.state.progress_made() {
            let head = run.context.head().to_string();
            let recent = run.context.recent(2).join("\n");
            let gate = self.executor.gate();
            let decision =
                synthesize_simple_create(&head, &recent, false, |path| gate.normalize_path(path));
            if let Some(decision) = decision {
                let turn = run.turns;
                info!(turn, "final synthesis attempt");
                self.dispatch_synthesized(run, turn, &decision).await?;
                if run.state.progress_made() {
                    return Ok(RunOutcome::success(REASON_FINAL_SYNTHESIZED, run.turns));
                }
            }
        }

        Ok(RunOutcome::failure(BudgetExceeded::Turns.reason(), run.turns))
    }

    /// Request and parse one generation, bounded by the generation timeout
    /// (zero disables it).
    async fn generate(&self, turn: u32, context: &TurnContext) -> (String, Decision) {
        let timeout = self.config.generation_timeout();
        let rendered = context.render();
        let generation = self.generator.generate(&rendered, turn);
        let result = if timeout.is_zero() {
            Ok(generation.await)
        } else {
            tokio::time::timeout(timeout, generation).await
        };
        match result {
            Ok(output) => {
                debug!(turn, output_chars = output.len(), "generator output received");
                let decision = parse_decision(&output);
                (output, decision)
            }
            Err(_) => {
                warn!(turn, timeout_sec = timeout.as_secs(), "generation timed out");
                let reason = format!("generation timed out after {}s", timeout.as_secs());
                (String::new(), Decision::retry(reason, DecisionOrigin::Timeout))
            }
        }
    }

    /// Action a simple create task directly when the turn made no progress.
    async fn try_synthesis(
        &mut self,
        run: &mut RunState<'_>,
        turn: u32,
        latest_output: &str,
    ) -> Result<Option<RunOutcome>> {
        let gate = self.executor.gate();
        let decision = synthesize_simple_create(
            run.task,
            latest_output,
            run.state.progress_made(),
            |path| gate.normalize_path(path),
        );
        let Some(decision) = decision else {
            return Ok(None);
        };

        info!(turn, path = ?decision.write_paths().collect::<Vec<_>>(), "synthesizing simple create");
        let report = self.dispatch_synthesized(run, turn, &decision).await?;

        if run.state.progress_made() {
            return Ok(Some(RunOutcome::success(REASON_SYNTHESIZED, turn)));
        }
        run.context.push(result_block(turn, &report));
        Ok(None)
    }

    /// Dispatch a synthesized decision with the same audit trail as a generated one.
    async fn dispatch_synthesized(
        &mut self,
        run: &mut RunState<'_>,
        turn: u32,
        decision: &Decision,
    ) -> Result<TurnReport> {
        self.audit.record(&AuditEvent::ControlDecision {
            turn,
            control: decision.clone(),
        })?;
        let report = self.executor.dispatch(decision, &mut run.state).await;
        self.audit.record(&AuditEvent::TurnResult {
            turn,
            result: report.clone(),
        })?;
        Ok(report)
    }
}
