//! Prompt text and context block formatting.

use crate::turn::TurnReport;

/// Control-protocol preamble placed at the head of every context.
pub const PROTOCOL_PREAMBLE: &str = r#"You are an autonomous coding agent. Use this control protocol and reply with a single JSON object:

{
  "decision": "PLAN | EDIT | EXECUTE | TEST | MIGRATE | DOCS | PR | STOP | RETRY",
  "reason": "short rationale",
  "plan": ["short step bullets, PLAN only"],
  "commands": [
    { "write": { "path": "<repo-relative path>", "content": "<full file text>", "patch": "<optional, replaces content>" } },
    { "run": "<npm|yarn|pnpm|supabase|eslint|tsc|pytest|vitest|jest|ls|cat|head|find|pwd|tree|wc|grep command>" }
  ],
  "commit": { "message": "<concise>", "files": ["<paths you modified>"] },
  "pr": { "title": "<title>", "body": "<markdown body>" },
  "next_hint": "optional note for the next turn"
}

Rules:
1) Start with "decision":"PLAN" when the task is abstract. Keep the plan to 1-5 bullets.
2) Then emit EDIT/EXECUTE/TEST decisions, and finally PR or STOP.
3) Fill commit.files with exact repo-relative paths (no leading './' or repository name).
4) If the upstream service is overloaded, reply {"decision":"RETRY"}.
5) Keep JSON minimal; never put logs or command output inside it.
"#;

/// System prompt sent with every generation request.
pub const SYSTEM_PROMPT: &str = r#"You are a senior full-stack engineer working inside a checked-out repository. You act autonomously:

1. Propose a short plan for the task.
2. Make small, reviewable changes.
3. Prefer SQL-first schema changes under supabase/migrations/ with idempotent SQL.
4. Run lint, typecheck and tests after edits.
5. Update documentation when an API or schema changes.
6. Stop when the pull request is ready or when blocked.

Never edit .env files, .git/, .github/workflows/ or container build files.

You MUST end every response with a valid Control Protocol JSON object."#;

/// Steering hint appended after every PLAN block.
pub const PLAN_HINT: &str =
    "## System Hint\nProceed to EDIT/EXECUTE/TEST decisions with concrete file paths and commands.";

/// Maximum characters of stdout/stderr folded into context per action.
pub const MAX_OUTPUT_CHARS: usize = 500;

/// Head block of a run: protocol preamble, task, and repository digest.
pub fn initial_context(task: &str, repo_digest: &str) -> String {
    let mut block = format!("# Control Protocol\n{PROTOCOL_PREAMBLE}\n# Task\n{task}");
    if !repo_digest.trim().is_empty() {
        block.push_str("\n\n");
        block.push_str(repo_digest.trim_end());
    }
    block
}

/// Per-turn user prompt wrapping the rendered context.
pub fn turn_prompt(context: &str, turn: u32) -> String {
    format!(
        "# Turn {turn}\n\n## Current Context\n{context}\n\n## Instructions\n\
         Based on the context above, decide your next action and explain it briefly, \
         then end with the required Control Protocol JSON.\n\n\
         Remember:\n\
         - Make one focused change per turn\n\
         - Run tests after code changes\n\
         - Create migrations for schema changes\n\
         - Keep commits small and atomic\n\
         - End with valid Control Protocol JSON"
    )
}

pub fn plan_block(turn: u32, plan: &[String]) -> String {
    let items: Vec<String> = plan.iter().map(|item| format!("- {item}")).collect();
    format!("## Agent PLAN (turn {turn})\n{}", items.join("\n"))
}

/// Render a dispatch result for the next turn's context.
pub fn result_block(turn: u32, report: &TurnReport) -> String {
    let mut lines = vec![
        format!("## Execution Result - Turn {turn}"),
        if report.success() { "Status: success" } else { "Status: failed" }.to_string(),
    ];
    if let Some(error) = &report.error {
        lines.push(format!("Error: {error}"));
    }
    for action in &report.actions {
        let status = if action.success { "ok" } else { "failed" };
        let mut line = format!("- {} {}: {status}", action.kind.as_str(), action.target);
        if !action.detail.is_empty() {
            line.push_str(&format!(" ({})", action.detail));
        }
        if let Some(error) = &action.error {
            line.push_str(&format!(" - {error}"));
        }
        lines.push(line);
        if !action.stdout.trim().is_empty() {
            lines.push(format!("  STDOUT: {}", truncate_chars(action.stdout.trim(), MAX_OUTPUT_CHARS)));
        }
        if !action.stderr.trim().is_empty() {
            lines.push(format!("  STDERR: {}", truncate_chars(action.stderr.trim(), MAX_OUTPUT_CHARS)));
        }
    }
    if let Some(url) = &report.pr_url {
        lines.push(format!("PR: {url}"));
    }
    lines.join("\n")
}

/// Longest prefix of `text` holding at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
