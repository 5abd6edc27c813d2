//! Control-protocol parser.
//!
//! Turns raw generator text into exactly one [`Decision`]. The parser never
//! fails: it walks an ordered ladder and the first rung that yields a decision
//! wins.
//!
//! 1. Transient upstream markers short-circuit to `RETRY`.
//! 2. Structured extraction tries each [`Strategy`] in order (fenced blocks,
//!    flat objects, brace-balanced objects). Within a strategy candidates are
//!    tried in textual order, and a candidate is accepted only when it parses
//!    as JSON and its `decision` is one of the nine recognized values.
//! 3. Accepted objects are completed with neutral defaults.
//! 4. With no valid object anywhere, the kind is inferred from keywords and
//!    the first meaningful lines become synthetic plan items.

use crate::types::{
    CommitRequest, Command, Decision, DecisionKind, DecisionOrigin, PrRequest,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Substrings that mark an overloaded or unavailable upstream provider.
pub const TRANSIENT_MARKERS: [&str; 4] = ["model is overloaded", "overloaded_error", " 503", "UNAVAILABLE"];

/// Reason attached to decisions produced by transient-error detection.
pub const TRANSIENT_REASON: &str = "Upstream 503/overloaded";

/// Maximum synthetic plan items taken from a prose response.
const MAX_INFERRED_PLAN_ITEMS: usize = 10;

/// Minimum length for a prose line to count as a plan item.
const MIN_PLAN_LINE_CHARS: usize = 10;

/// Maximum length of a synthetic plan item.
const MAX_PLAN_LINE_CHARS: usize = 100;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fenced block pattern")
});

static FLAT_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*"decision"[^{}]*\}"#).expect("flat object pattern")
});

/// Keyword patterns for natural-language inference, in priority order.
static ACTION_PATTERNS: LazyLock<Vec<(Regex, DecisionKind)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(?:plan|planning|analyze)\b", DecisionKind::Plan),
        (r"(?i)\b(?:edit|modify|change|update|write)\b", DecisionKind::Edit),
        (r"(?i)\b(?:run|execute|command)\b", DecisionKind::Execute),
        (r"(?i)\b(?:test|testing|check)\b", DecisionKind::Test),
        (r"(?i)\b(?:migrate|migration)\b", DecisionKind::Migrate),
        (r"(?i)\b(?:document|docs)\b", DecisionKind::Docs),
        (r"(?i)\b(?:pr|pull request|commit)\b", DecisionKind::Pr),
        (r"(?i)\b(?:done|complete|finish|stop)\b", DecisionKind::Stop),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("action pattern"), kind))
    .collect()
});

/// A structured-extraction strategy: pure text in, decision out.
pub type Strategy = fn(&str) -> Option<Decision>;

/// Structured-extraction strategies, most specific first.
pub const STRATEGIES: [(&str, Strategy); 3] = [
    ("fenced", from_fenced_blocks),
    ("flat", from_flat_objects),
    ("balanced", from_balanced_objects),
];

/// Parse raw generator output into a decision.
pub fn parse_decision(raw: &str) -> Decision {
    if let Some(decision) = detect_transient(raw) {
        return decision;
    }
    extract_structured(raw).unwrap_or_else(|| infer_from_prose(raw))
}

/// Return `RETRY` when the output carries an upstream-overload marker.
pub fn detect_transient(raw: &str) -> Option<Decision> {
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| raw.contains(marker))
        .then(|| Decision::retry(TRANSIENT_REASON, DecisionOrigin::Transient))
}

/// Run the structured strategies in order and return the first valid decision.
pub fn extract_structured(raw: &str) -> Option<Decision> {
    STRATEGIES.iter().find_map(|(_, strategy)| strategy(raw))
}

/// Candidates inside fenced code blocks.
///
/// A block whose whole body is not a valid object is searched for
/// brace-balanced objects, so prose inside the fence does not hide the JSON.
pub fn from_fenced_blocks(raw: &str) -> Option<Decision> {
    FENCED_BLOCK.captures_iter(raw).find_map(|caps| {
        let body = caps.get(1)?.as_str().trim();
        decode_candidate(body).or_else(|| balanced_objects(body).into_iter().find_map(decode_candidate))
    })
}

/// Brace-free objects mentioning `decision`, anywhere in the text.
pub fn from_flat_objects(raw: &str) -> Option<Decision> {
    FLAT_OBJECT
        .find_iter(raw)
        .find_map(|m| decode_candidate(m.as_str()))
}

/// Objects with arbitrarily nested braces and embedded newlines.
pub fn from_balanced_objects(raw: &str) -> Option<Decision> {
    balanced_objects(raw).into_iter().find_map(decode_candidate)
}

/// Every brace-balanced `{...}` span containing a `"decision"` key, ordered by start.
///
/// Braces inside JSON string literals are ignored.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();

    for (start, _) in bytes.iter().enumerate().filter(|(_, b)| **b == b'{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let span = &text[start..=start + offset];
                        if span.contains("\"decision\"") {
                            spans.push(span);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    spans
}

/// Parse one candidate substring, accepting it only with a recognized `decision`.
fn decode_candidate(candidate: &str) -> Option<Decision> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;
    let kind = DecisionKind::parse(object.get("decision")?.as_str()?)?;
    Some(decision_from_object(kind, object))
}

/// Build a decision from an accepted object, tolerating missing or mistyped fields.
fn decision_from_object(kind: DecisionKind, object: &Map<String, Value>) -> Decision {
    let mut decision = Decision::new(kind);
    decision.reason = string_field(object, "reason").unwrap_or_default();
    decision.plan = match object.get("plan") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(item)) => vec![item.clone()],
        _ => Vec::new(),
    };
    decision.commands = object
        .get("commands")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(command_from_value).collect())
        .unwrap_or_default();
    if let Some(commit) = object.get("commit").and_then(Value::as_object) {
        decision.commit = CommitRequest {
            message: string_field(commit, "message").unwrap_or_default(),
            files: commit
                .get("files")
                .and_then(Value::as_array)
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|f| f.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        };
    }
    if let Some(pr) = object.get("pr").and_then(Value::as_object) {
        decision.pr = PrRequest {
            title: string_field(pr, "title").unwrap_or_default(),
            body: string_field(pr, "body").unwrap_or_default(),
        };
    }
    decision.next_hint = string_field(object, "next_hint");
    decision.complete()
}

/// Decode one `commands` entry. Entries of any other shape are dropped.
fn command_from_value(value: &Value) -> Option<Command> {
    let object = value.as_object()?;
    if let Some(write) = object.get("write").and_then(Value::as_object) {
        let path = string_field(write, "path").filter(|p| !p.trim().is_empty())?;
        let content = string_field(write, "patch")
            .filter(|patch| !patch.is_empty())
            .or_else(|| string_field(write, "content"))
            .unwrap_or_default();
        return Some(Command::Write { path, content });
    }
    object
        .get("run")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(Command::run)
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Last-resort inference from unstructured prose.
///
/// The result never carries commands, commit or PR payloads.
pub fn infer_from_prose(raw: &str) -> Decision {
    let kind = ACTION_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(raw))
        .map_or(DecisionKind::Plan, |(_, kind)| *kind);

    let mut plan: Vec<String> = raw
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && line.chars().count() > MIN_PLAN_LINE_CHARS)
        .take(MAX_INFERRED_PLAN_ITEMS)
        .map(|line| line.chars().take(MAX_PLAN_LINE_CHARS).collect())
        .collect();
    if plan.is_empty() {
        plan = vec![
            "Continue with the requested task".to_string(),
            "Analyze current implementation".to_string(),
        ];
    }

    let mut decision = Decision::new(kind);
    decision.plan = plan;
    decision.reason = format!(
        "Parsed from natural language response ({} chars)",
        raw.chars().count()
    );
    decision.origin = DecisionOrigin::Inferred;
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_COMMIT_MESSAGE, DEFAULT_PR_TITLE};

    #[test]
    fn fenced_json_wins_regardless_of_prose() {
        let raw = r#"I'll help you fix the signup page. Let me start by planning.

```json
{
  "decision": "TEST",
  "commands": [{"run": "npm test"}]
}
```

Afterwards I will edit the component and open a pull request."#;
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Test);
        assert_eq!(decision.origin, DecisionOrigin::Structured);
        assert_eq!(decision.commands, vec![Command::run("npm test")]);
    }

    #[test]
    fn fence_without_language_tag_is_accepted() {
        let raw = "Here you go:\n```\n{\"decision\": \"STOP\", \"reason\": \"done\"}\n```";
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Stop);
        assert_eq!(decision.reason, "done");
    }

    #[test]
    fn fenced_block_with_prose_inside_still_parses() {
        let raw = "```\nResult:\n{\"decision\": \"DOCS\"}\n```";
        assert_eq!(parse_decision(raw).kind, DecisionKind::Docs);
    }

    #[test]
    fn nested_object_outside_fence_parses() {
        let raw = r#"Writing the file now.
{
  "decision": "EDIT",
  "commands": [
    {"write": {"path": "app/signup/page.tsx", "content": "export default function Page() {}\n"}}
  ],
  "commit": {"message": "feat: signup page", "files": ["app/signup/page.tsx"]}
}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Edit);
        assert_eq!(
            decision.commands,
            vec![Command::write(
                "app/signup/page.tsx",
                "export default function Page() {}\n"
            )]
        );
        assert_eq!(decision.commit.files, vec!["app/signup/page.tsx"]);
        assert!(!decision.commit.is_empty());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"{"decision": "EDIT", "commands": [{"write": {"path": "a.js", "content": "if (x) { y(); } }}"}}]}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Edit);
        assert_eq!(
            decision.commands,
            vec![Command::write("a.js", "if (x) { y(); } }}")]
        );
    }

    #[test]
    fn textually_earliest_valid_candidate_wins() {
        let raw = r#"First {"decision": "PLAN", "plan": ["a"]} then {"decision": "STOP"}"#;
        assert_eq!(parse_decision(raw).kind, DecisionKind::Plan);
    }

    #[test]
    fn unrecognized_decision_values_are_rejected() {
        let raw = r#"{"decision": "DEPLOY"} and later {"decision": "STOP"}"#;
        assert_eq!(parse_decision(raw).kind, DecisionKind::Stop);

        let raw = r#"{"decision": "deploy", "commands": [{"run": "npm i"}]}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.origin, DecisionOrigin::Inferred);
        assert!(decision.commands.is_empty());
    }

    #[test]
    fn malformed_json_falls_through_to_inference() {
        let raw = "```json\n{\"decision\": \"EDIT\", \"commands\": [\n```";
        let decision = parse_decision(raw);
        assert_eq!(decision.origin, DecisionOrigin::Inferred);
        assert_eq!(decision.kind, DecisionKind::Edit);
    }

    #[test]
    fn transient_markers_short_circuit_to_retry() {
        let raw = "API call failed: API returned 503: upstream busy\n{\"decision\": \"STOP\"}";
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Retry);
        assert_eq!(decision.reason, TRANSIENT_REASON);
        assert_eq!(decision.origin, DecisionOrigin::Transient);

        assert_eq!(
            parse_decision("Error: model is overloaded").kind,
            DecisionKind::Retry
        );
        assert_eq!(parse_decision("status UNAVAILABLE").kind, DecisionKind::Retry);
    }

    #[test]
    fn missing_optional_fields_are_completed() {
        let decision = parse_decision(r#"{"decision": "EXECUTE"}"#);
        assert!(decision.commands.is_empty());
        assert_eq!(decision.commit.message, DEFAULT_COMMIT_MESSAGE);
        assert!(decision.commit.files.is_empty());
        assert_eq!(decision.pr.title, DEFAULT_PR_TITLE);
        assert_eq!(decision.pr.body, "");
        assert_eq!(decision.clone().complete(), decision);
    }

    #[test]
    fn patch_wins_over_content() {
        let raw = r#"{"decision": "EDIT", "commands": [{"write": {"path": "a.md", "content": "old", "patch": "new"}}]}"#;
        assert_eq!(
            parse_decision(raw).commands,
            vec![Command::write("a.md", "new")]
        );
    }

    #[test]
    fn mistyped_fields_fall_back_to_defaults() {
        let raw = r#"{"decision": "EDIT", "commands": "oops", "commit": 5, "pr": [], "reason": 1, "plan": "one step"}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.kind, DecisionKind::Edit);
        assert!(decision.commands.is_empty());
        assert!(decision.commit.is_empty());
        assert_eq!(decision.reason, "");
        assert_eq!(decision.plan, vec!["one step"]);
    }

    #[test]
    fn command_entries_without_path_or_run_are_dropped() {
        let raw = r#"{"decision": "MIGRATE", "commands": [{"write": {"content": "x"}}, {"shell": "rm"}, {"run": "  "}, {"run": "supabase db push"}]}"#;
        assert_eq!(
            parse_decision(raw).commands,
            vec![Command::run("supabase db push")]
        );
    }

    #[test]
    fn prose_only_output_yields_a_recognized_kind() {
        let samples = [
            "",
            "   ",
            "Let me plan the UX improvements for the signup page.",
            "I will update the form component next.",
            "All finished here, nothing else to add.",
            "Opening a pull request shortly.",
            "zzz",
        ];
        for raw in samples {
            let decision = parse_decision(raw);
            assert!(DecisionKind::ALL.contains(&decision.kind), "{raw:?}");
        }
    }

    #[test]
    fn inference_follows_priority_order() {
        assert_eq!(
            infer_from_prose("I will write the file and then run the tests").kind,
            DecisionKind::Edit
        );
        assert_eq!(
            infer_from_prose("We should analyze and then edit").kind,
            DecisionKind::Plan
        );
        assert_eq!(infer_from_prose("I am done.").kind, DecisionKind::Stop);
        assert_eq!(infer_from_prose("no keywords here").kind, DecisionKind::Plan);
    }

    #[test]
    fn inference_builds_plan_from_leading_lines() {
        let raw = "# Heading\n\n1. Review current form structure\nshort\n2. Improve validation messages\n";
        let decision = infer_from_prose(raw);
        assert_eq!(
            decision.plan,
            vec![
                "1. Review current form structure",
                "2. Improve validation messages"
            ]
        );
        assert!(decision.commands.is_empty());
        assert!(decision.commit.is_empty());
        assert_eq!(decision.origin, DecisionOrigin::Inferred);
    }

    #[test]
    fn inference_caps_plan_items() {
        let raw = (0..20)
            .map(|i| format!("step number {i} with enough text {}", "x".repeat(200)))
            .collect::<Vec<_>>()
            .join("\n");
        let decision = infer_from_prose(&raw);
        assert_eq!(decision.plan.len(), MAX_INFERRED_PLAN_ITEMS);
        assert!(decision
            .plan
            .iter()
            .all(|item| item.chars().count() <= MAX_PLAN_LINE_CHARS));
    }

    #[test]
    fn short_and_heading_lines_do_not_use_plan_slots() {
        let raw = (1..=12)
            .map(|i| format!("# Step {i}\n\nwork item number {i} goes here"))
            .collect::<Vec<_>>()
            .join("\n");
        let decision = infer_from_prose(&raw);
        assert_eq!(decision.plan.len(), MAX_INFERRED_PLAN_ITEMS);
        assert_eq!(decision.plan[0], "work item number 1 goes here");
        assert_eq!(decision.plan[9], "work item number 10 goes here");
    }

    #[test]
    fn strategies_are_individually_usable() {
        let fenced = "```json\n{\"decision\": \"PR\"}\n```";
        assert!(from_fenced_blocks(fenced).is_some());
        assert!(from_fenced_blocks("{\"decision\": \"PR\"}").is_none());
        assert!(from_flat_objects("{\"decision\": \"PR\"}").is_some());
        assert!(from_flat_objects("{\"decision\": \"PR\", \"pr\": {\"title\": \"x\"}}").is_none());
        assert!(from_balanced_objects("{\"decision\": \"PR\", \"pr\": {\"title\": \"x\"}}").is_some());
    }
}
