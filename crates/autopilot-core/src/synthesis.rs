//! Synthesis fallback for trivially specified tasks.
//!
//! A task of the form `create <path> with content '<text>'` is actioned
//! directly: one `write` plus a matching commit, without the generator.

use crate::types::{Command, CommitRequest, Decision, DecisionKind, DecisionOrigin};
use regex::Regex;
use std::sync::LazyLock;

static SIMPLE_CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bcreate\s+(\S+)\s+with\s+content\s+['"](.+?)['"]"#)
        .expect("simple create pattern")
});

/// Build an `EDIT` decision for a simple create task.
///
/// Searches the task first, then the latest generator output. Returns `None`
/// once progress has been made or when neither text matches exactly.
/// `normalize` maps the captured path to a root-relative one.
pub fn synthesize_simple_create(
    task: &str,
    latest_output: &str,
    progress_made: bool,
    normalize: impl Fn(&str) -> String,
) -> Option<Decision> {
    if progress_made {
        return None;
    }

    let text = format!("{task}\n\n{latest_output}");
    let caps = SIMPLE_CREATE.captures(&text)?;
    let raw_path = caps
        .get(1)?
        .as_str()
        .trim_matches(|c| matches!(c, '`' | '"' | '\''));
    let path = normalize(raw_path);
    if path.is_empty() {
        return None;
    }
    let content = caps.get(2)?.as_str();

    let mut decision = Decision::new(DecisionKind::Edit);
    decision.reason = format!("Synthesized create of {path}");
    decision.commit = CommitRequest {
        message: format!("Add {path} via synthesized create"),
        files: vec![path.clone()],
    };
    decision.commands = vec![Command::write(path, content)];
    decision.origin = DecisionOrigin::Synthesized;
    Some(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(path: &str) -> String {
        path.to_string()
    }

    #[test]
    fn matches_simple_create_task() {
        let decision = synthesize_simple_create(
            "create notes.txt with content 'hello'",
            "",
            false,
            identity,
        )
        .unwrap();
        assert_eq!(decision.kind, DecisionKind::Edit);
        assert_eq!(decision.origin, DecisionOrigin::Synthesized);
        assert_eq!(decision.commands, vec![Command::write("notes.txt", "hello")]);
        assert_eq!(decision.commit.files, vec!["notes.txt"]);
        assert_eq!(
            decision.commit.message,
            "Add notes.txt via synthesized create"
        );
    }

    #[test]
    fn is_case_insensitive_and_accepts_double_quotes() {
        let decision = synthesize_simple_create(
            "Please Create docs/CHANGELOG.md With Content \"line one\nline two\"",
            "",
            false,
            identity,
        )
        .unwrap();
        assert_eq!(
            decision.commands,
            vec![Command::write("docs/CHANGELOG.md", "line one\nline two")]
        );
    }

    #[test]
    fn falls_back_to_latest_output() {
        let decision = synthesize_simple_create(
            "set up the project",
            "I will create `hello.md` with content 'hi there'",
            false,
            identity,
        )
        .unwrap();
        assert_eq!(decision.commands, vec![Command::write("hello.md", "hi there")]);
    }

    #[test]
    fn never_fires_after_progress() {
        assert!(synthesize_simple_create(
            "create notes.txt with content 'hello'",
            "",
            true,
            identity
        )
        .is_none());
    }

    #[test]
    fn requires_the_exact_pattern() {
        for task in [
            "create notes.txt containing hello",
            "create notes.txt with content hello",
            "make notes.txt with content 'hello'",
            "recreate notes.txt with content 'hello'",
            "Improve the signup page UX",
        ] {
            assert!(
                synthesize_simple_create(task, "", false, identity).is_none(),
                "{task}"
            );
        }
    }

    #[test]
    fn applies_normalization() {
        let decision = synthesize_simple_create(
            "create ./repo/notes.txt with content 'x'",
            "",
            false,
            |p| p.trim_start_matches("./repo/").to_string(),
        )
        .unwrap();
        assert_eq!(decision.commit.files, vec!["notes.txt"]);
    }
}
