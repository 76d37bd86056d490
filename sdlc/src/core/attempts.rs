//! Attempt history bookkeeping for the implementation retry loop.

use crate::core::failure::{count_build_errors, count_test_failures};
use crate::core::sanitize::first_error_snippet;
use crate::core::types::{AttemptHistoryEntry, AttemptOutcome};

/// Attempts surfaced in a retry prompt.
pub const PROMPT_HISTORY_LEN: usize = 3;
const SNIPPET_CHARS: usize = 120;

/// Build the history entry for a failed attempt from sanitized outputs.
pub fn record_attempt(
    attempt: u32,
    outcome: AttemptOutcome,
    build_output: &str,
    test_output: &str,
    changes_summary: impl Into<String>,
) -> AttemptHistoryEntry {
    let build_failures = if outcome == AttemptOutcome::FailedBuild {
        count_build_errors(build_output).max(1)
    } else {
        0
    };
    let test_failures = if outcome == AttemptOutcome::FailedTests {
        count_test_failures(test_output).max(1)
    } else {
        0
    };
    AttemptHistoryEntry {
        attempt,
        test_failures,
        build_failures,
        test_snippet: if test_failures > 0 {
            first_error_snippet(test_output, SNIPPET_CHARS)
        } else {
            String::new()
        },
        build_snippet: if build_failures > 0 {
            first_error_snippet(build_output, SNIPPET_CHARS)
        } else {
            String::new()
        },
        changes_summary: changes_summary.into(),
        outcome,
    }
}

/// One-line summary: `Attempt N: X test failure(s), Y build error(s) - [test: ..][build: ..]`.
pub fn summarize_attempt(entry: &AttemptHistoryEntry) -> String {
    let mut line = format!(
        "Attempt {}: {} test failure(s), {} build error(s)",
        entry.attempt, entry.test_failures, entry.build_failures
    );
    let mut details = String::new();
    if !entry.test_snippet.is_empty() {
        details.push_str(&format!("[test: {}]", entry.test_snippet));
    }
    if !entry.build_snippet.is_empty() {
        details.push_str(&format!("[build: {}]", entry.build_snippet));
    }
    if entry.outcome == AttemptOutcome::NoChange {
        details.push_str("[no file changes]");
    }
    if !details.is_empty() {
        line.push_str(" - ");
        line.push_str(&details);
    }
    line
}

/// Multi-line summary of every recorded attempt, used in the final failure.
pub fn summarize_history(history: &[AttemptHistoryEntry]) -> String {
    history
        .iter()
        .map(summarize_attempt)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Markdown block listing the most recent attempts for the retry prompt.
pub fn recent_history_section(history: &[AttemptHistoryEntry]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let start = history.len().saturating_sub(PROMPT_HISTORY_LEN);
    let mut out = String::from("## Previous attempts\n");
    for entry in &history[start..] {
        out.push_str("- ");
        out.push_str(&summarize_attempt(entry));
        if !entry.changes_summary.is_empty() {
            out.push_str(&format!(" (changes: {})", entry.changes_summary));
        }
        out.push('\n');
    }
    out.push_str("\nDo not repeat the same fix. Try a different approach.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attempt: u32) -> AttemptHistoryEntry {
        record_attempt(
            attempt,
            AttemptOutcome::FailedTests,
            "",
            "Tests: 2 failed, 1 passed\nFAIL src/a.test.ts",
            "",
        )
    }

    #[test]
    fn summary_includes_counts_and_snippets() {
        let summary = summarize_attempt(&entry(1));
        assert_eq!(
            summary,
            "Attempt 1: 2 test failure(s), 0 build error(s) - [test: Tests: 2 failed, 1 passed]"
        );
    }

    #[test]
    fn build_failure_records_build_snippet() {
        let entry = record_attempt(
            2,
            AttemptOutcome::FailedBuild,
            "error[E0425]: cannot find value `x`",
            "",
            "src/lib.rs",
        );
        assert_eq!(entry.build_failures, 1);
        assert_eq!(entry.test_failures, 0);
        assert!(summarize_attempt(&entry).contains("[build: error[E0425]"));
    }

    #[test]
    fn stalled_attempt_is_marked_without_counts() {
        let entry = record_attempt(3, AttemptOutcome::NoChange, "", "", "no uncommitted changes");
        assert_eq!(entry.outcome, AttemptOutcome::NoChange);
        assert_eq!(
            summarize_attempt(&entry),
            "Attempt 3: 0 test failure(s), 0 build error(s) - [no file changes]"
        );
    }

    #[test]
    fn recent_section_keeps_last_three() {
        let history: Vec<_> = (1..=5).map(entry).collect();
        let section = recent_history_section(&history);
        assert!(!section.contains("Attempt 2:"));
        assert!(section.contains("Attempt 3:"));
        assert!(section.contains("Attempt 5:"));
        assert!(section.contains("Do not repeat the same fix"));
    }

    #[test]
    fn empty_history_renders_nothing() {
        assert!(recent_history_section(&[]).is_empty());
    }
}
