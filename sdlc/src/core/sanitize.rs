//! Output sanitization before anything reaches a prompt, a story, or a user.

use std::sync::LazyLock;

use regex::Regex;

/// Default cap for test/build output embedded in retry prompts.
pub const MAX_PROMPT_OUTPUT_CHARS: usize = 5_000;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ansi pattern should compile")
});

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"sk-ant-[A-Za-z0-9_-]{10,}", "[REDACTED]"),
        (r"sk-[A-Za-z0-9_-]{20,}", "[REDACTED]"),
        (r"gh[pousr]_[A-Za-z0-9]{20,}", "[REDACTED]"),
        (r"github_pat_[A-Za-z0-9_]{20,}", "[REDACTED]"),
        (r"AKIA[0-9A-Z]{16}", "[REDACTED]"),
        (r"xox[baprs]-[A-Za-z0-9-]{10,}", "[REDACTED]"),
        (r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]{8,}", "${1}[REDACTED]"),
        (
            r#"(?i)\b((?:api[_-]?key|secret|token|password|passwd)\s*[=:]\s*)['"]?[^\s'"]{4,}['"]?"#,
            "${1}[REDACTED]",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("secret pattern should compile"),
            replacement,
        )
    })
    .collect()
});

static ABSOLUTE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[A-Za-z]:\\|/)(?:[^\s:'"`()\[\]]+[/\\])+[^\s:'"`()\[\]]*"#)
        .expect("path pattern should compile")
});

/// Remove ANSI escape sequences.
pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Remove control characters other than newline and tab.
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Best-effort redaction of credentials that tools commonly echo.
pub fn redact_secrets(input: &str) -> String {
    let mut out = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Full sanitization pass for captured subprocess output.
pub fn sanitize_output(input: &str) -> String {
    let without_ansi = strip_ansi(&input.replace("\r\n", "\n"));
    redact_secrets(&strip_control_chars(&without_ansi))
}

/// Notice appended when output is cut to `max` characters.
pub fn truncation_notice(max: usize, total: usize) -> String {
    format!("\n\n[Output truncated, showing first {max} of {total} characters]")
}

/// Keep the first `max` characters, appending a notice with the original length.
///
/// Identity when the input already fits. Lengths are counted in characters.
pub fn truncate_test_output(output: &str, max: usize) -> String {
    let total = output.chars().count();
    if total <= max {
        return output.to_string();
    }
    let mut truncated: String = output.chars().take(max).collect();
    truncated.push_str(&truncation_notice(max, total));
    truncated
}

/// Keep the last `max` characters (failure summaries want the tail of a run).
pub fn tail_chars(output: &str, max: usize) -> String {
    let total = output.chars().count();
    if total <= max {
        return output.to_string();
    }
    let tail: String = output.chars().skip(total - max).collect();
    format!("[...{} earlier characters omitted]\n{tail}", total - max)
}

/// Sanitize then truncate output destined for an agent prompt.
pub fn prepare_for_prompt(output: &str, max: usize) -> String {
    truncate_test_output(&sanitize_output(output), max)
}

/// Make an internal error safe to show: no absolute paths, no home directory,
/// at most three lines.
pub fn sanitize_error_message(message: &str, home_dir: Option<&str>) -> String {
    let mut cleaned = sanitize_output(message);
    if let Some(home) = home_dir.filter(|home| home.len() > 1) {
        cleaned = cleaned.replace(home, "~");
    }
    let cleaned = ABSOLUTE_PATH_RE.replace_all(&cleaned, "[path]");
    cleaned
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join("\n")
}

/// First line that looks like an error, trimmed to `max` characters.
pub fn first_error_snippet(output: &str, max: usize) -> String {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("fail") || lower.contains("panicked")
        })
        .or_else(|| output.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or("");
    let mut snippet: String = line.chars().take(max).collect();
    if line.chars().count() > max {
        snippet.push_str("...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_colors() {
        assert_eq!(strip_ansi("\x1b[31mFAIL\x1b[0m src/a.test.ts"), "FAIL src/a.test.ts");
    }

    #[test]
    fn strips_control_but_keeps_newlines() {
        assert_eq!(strip_control_chars("a\u{0007}b\nc\td"), "ab\nc\td");
    }

    #[test]
    fn redacts_common_tokens() {
        let out = redact_secrets("export API_KEY=abcd1234efgh and Bearer abcdefghijklmnop");
        assert!(!out.contains("abcd1234efgh"));
        assert!(!out.contains("abcdefghijklmnop"));
        assert!(out.contains("API_KEY=[REDACTED]"));
        let out = redact_secrets("token ghp_aaaaaaaaaaaaaaaaaaaaaaaaaaaa leaked");
        assert_eq!(out, "token [REDACTED] leaked");
    }

    #[test]
    fn truncate_is_identity_when_short() {
        assert_eq!(truncate_test_output("short", 10), "short");
        assert_eq!(truncate_test_output("exactly10!", 10), "exactly10!");
    }

    #[test]
    fn truncate_length_is_max_plus_notice() {
        let input = "x".repeat(12_345);
        let out = truncate_test_output(&input, 5_000);
        let notice = truncation_notice(5_000, 12_345);
        assert_eq!(out.chars().count(), 5_000 + notice.chars().count());
        assert!(out.ends_with(&notice));
        assert!(notice.contains("12345"));
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let input = "é".repeat(20);
        let out = truncate_test_output(&input, 5);
        assert!(out.starts_with("ééééé\n\n[Output truncated"));
    }

    #[test]
    fn tail_keeps_end_of_output() {
        let out = tail_chars("0123456789", 3);
        assert!(out.ends_with("789"));
        assert!(out.contains("7 earlier characters omitted"));
    }

    #[test]
    fn error_message_hides_paths_and_home() {
        let msg = "read story /home/dev/project/.ai-sdlc/stories/S-1/story.md\nline two\nline three\nline four";
        let out = sanitize_error_message(msg, Some("/home/dev"));
        assert!(!out.contains("/home/dev"));
        assert_eq!(out.lines().count(), 3);
        assert!(!out.contains("line four"));
    }

    #[test]
    fn error_message_replaces_absolute_paths() {
        let out = sanitize_error_message("spawn /usr/local/bin/npm failed", None);
        assert_eq!(out, "spawn [path] failed");
    }

    #[test]
    fn error_snippet_prefers_error_lines() {
        let output = "running 3 tests\nok\nerror: expected 2 got 3\n";
        assert_eq!(first_error_snippet(output, 100), "error: expected 2 got 3");
    }
}
