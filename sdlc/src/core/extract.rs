//! Best-effort extraction of the test an agent claims to have written.
//!
//! Agent transcripts are free text. These helpers never fail: when nothing
//! matches they return the `UNKNOWN_*` placeholders, which callers treat as a
//! degraded mode (the full suite stands in for the single test).

use std::sync::LazyLock;

use regex::Regex;

pub const UNKNOWN_TEST_FILE: &str = "unknown";
pub const UNKNOWN_TEST_NAME: &str = "unknown test";

static FILE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Test file: src/foo.test.ts"
        r"(?i)test\s+file\s*[:=]\s*[`'\x22]?([^\s`'\x22]+)",
        // "Created `tests/parser.rs`" and similar verbs
        r"(?i)(?:created|wrote|added|updated|modified)\s+(?:the\s+)?(?:new\s+)?(?:test\s+)?(?:file\s+)?[`'\x22]?([\w./-]+\.[A-Za-z]+)[`'\x22]?",
        // JS/TS naming convention
        r"([\w./-]+\.(?:test|spec)\.(?:ts|tsx|js|jsx|mjs|cjs))",
        // Python / Go conventions
        r"([\w./-]*test_[\w-]+\.py)",
        r"([\w./-]+_test\.(?:go|py|rs))",
        // Files under a tests/ directory
        r"((?:[\w.-]+/)*tests?/[\w./-]+\.(?:rs|py|go|ts|tsx|js|jsx|rb|java|kt))",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("test file pattern should compile"))
    .collect()
});

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)test\s+name\s*[:=]\s*[`'\x22]?([^`'\x22\n]+?)[`'\x22]?\s*$",
        r#"\b(?:it|test)\s*\(\s*['"`]([^'"`]+)['"`]"#,
        r"\bfn\s+(test_\w+|\w+_test|\w+)\s*\(\s*\)",
        r"\bdef\s+(test_\w+)\s*\(",
        r"\bfunc\s+(Test\w+)\s*\(",
        r#"\bdescribe\s*\(\s*['"`]([^'"`]+)['"`]"#,
    ]
    .iter()
    .map(|pattern| {
        Regex::new(&format!("(?m){pattern}")).expect("test name pattern should compile")
    })
    .collect()
});

/// Extract the test file path from an agent transcript.
pub fn extract_test_file(output: &str) -> String {
    for pattern in FILE_PATTERNS.iter() {
        for caps in pattern.captures_iter(output) {
            let Some(found) = caps.get(1) else {
                continue;
            };
            let candidate = trim_path(found.as_str());
            if looks_like_test_path(candidate) {
                return candidate.to_string();
            }
        }
    }
    UNKNOWN_TEST_FILE.to_string()
}

/// Extract the test name from an agent transcript.
pub fn extract_test_name(output: &str) -> String {
    for pattern in NAME_PATTERNS.iter() {
        if let Some(name) = pattern
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty())
        {
            return name.to_string();
        }
    }
    UNKNOWN_TEST_NAME.to_string()
}

/// True when extraction fell back to the placeholder file.
pub fn is_unknown_test_file(path: &str) -> bool {
    path == UNKNOWN_TEST_FILE
}

fn trim_path(raw: &str) -> &str {
    raw.trim_end_matches(['.', ',', ':', ';', ')', ']'])
}

fn looks_like_test_path(path: &str) -> bool {
    if !path.contains('.') || path.starts_with("http") {
        return false;
    }
    let lower = path.to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("__tests__/")
        || lower.starts_with("test/")
        || lower.starts_with("tests/")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.starts_with("test_")
        || file_name
            .rsplit_once('.')
            .is_some_and(|(stem, _)| stem.ends_with("_test"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_explicit_test_file_line() {
        let output = "I wrote the failing test.\nTest file: src/parser.test.ts\nDone.";
        assert_eq!(extract_test_file(output), "src/parser.test.ts");
    }

    #[test]
    fn extracts_conventional_path_from_prose() {
        let output = "Added a case to `tests/cli_parse.rs` covering empty input.";
        assert_eq!(extract_test_file(output), "tests/cli_parse.rs");
    }

    #[test]
    fn skips_non_test_paths() {
        let output = "Created src/parser.ts and nothing else.";
        assert_eq!(extract_test_file(output), UNKNOWN_TEST_FILE);
    }

    #[test]
    fn extracts_python_test_file() {
        let output = "New test lives in pkg/test_parser.py.";
        assert_eq!(extract_test_file(output), "pkg/test_parser.py");
    }

    #[test]
    fn extracts_js_test_name() {
        let output = "it('rejects empty input', () => { expect(parse('')).toThrow() })";
        assert_eq!(extract_test_name(output), "rejects empty input");
    }

    #[test]
    fn explicit_test_name_wins() {
        let output = "Test name: rejects empty input\nit('other', () => {})";
        assert_eq!(extract_test_name(output), "rejects empty input");
    }

    #[test]
    fn extracts_rust_test_fn() {
        let output = "#[test]\nfn rejects_empty_input() {\n    assert!(parse(\"\").is_err());\n}";
        assert_eq!(extract_test_name(output), "rejects_empty_input");
    }

    #[test]
    fn falls_back_to_unknown_name() {
        assert_eq!(extract_test_name("I did some work."), UNKNOWN_TEST_NAME);
        assert!(is_unknown_test_file(&extract_test_file("")));
    }
}
