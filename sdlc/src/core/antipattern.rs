//! Detection of tests that re-implement the code they claim to test.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{IssueSeverity, Perspective, ReviewIssue};

pub const CATEGORY_TEST_ANTIPATTERN: &str = "test_antipattern";

static FUNCTION_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:export\s+)?(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:function\s+([A-Za-z_$][\w$]*)|fn\s+([A-Za-z_]\w*)|def\s+([A-Za-z_]\w*)|func\s+([A-Za-z_]\w*)|(?:const|let)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>)",
    )
    .expect("function definition pattern should compile")
});

/// Names too generic to signal duplication.
const IGNORED_NAMES: &[&str] = &[
    "main", "setup", "teardown", "helper", "new", "default", "init", "run", "render", "handler",
];

/// A file path with its contents.
#[derive(Debug, Clone)]
pub struct FileContents {
    pub path: String,
    pub contents: String,
}

/// Names of functions defined in `contents`, in order of first appearance.
pub fn defined_functions(contents: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for caps in FUNCTION_DEFINITION.captures_iter(contents) {
        let Some(name) = caps.iter().skip(1).flatten().next() else {
            continue;
        };
        let name = name.as_str();
        if name.len() < 3 || name.starts_with("test") || IGNORED_NAMES.contains(&name) {
            continue;
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    names
}

/// Flag test files that define a function also defined by a changed source file.
pub fn detect_duplicated_implementations(
    sources: &[FileContents],
    tests: &[FileContents],
) -> Vec<ReviewIssue> {
    let mut issues = Vec::new();
    for source in sources {
        let source_functions = defined_functions(&source.contents);
        if source_functions.is_empty() {
            continue;
        }
        for test in tests {
            let test_functions: BTreeSet<String> =
                defined_functions(&test.contents).into_iter().collect();
            let duplicated: Vec<&str> = source_functions
                .iter()
                .filter(|name| test_functions.contains(*name))
                .map(String::as_str)
                .collect();
            if duplicated.is_empty() {
                continue;
            }
            let mut issue = ReviewIssue::new(
                IssueSeverity::Major,
                CATEGORY_TEST_ANTIPATTERN,
                format!(
                    "Test file redefines {} from {} instead of importing it: {}",
                    if duplicated.len() == 1 { "a function" } else { "functions" },
                    source.path,
                    duplicated.join(", ")
                ),
            )
            .with_suggested_fix("Import the production implementation in the test instead of copying it.")
            .with_perspectives(&[Perspective::Code]);
            issue.file = Some(test.path.clone());
            issues.push(issue);
        }
    }
    issues
}
