//! Failure analysis for verification output.
//!
//! Everything here is heuristic and works on sanitized text. Results feed the
//! attempt history and the retry prompt, never a control-flow decision other
//! than `classify_failure`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::AttemptOutcome;

static BUILD_ERROR_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(\berror(\[E\d{4}\])?:|\berror TS\d+|\bSyntaxError\b|\bcompilation failed\b|\bcould not compile\b|\bbuild failed\b|\bcannot find module\b)")
        .expect("build error pattern should compile")
});

static TEST_FAILURE_COUNTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // jest / vitest: "Tests:  2 failed, 5 passed"
        r"(?i)Tests?:\s+(\d+)\s+failed",
        // cargo test: "test result: FAILED. 3 passed; 2 failed;"
        r"(?i)test result: FAILED\.\s+\d+ passed;\s+(\d+) failed",
        // pytest: "=== 2 failed, 1 passed in 0.1s ==="
        r"(?i)(\d+)\s+failed",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("test count pattern should compile"))
    .collect()
});

static FAILED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:FAIL\b|✕|×|✗|--- FAIL:|test .+ \.\.\. FAILED)")
        .expect("fail marker pattern should compile")
});

static COMPILER_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(TS\d{4}|E\d{4})\b").expect("compiler code pattern should compile")
});

static MISSING_DEPENDENCY_PATTERNS: LazyLock<Vec<(Regex, Ecosystem)>> = LazyLock::new(|| {
    [
        (
            r#"Cannot find module ['"]([^'"./][^'"]*)['"]"#,
            Ecosystem::Node,
        ),
        (
            r#"Module not found: (?:Error: )?Can't resolve ['"]([^'"./][^'"]*)['"]"#,
            Ecosystem::Node,
        ),
        (r#"No module named ['"]?([\w.]+)['"]?"#, Ecosystem::Python),
        (
            r"unresolved import `([A-Za-z_][A-Za-z0-9_]*)",
            Ecosystem::Rust,
        ),
        (
            r"can't find crate for `([A-Za-z_][A-Za-z0-9_]*)`",
            Ecosystem::Rust,
        ),
        (
            r"no required module provides package ([\w./-]+)",
            Ecosystem::Go,
        ),
    ]
    .into_iter()
    .map(|(pattern, ecosystem)| {
        (
            Regex::new(pattern).expect("dependency pattern should compile"),
            ecosystem,
        )
    })
    .collect()
});

/// Compiler error codes that originate a failure rather than follow from one.
const SOURCE_ERROR_CODES: &[&str] = &[
    "TS2307", "TS2304", "TS2305", "TS2306", "TS2614", "TS1005", "TS1128", "E0432", "E0433",
    "E0425", "E0412",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ecosystem {
    Node,
    Python,
    Rust,
    Go,
}

impl Ecosystem {
    fn install_hint(self, package: &str) -> String {
        match self {
            Ecosystem::Node => format!("npm install {package}"),
            Ecosystem::Python => format!("pip install {package}"),
            Ecosystem::Rust => format!("add `{package}` to [dependencies] in Cargo.toml"),
            Ecosystem::Go => format!("go get {package}"),
        }
    }
}

/// A dependency the output says could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingDependency {
    pub ecosystem: Ecosystem,
    pub package: String,
}

/// Compiler diagnostics split into root causes and their fallout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerErrors {
    pub source: Vec<String>,
    pub cascading: Vec<String>,
}

impl CompilerErrors {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.cascading.is_empty()
    }
}

/// `failed_build` when the build output carries error tokens, else `failed_tests`.
pub fn classify_failure(build_passed: bool, build_output: &str) -> AttemptOutcome {
    if !build_passed || BUILD_ERROR_TOKENS.is_match(build_output) {
        AttemptOutcome::FailedBuild
    } else {
        AttemptOutcome::FailedTests
    }
}

/// Number of failing tests reported, falling back to counting FAIL markers.
pub fn count_test_failures(output: &str) -> usize {
    for pattern in TEST_FAILURE_COUNTS.iter() {
        let total: usize = pattern
            .captures_iter(output)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        if total > 0 {
            return total;
        }
    }
    FAILED_MARKER.find_iter(output).count()
}

/// Number of lines that look like build errors.
pub fn count_build_errors(output: &str) -> usize {
    output
        .lines()
        .filter(|line| BUILD_ERROR_TOKENS.is_match(line))
        .count()
}

/// Unresolved packages named in the output, deduplicated and ordered.
pub fn detect_missing_dependencies(output: &str) -> Vec<MissingDependency> {
    let mut found = BTreeSet::new();
    for (pattern, ecosystem) in MISSING_DEPENDENCY_PATTERNS.iter() {
        for caps in pattern.captures_iter(output) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            let package = package_root(name.as_str(), *ecosystem);
            if matches!(package.as_str(), "crate" | "self" | "super") {
                continue;
            }
            found.insert(MissingDependency {
                ecosystem: *ecosystem,
                package,
            });
        }
    }
    found.into_iter().collect()
}

/// Render install guidance for missing dependencies, or an empty string.
pub fn missing_dependency_guidance(missing: &[MissingDependency]) -> String {
    if missing.is_empty() {
        return String::new();
    }
    let mut out = String::from(
        "The following dependencies could not be resolved. Install them before changing code:\n",
    );
    for dep in missing {
        out.push_str(&format!(
            "- `{}`: {}\n",
            dep.package,
            dep.ecosystem.install_hint(&dep.package)
        ));
    }
    out
}

/// Split compiler diagnostics into source errors and cascading errors.
pub fn classify_compiler_errors(output: &str) -> CompilerErrors {
    let mut errors = CompilerErrors::default();
    for line in output.lines() {
        let Some(code) = COMPILER_ERROR.find(line) else {
            continue;
        };
        if !line.to_ascii_lowercase().contains("error") {
            continue;
        }
        let line = line.trim().to_string();
        if SOURCE_ERROR_CODES.contains(&code.as_str()) {
            errors.source.push(line);
        } else {
            errors.cascading.push(line);
        }
    }
    errors
}

fn package_root(name: &str, ecosystem: Ecosystem) -> String {
    match ecosystem {
        Ecosystem::Node if name.starts_with('@') => {
            name.splitn(3, '/').take(2).collect::<Vec<_>>().join("/")
        }
        Ecosystem::Node => name.split('/').next().unwrap_or(name).to_string(),
        Ecosystem::Python => name.split('.').next().unwrap_or(name).to_string(),
        Ecosystem::Rust | Ecosystem::Go => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_errors_classify_as_failed_build() {
        let output = "src/a.ts(3,1): error TS2304: Cannot find name 'x'.";
        assert_eq!(classify_failure(true, output), AttemptOutcome::FailedBuild);
        assert_eq!(classify_failure(false, ""), AttemptOutcome::FailedBuild);
        assert_eq!(
            classify_failure(true, "compiled ok"),
            AttemptOutcome::FailedTests
        );
    }

    #[test]
    fn counts_jest_failures() {
        assert_eq!(count_test_failures("Tests:       2 failed, 7 passed, 9 total"), 2);
    }

    #[test]
    fn counts_cargo_failures() {
        let output = "test result: FAILED. 10 passed; 3 failed; 0 ignored";
        assert_eq!(count_test_failures(output), 3);
    }

    #[test]
    fn counts_fail_markers_without_summary() {
        let output = "--- FAIL: TestParse (0.00s)\n--- FAIL: TestLex (0.00s)\nok";
        assert_eq!(count_test_failures(output), 2);
    }

    #[test]
    fn counts_build_error_lines() {
        let output = "error[E0425]: cannot find value `x`\nwarning: unused\nerror: aborting";
        assert_eq!(count_build_errors(output), 2);
    }

    #[test]
    fn detects_missing_dependencies_across_ecosystems() {
        let output = "Error: Cannot find module 'lodash/fp'\nModuleNotFoundError: No module named 'yaml.loader'\nerror[E0432]: unresolved import `serde_json`\nCannot find module './local'";
        let missing = detect_missing_dependencies(output);
        let names: Vec<_> = missing.iter().map(|dep| dep.package.as_str()).collect();
        assert_eq!(names, vec!["lodash", "yaml", "serde_json"]);
        let guidance = missing_dependency_guidance(&missing);
        assert!(guidance.contains("npm install lodash"));
        assert!(guidance.contains("pip install yaml"));
    }

    #[test]
    fn scoped_node_packages_keep_scope() {
        let missing = detect_missing_dependencies("Cannot find module '@scope/pkg/sub'");
        assert_eq!(missing[0].package, "@scope/pkg");
    }

    #[test]
    fn unresolved_crate_relative_imports_are_ignored() {
        assert!(detect_missing_dependencies("unresolved import `crate::foo`").is_empty());
    }

    #[test]
    fn compiler_errors_split_into_source_and_cascading() {
        let output = "src/a.ts(1,1): error TS2307: Cannot find module 'x'.\nsrc/b.ts(2,2): error TS2339: Property 'y' does not exist.\nerror[E0308]: mismatched types\nerror[E0433]: failed to resolve";
        let errors = classify_compiler_errors(output);
        assert_eq!(errors.source.len(), 2);
        assert_eq!(errors.cascading.len(), 2);
        assert!(errors.source[0].contains("TS2307"));
    }
}
