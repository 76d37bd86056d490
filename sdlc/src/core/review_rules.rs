//! Deterministic rules applied to review findings.

use serde::Serialize;

use crate::core::types::{IssueSeverity, Perspective, ReviewIssue, ReviewSeverity, TddTestCycle};

pub const CATEGORY_TDD_VIOLATION: &str = "tdd_violation";

/// Maximum findings of each failing severity a passing review may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassThreshold {
    pub max_blockers: usize,
    pub max_criticals: usize,
}

impl Default for PassThreshold {
    fn default() -> Self {
        Self {
            max_blockers: 0,
            max_criticals: 1,
        }
    }
}

impl PassThreshold {
    pub fn passes(&self, issues: &[ReviewIssue]) -> bool {
        let counts = SeverityCounts::of(issues);
        counts.blocker <= self.max_blockers && counts.critical <= self.max_criticals
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub blocker: usize,
    pub critical: usize,
    pub major: usize,
    pub minor: usize,
}

impl SeverityCounts {
    pub fn of(issues: &[ReviewIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                IssueSeverity::Blocker => counts.blocker += 1,
                IssueSeverity::Critical => counts.critical += 1,
                IssueSeverity::Major => counts.major += 1,
                IssueSeverity::Minor => counts.minor += 1,
            }
        }
        counts
    }
}

/// Pass/fail per review perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveResults {
    pub code_review_passed: bool,
    pub security_review_passed: bool,
    pub po_review_passed: bool,
}

impl PerspectiveResults {
    pub fn all_passed() -> Self {
        Self {
            code_review_passed: true,
            security_review_passed: true,
            po_review_passed: true,
        }
    }

    pub fn all_failed() -> Self {
        Self {
            code_review_passed: false,
            security_review_passed: false,
            po_review_passed: false,
        }
    }
}

/// A perspective fails iff some blocker/critical finding is tagged with it.
pub fn derive_perspectives(issues: &[ReviewIssue]) -> PerspectiveResults {
    let fails = |perspective: Perspective| {
        issues
            .iter()
            .any(|issue| issue.severity.is_failing() && issue.perspectives.contains(&perspective))
    };
    PerspectiveResults {
        code_review_passed: !fails(Perspective::Code),
        security_review_passed: !fails(Perspective::Security),
        po_review_passed: !fails(Perspective::Po),
    }
}

/// Overall severity from the worst finding; `Low` when there are none.
pub fn aggregate_severity(issues: &[ReviewIssue]) -> ReviewSeverity {
    match issues.iter().map(|issue| issue.severity).min() {
        Some(IssueSeverity::Blocker) => ReviewSeverity::Critical,
        Some(IssueSeverity::Critical) => ReviewSeverity::High,
        Some(IssueSeverity::Major) => ReviewSeverity::Medium,
        Some(IssueSeverity::Minor) | None => ReviewSeverity::Low,
    }
}

/// Flag every recorded TDD cycle that did not complete the protocol.
pub fn validate_tdd_cycles(cycles: &[TddTestCycle]) -> Vec<ReviewIssue> {
    let mut issues = Vec::new();
    for cycle in cycles {
        let mut missing = Vec::new();
        if cycle.green_timestamp.is_none() {
            missing.push("GREEN phase never completed");
        }
        if cycle.refactor_timestamp.is_none() {
            missing.push("REFACTOR phase never completed");
        }
        if !cycle.all_tests_green {
            missing.push("full suite was not green");
        }
        if missing.is_empty() {
            continue;
        }
        let mut issue = ReviewIssue::new(
            IssueSeverity::Critical,
            CATEGORY_TDD_VIOLATION,
            format!(
                "TDD cycle {} ({}): {}",
                cycle.cycle_number,
                cycle.test_name,
                missing.join("; ")
            ),
        )
        .with_suggested_fix("Re-run the cycle through RED, GREEN and REFACTOR until the full suite passes.")
        .with_perspectives(&[Perspective::Code]);
        if cycle.test_file != crate::core::extract::UNKNOWN_TEST_FILE {
            issue.file = Some(cycle.test_file.clone());
        }
        issues.push(issue);
    }
    issues
}

/// Render issues as markdown grouped by severity, worst first.
pub fn format_feedback(issues: &[ReviewIssue]) -> String {
    if issues.is_empty() {
        return "No issues found.".to_string();
    }
    let mut out = String::new();
    for (severity, heading) in [
        (IssueSeverity::Blocker, "Blockers"),
        (IssueSeverity::Critical, "Critical"),
        (IssueSeverity::Major, "Major"),
        (IssueSeverity::Minor, "Minor"),
    ] {
        let group: Vec<_> = issues
            .iter()
            .filter(|issue| issue.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("### {heading} ({})\n", group.len()));
        for issue in group {
            out.push_str(&format!("- **[{}]** {}", issue.category, issue.description));
            match (&issue.file, issue.line) {
                (Some(file), Some(line)) => out.push_str(&format!(" (`{file}:{line}`)")),
                (Some(file), None) => out.push_str(&format!(" (`{file}`)")),
                _ => {}
            }
            out.push('\n');
            if let Some(fix) = &issue.suggested_fix {
                out.push_str(&format!("  - Suggested fix: {fix}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn issue(severity: IssueSeverity, perspectives: &[Perspective]) -> ReviewIssue {
        ReviewIssue::new(severity, "code_quality", "x").with_perspectives(perspectives)
    }

    #[test]
    fn zero_issues_pass_every_perspective() {
        assert_eq!(derive_perspectives(&[]), PerspectiveResults::all_passed());
    }

    #[test]
    fn tagged_blocker_fails_only_its_perspective() {
        let issues = [issue(IssueSeverity::Blocker, &[Perspective::Security])];
        let results = derive_perspectives(&issues);
        assert!(results.code_review_passed);
        assert!(!results.security_review_passed);
        assert!(results.po_review_passed);
    }

    #[test]
    fn untagged_and_minor_issues_fail_nothing() {
        let issues = [
            issue(IssueSeverity::Blocker, &[]),
            issue(IssueSeverity::Major, &[Perspective::Code, Perspective::Po]),
        ];
        assert_eq!(derive_perspectives(&issues), PerspectiveResults::all_passed());
    }

    #[test]
    fn default_threshold_allows_one_critical() {
        let threshold = PassThreshold::default();
        assert!(threshold.passes(&[issue(IssueSeverity::Critical, &[])]));
        assert!(!threshold.passes(&[
            issue(IssueSeverity::Critical, &[]),
            issue(IssueSeverity::Critical, &[]),
        ]));
        assert!(!threshold.passes(&[issue(IssueSeverity::Blocker, &[])]));
        assert!(threshold.passes(&vec![issue(IssueSeverity::Major, &[]); 5]));
    }

    #[test]
    fn severity_follows_worst_issue() {
        assert_eq!(aggregate_severity(&[]), ReviewSeverity::Low);
        assert_eq!(
            aggregate_severity(&[
                issue(IssueSeverity::Minor, &[]),
                issue(IssueSeverity::Blocker, &[]),
            ]),
            ReviewSeverity::Critical
        );
        assert_eq!(
            aggregate_severity(&[issue(IssueSeverity::Critical, &[])]),
            ReviewSeverity::High
        );
    }

    #[test]
    fn incomplete_cycle_is_a_tdd_violation() {
        let now = Utc::now();
        let complete = TddTestCycle {
            cycle_number: 1,
            test_name: "parses".into(),
            test_file: "tests/parse.rs".into(),
            red_timestamp: now,
            green_timestamp: Some(now),
            refactor_timestamp: Some(now),
            test_output_red: "fail".into(),
            test_output_green: Some("ok".into()),
            all_tests_green: true,
        };
        let broken = TddTestCycle {
            cycle_number: 2,
            refactor_timestamp: None,
            all_tests_green: false,
            ..complete.clone()
        };
        let issues = validate_tdd_cycles(&[complete, broken]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert_eq!(issues[0].category, CATEGORY_TDD_VIOLATION);
        assert!(issues[0].description.contains("TDD cycle 2"));
    }

    #[test]
    fn feedback_groups_by_severity() {
        let issues = [
            issue(IssueSeverity::Minor, &[]),
            ReviewIssue::new(IssueSeverity::Blocker, "testing", "No tests found")
                .with_suggested_fix("Add tests"),
        ];
        let feedback = format_feedback(&issues);
        let blockers = feedback.find("### Blockers (1)").expect("blockers heading");
        let minor = feedback.find("### Minor (1)").expect("minor heading");
        assert!(blockers < minor);
        assert!(feedback.contains("Suggested fix: Add tests"));
    }
}
