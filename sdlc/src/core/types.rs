//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between the TDD engine, the retry loop,
//! and the review pipeline. They do not depend on I/O and serialize to the
//! story frontmatter and to the CLI result contract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a single review finding.
///
/// Ordered from most to least severe so that `min()` yields the worst issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Blocker,
    Critical,
    Major,
    Minor,
}

impl IssueSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueSeverity::Blocker => "blocker",
            IssueSeverity::Critical => "critical",
            IssueSeverity::Major => "major",
            IssueSeverity::Minor => "minor",
        }
    }

    /// Blocker and critical findings fail the perspectives they are tagged with.
    pub fn is_failing(self) -> bool {
        matches!(self, IssueSeverity::Blocker | IssueSeverity::Critical)
    }
}

/// Review lens a finding was raised under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    Code,
    Security,
    Po,
}

/// A single review finding.
///
/// Findings with an empty `perspectives` list are untagged and never fail a
/// perspective on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub perspectives: Vec<Perspective>,
}

impl ReviewIssue {
    pub fn new(
        severity: IssueSeverity,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            description: description.into(),
            file: None,
            line: None,
            suggested_fix: None,
            perspectives: Vec::new(),
        }
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_perspectives(mut self, perspectives: &[Perspective]) -> Self {
        self.perspectives = perspectives.to_vec();
        self
    }
}

/// Terminal outcome of one review invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
    /// Re-run implementation; does not count as a review failure.
    Recovery,
    /// Recoverable paths exhausted; needs a human.
    Failed,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::Rejected => "REJECTED",
            Decision::Recovery => "RECOVERY",
            Decision::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate severity of a review outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// What kind of change a story is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Code,
    Configuration,
    Documentation,
    Mixed,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Code => "code",
            ContentType::Configuration => "configuration",
            ContentType::Documentation => "documentation",
            ContentType::Mixed => "mixed",
        }
    }

    /// Content types whose changes must include production source files.
    pub fn requires_source(self) -> bool {
        matches!(self, ContentType::Code | ContentType::Mixed)
    }
}

/// One phase of the RED/GREEN/REFACTOR protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TddPhase {
    Red,
    Green,
    Refactor,
}

impl TddPhase {
    pub fn label(self) -> &'static str {
        match self {
            TddPhase::Red => "RED",
            TddPhase::Green => "GREEN",
            TddPhase::Refactor => "REFACTOR",
        }
    }
}

impl fmt::Display for TddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted record of one completed TDD cycle.
///
/// A cycle is only created after RED has executed, so `red_timestamp` is
/// always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddTestCycle {
    pub cycle_number: u32,
    pub test_name: String,
    pub test_file: String,
    pub red_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub green_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refactor_timestamp: Option<DateTime<Utc>>,
    pub test_output_red: String,
    #[serde(default)]
    pub test_output_green: Option<String>,
    pub all_tests_green: bool,
}

impl TddTestCycle {
    /// A cycle is valid when every phase ran and the suite ended green.
    pub fn is_complete(&self) -> bool {
        self.green_timestamp.is_some() && self.refactor_timestamp.is_some() && self.all_tests_green
    }
}

/// Ephemeral result of one phase execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TddPhaseResult {
    pub test_name: String,
    pub test_file: String,
    pub timestamp: DateTime<Utc>,
    pub output: String,
    pub success: bool,
}

/// Protocol violation detected inside a TDD cycle. Fatal to the cycle loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TddViolation {
    pub phase: TddPhase,
    pub detail: String,
}

impl fmt::Display for TddViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDD Violation: {} phase {}", self.phase, self.detail)
    }
}

/// Why a non-TDD implementation attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    FailedTests,
    FailedBuild,
    NoChange,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::FailedTests => "failed_tests",
            AttemptOutcome::FailedBuild => "failed_build",
            AttemptOutcome::NoChange => "no_change",
        }
    }
}

/// Summary of one failed implementation attempt, held only inside one loop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptHistoryEntry {
    pub attempt: u32,
    pub test_failures: usize,
    pub build_failures: usize,
    pub test_snippet: String,
    pub build_snippet: String,
    pub changes_summary: String,
    pub outcome: AttemptOutcome,
}

/// Persisted summary of one review pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAttempt {
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    #[serde(default)]
    pub severity: Option<ReviewSeverity>,
    pub feedback: String,
    #[serde(default)]
    pub blockers: Vec<String>,
    pub code_review_passed: bool,
    pub security_review_passed: bool,
    pub po_review_passed: bool,
}
