//! Review pipeline: cheap structural gates, then one unified review call.
//!
//! Gates run in order and each can end the review without calling the agent:
//! retry ceiling, required changes for the story's content type, the
//! verification gate, then test existence. The review agent's response is
//! untrusted and parsed by [`parse_review_response`]; the decision is derived
//! locally from the findings.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::antipattern::{FileContents, detect_duplicated_implementations};
use crate::core::classifier::{
    ChangeSet, effective_content_type, is_test_file, missing_required_changes,
};
use crate::core::review_parse::parse_review_response;
use crate::core::review_rules::{
    PerspectiveResults, aggregate_severity, derive_perspectives, format_feedback,
    validate_tdd_cycles,
};
use crate::core::sanitize::truncate_test_output;
use crate::core::types::{Decision, IssueSeverity, ReviewAttempt, ReviewIssue, ReviewSeverity};
use crate::io::git::Git;
use crate::io::prompt::ReviewPromptInputs;
use crate::io::story::{Story, write_story};
use crate::io::verify::VerificationResult;
use crate::pipeline::{Pipeline, ReviewResult, sanitized_error};

/// Verification output carried in a gate issue.
const VERIFICATION_OUTPUT_CHARS: usize = 10_000;
const CATEGORY_SOURCE_CHANGES: &str = "source_changes";
const CATEGORY_INFRASTRUCTURE: &str = "infrastructure";
const REVIEW_NOTES_SECTION: &str = "Review Notes";
const NO_TESTS_FIX: &str = "Add tests that exercise the changed source files, then run the test suite before requesting review.";

/// Review `story`. Never returns an error: any failure becomes `FAILED`.
///
/// Infrastructure failures do not count against the review retry counter.
pub fn run_review(pipeline: &Pipeline<'_>, story: Story) -> ReviewResult {
    let fallback = story.clone();
    match review_story(pipeline, story) {
        Ok(result) => result,
        Err(err) => {
            let message = sanitized_error(&err);
            warn!(err = %err, "review pipeline failed");
            let issue = ReviewIssue::new(
                IssueSeverity::Blocker,
                CATEGORY_INFRASTRUCTURE,
                format!("Review could not run: {message}"),
            );
            let mut result = gate_result(fallback, Decision::Failed, vec![issue]);
            result.error = Some(message);
            result
        }
    }
}

#[instrument(skip_all, fields(story = %story.id()))]
fn review_story(pipeline: &Pipeline<'_>, mut story: Story) -> Result<ReviewResult> {
    let config = pipeline.config;
    let git = pipeline.git;

    let max_review_retries = config.review_retries.effective(story.frontmatter.max_retries);
    if story.frontmatter.retry_count > max_review_retries {
        info!(
            retry_count = story.frontmatter.retry_count,
            max_review_retries, "review retry ceiling exceeded"
        );
        let issue = ReviewIssue::new(
            IssueSeverity::Blocker,
            "retry_limit",
            format!(
                "Review retry limit reached ({} of {max_review_retries}); manual intervention required.",
                story.frontmatter.retry_count
            ),
        );
        return Ok(gate_result(story, Decision::Failed, vec![issue]));
    }

    let changed = git.changed_files_since_base()?;
    let story_path = relative_story_path(git, &story.path);
    let changes = ChangeSet::classify(&changed, story_path.as_deref());
    let content_type = effective_content_type(
        story.frontmatter.content_type,
        story.frontmatter.requires_source_changes,
    );
    debug!(
        content_type = content_type.as_str(),
        source = changes.source.len(),
        tests = changes.tests.len(),
        "classified changes"
    );
    if let Some(reason) = missing_required_changes(content_type, &changes) {
        return required_changes_missing(pipeline, story, reason);
    }

    let verification = pipeline.verifier.verify(git.workdir())?;
    story.record_verification(&verification);
    if !verification.passed() {
        info!(build_passed = verification.build_passed, "verification gate failed");
        let issue = verification_issue(&verification);
        return reject_before_review(story, issue, ReviewSeverity::Critical);
    }

    if !changes.source.is_empty() && !tests_exist(git.list_files()) {
        info!("source changed but no test files exist");
        let issue = ReviewIssue::new(
            IssueSeverity::Blocker,
            "testing",
            "No tests found for the changed source files.",
        )
        .with_suggested_fix(NO_TESTS_FIX);
        let severity = aggregate_severity(std::slice::from_ref(&issue));
        return reject_before_review(story, issue, severity);
    }

    let tdd_enabled = story.tdd_enabled(config.tdd_enabled);
    let inputs = ReviewPromptInputs {
        changed_files: changes
            .source
            .iter()
            .chain(&changes.tests)
            .chain(&changes.config)
            .chain(&changes.docs)
            .cloned()
            .collect(),
        tdd_enabled,
        tdd_cycles: story.frontmatter.tdd_test_history.len(),
    };
    let prompt = pipeline.prompts.render_review(&story, &inputs)?;
    let response = pipeline.invoke_agent(
        &format!("{}-review", story.id()),
        prompt,
        Some(pipeline.prompts.review_system_prompt()),
    )?;

    let parsed = parse_review_response(&response);
    let mut issues = parsed.issues;
    let mut forced_fail = parsed.forced_fail;
    if parsed.from_heuristic {
        debug!("review findings recovered heuristically");
    }

    if tdd_enabled {
        let violations = validate_tdd_cycles(&story.frontmatter.tdd_test_history);
        if !violations.is_empty() {
            info!(count = violations.len(), "tdd compliance violations");
            forced_fail = true;
            issues.extend(violations);
        }
    }

    if config.detect_test_antipatterns {
        match detect_antipatterns(git.workdir(), &changes) {
            Ok(found) => issues.extend(found),
            Err(err) => warn!(err = %err, "test anti-pattern detection failed"),
        }
    }

    let passed = config.pass_threshold.passes(&issues) && !forced_fail;
    let decision = if passed {
        Decision::Approved
    } else {
        Decision::Rejected
    };
    let severity = aggregate_severity(&issues);
    let perspectives = derive_perspectives(&issues);
    let mut feedback = format_feedback(&issues);
    if let Some(summary) = parsed.summary.filter(|summary| !summary.trim().is_empty()) {
        feedback = format!("{}\n\n{feedback}", summary.trim());
    }
    info!(decision = %decision, issues = issues.len(), "review complete");

    match decision {
        Decision::Approved => story.frontmatter.reviews_complete = true,
        _ => {
            story.frontmatter.retry_count += 1;
            append_review_notes(&mut story, &feedback);
        }
    }
    story.append_review_history(review_attempt(
        decision,
        Some(severity),
        &feedback,
        &issues,
        perspectives,
    ));
    write_story(&story)?;

    Ok(ReviewResult {
        success: decision == Decision::Approved,
        changes_made: vec![format!("Review decision: {decision}")],
        story,
        error: None,
        passed,
        decision,
        severity: Some(severity),
        issues,
        feedback,
        perspectives,
    })
}

/// RECOVERY below the implementation retry ceiling, FAILED at it.
fn required_changes_missing(
    pipeline: &Pipeline<'_>,
    mut story: Story,
    reason: String,
) -> Result<ReviewResult> {
    let max_implementation_retries = pipeline
        .config
        .implementation_retries
        .effective(story.frontmatter.max_implementation_retries);
    if story.frontmatter.implementation_retry_count < max_implementation_retries {
        info!(%reason, "required changes missing, sending story back to implementation");
        story.frontmatter.implementation_complete = false;
        story.frontmatter.last_restart_reason = Some(reason.clone());
        story.frontmatter.implementation_retry_count += 1;
        story.frontmatter.total_recovery_attempts += 1;
        write_story(&story)?;
        let mut result = gate_result(story, Decision::Recovery, Vec::new());
        result.feedback = reason;
        result.changes_made =
            vec!["Cleared implementation_complete for another attempt".to_string()];
        return Ok(result);
    }

    info!(%reason, "required changes missing and implementation retries exhausted");
    let issue = ReviewIssue::new(
        IssueSeverity::Blocker,
        CATEGORY_SOURCE_CHANGES,
        format!(
            "{reason} Implementation retries exhausted ({} of {max_implementation_retries}).",
            story.frontmatter.implementation_retry_count
        ),
    );
    Ok(gate_result(story, Decision::Failed, vec![issue]))
}

/// REJECTED with one issue and no agent call; counts as a review retry.
fn reject_before_review(
    mut story: Story,
    issue: ReviewIssue,
    severity: ReviewSeverity,
) -> Result<ReviewResult> {
    let issues = vec![issue];
    let feedback = format_feedback(&issues);
    let perspectives = PerspectiveResults::all_failed();
    story.frontmatter.retry_count += 1;
    append_review_notes(&mut story, &feedback);
    story.append_review_history(review_attempt(
        Decision::Rejected,
        Some(severity),
        &feedback,
        &issues,
        perspectives,
    ));
    write_story(&story)?;
    let mut result = gate_result(story, Decision::Rejected, issues);
    result.severity = Some(severity);
    Ok(result)
}

/// Record rejection feedback in the story body for the next implementation pass.
fn append_review_notes(story: &mut Story, feedback: &str) {
    let note = format!(
        "**Review attempt {} (REJECTED)**\n\n{}",
        story.frontmatter.retry_count,
        feedback.trim_end()
    );
    story.append_to_section(REVIEW_NOTES_SECTION, &note);
}

/// Result for an outcome decided before the review agent ran.
fn gate_result(story: Story, decision: Decision, issues: Vec<ReviewIssue>) -> ReviewResult {
    let feedback = format_feedback(&issues);
    let severity = (!issues.is_empty()).then_some(ReviewSeverity::Critical);
    ReviewResult {
        success: false,
        changes_made: Vec::new(),
        story,
        error: None,
        passed: false,
        decision,
        severity,
        issues,
        feedback,
        perspectives: PerspectiveResults::all_failed(),
    }
}

fn verification_issue(verification: &VerificationResult) -> ReviewIssue {
    if !verification.build_passed {
        ReviewIssue::new(
            IssueSeverity::Blocker,
            "build",
            format!(
                "Build failed:\n{}",
                truncate_test_output(&verification.build_output, VERIFICATION_OUTPUT_CHARS)
            ),
        )
        .with_suggested_fix("Fix the build errors before requesting review.")
    } else {
        ReviewIssue::new(
            IssueSeverity::Blocker,
            "testing",
            format!(
                "Tests failed:\n{}",
                truncate_test_output(&verification.tests_output, VERIFICATION_OUTPUT_CHARS)
            ),
        )
        .with_suggested_fix("Make the full test suite pass before requesting review.")
    }
}

fn review_attempt(
    decision: Decision,
    severity: Option<ReviewSeverity>,
    feedback: &str,
    issues: &[ReviewIssue],
    perspectives: PerspectiveResults,
) -> ReviewAttempt {
    ReviewAttempt {
        timestamp: Utc::now(),
        decision,
        severity,
        feedback: feedback.to_string(),
        blockers: issues
            .iter()
            .filter(|issue| issue.severity == IssueSeverity::Blocker)
            .map(|issue| issue.description.clone())
            .collect(),
        code_review_passed: perspectives.code_review_passed,
        security_review_passed: perspectives.security_review_passed,
        po_review_passed: perspectives.po_review_passed,
    }
}

/// Any test file in the repository listing. A failed listing fails open.
fn tests_exist(listing: Result<Vec<String>>) -> bool {
    match listing {
        Ok(files) => files.iter().any(|file| is_test_file(file)),
        Err(err) => {
            warn!(err = %err, "listing files failed, skipping test-existence check");
            true
        }
    }
}

/// Story path relative to the working tree, for excluding it from changes.
fn relative_story_path(git: &Git, story_path: &Path) -> Option<String> {
    let absolute = if story_path.is_absolute() {
        story_path.to_path_buf()
    } else {
        git.workdir().join(story_path)
    };
    let canonical = absolute.canonicalize().unwrap_or(absolute);
    canonical
        .strip_prefix(git.workdir())
        .ok()
        .map(|relative| relative.to_string_lossy().replace('\\', "/"))
}

fn detect_antipatterns(workdir: &Path, changes: &ChangeSet) -> Result<Vec<ReviewIssue>> {
    let sources = read_existing(workdir, &changes.source)?;
    let tests = read_existing(workdir, &changes.tests)?;
    Ok(detect_duplicated_implementations(&sources, &tests))
}

/// Read each path under `workdir`, skipping files deleted by the change.
fn read_existing(workdir: &Path, paths: &[String]) -> Result<Vec<FileContents>> {
    let mut files = Vec::new();
    for path in paths {
        let full = workdir.join(path);
        match fs::read_to_string(&full) {
            Ok(contents) => files.push(FileContents {
                path: path.clone(),
                contents,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", full.display()));
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_failure_issue_is_a_build_blocker() {
        let issue = verification_issue(&VerificationResult {
            build_passed: false,
            build_output: "error: expected `;`".to_string(),
            tests_passed: false,
            tests_output: "skipped: build failed".to_string(),
        });
        assert_eq!(issue.severity, IssueSeverity::Blocker);
        assert_eq!(issue.category, "build");
        assert!(issue.description.contains("expected `;`"));
    }

    #[test]
    fn verification_output_in_issue_is_bounded() {
        let issue = verification_issue(&VerificationResult {
            build_passed: true,
            build_output: String::new(),
            tests_passed: false,
            tests_output: "x".repeat(50_000),
        });
        assert_eq!(issue.category, "testing");
        assert!(issue.description.len() < 10_240);
        assert!(issue.description.contains("50000"));
    }

    #[test]
    fn review_attempt_lists_blocker_descriptions() {
        let issues = vec![
            ReviewIssue::new(IssueSeverity::Blocker, "security", "hardcoded key"),
            ReviewIssue::new(IssueSeverity::Minor, "style", "naming"),
        ];
        let attempt = review_attempt(
            Decision::Rejected,
            Some(ReviewSeverity::Critical),
            "feedback",
            &issues,
            PerspectiveResults::all_passed(),
        );
        assert_eq!(attempt.blockers, vec!["hardcoded key".to_string()]);
        assert!(attempt.code_review_passed);
    }

    #[test]
    fn test_existence_check_fails_open_on_git_error() {
        assert!(tests_exist(Err(anyhow::anyhow!("git ls-files failed"))));
        assert!(!tests_exist(Ok(vec!["src/lib.rs".to_string()])));
        assert!(tests_exist(Ok(vec![
            "src/lib.rs".to_string(),
            "tests/lib_test.rs".to_string(),
        ])));
    }

    #[test]
    fn read_existing_skips_deleted_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.rs"), "fn a() {}\n").expect("write");
        let files = read_existing(temp.path(), &["a.rs".to_string(), "gone.rs".to_string()])
            .expect("read");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.rs");
    }
}
