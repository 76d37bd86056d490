//! Non-TDD implementation loop with stall detection and history-driven retries.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::attempts::{recent_history_section, record_attempt, summarize_history};
use crate::core::failure::{
    classify_compiler_errors, classify_failure, detect_missing_dependencies,
    missing_dependency_guidance,
};
use crate::core::fingerprint::has_changes_occurred;
use crate::core::sanitize::{MAX_PROMPT_OUTPUT_CHARS, prepare_for_prompt, tail_chars};
use crate::core::types::{AttemptHistoryEntry, AttemptOutcome};
use crate::io::git::{Git, StatusEntry};
use crate::io::prompt::RetryPromptInputs;
use crate::io::story::{Story, write_story};
use crate::io::verify::VerificationResult;
use crate::pipeline::{AgentResult, Pipeline, sanitized_error};

/// Characters of the last test output kept in the final failure message.
const FINAL_OUTPUT_TAIL_CHARS: usize = 2_000;
const CHANGED_PATHS_SHOWN: usize = 5;
const NO_PROGRESS_REMEDY: &str = "Suggested remedy: make concrete file edits that address the failures listed above, and check that the agent can write to the working tree.";

/// Run up to `max_retries + 1` implementation attempts.
///
/// Infrastructure errors are folded into a failed result with a sanitized
/// message.
pub fn run_implementation(pipeline: &Pipeline<'_>, story: Story) -> AgentResult {
    let fallback = story.clone();
    match implementation_loop(pipeline, story) {
        Ok(result) => result,
        Err(err) => {
            warn!(err = %err, "implementation aborted");
            AgentResult::failed(fallback, Vec::new(), sanitized_error(&err))
        }
    }
}

#[instrument(skip_all, fields(story = %story.id()))]
fn implementation_loop(pipeline: &Pipeline<'_>, mut story: Story) -> Result<AgentResult> {
    let max_retries = pipeline
        .config
        .implementation_retries
        .effective(story.frontmatter.max_implementation_retries);
    let mut changes = Vec::new();
    let mut history: Vec<AttemptHistoryEntry> = Vec::new();
    let mut previous_fingerprint: Option<String> = None;
    let mut retry_inputs: Option<RetryPromptInputs> = None;

    for attempt in 1..=max_retries.saturating_add(1) {
        info!(attempt, max_retries, "starting implementation attempt");
        let prompt = match &retry_inputs {
            None => pipeline.prompts.render_implementation(&story)?,
            Some(inputs) => pipeline.prompts.render_retry(&story, inputs)?,
        };
        pipeline.invoke_agent(&format!("{}-implement-{attempt}", story.id()), prompt, None)?;

        let current = pipeline.git.working_tree_fingerprint()?;
        if let Some(previous) = &previous_fingerprint
            && !has_changes_occurred(previous, &current)
        {
            warn!(attempt, "working tree unchanged since previous attempt");
            history.push(record_attempt(
                attempt,
                AttemptOutcome::NoChange,
                "",
                "",
                changed_paths_summary(pipeline.git),
            ));
            changes.push(format!("Attempt {attempt}: {}", AttemptOutcome::NoChange.as_str()));
            write_story(&story)?;
            return Ok(AgentResult::failed(
                story,
                changes,
                format!(
                    "No progress detected: attempt {attempt} left the working tree identical to attempt {}.\n{}\n\n{NO_PROGRESS_REMEDY}",
                    attempt - 1,
                    summarize_history(&history),
                ),
            ));
        }
        previous_fingerprint = Some(current);

        let verification = pipeline.verifier.verify(pipeline.git.workdir())?;
        story.record_verification(&verification);
        if verification.passed() {
            info!(attempt, "verification passed");
            story.frontmatter.implementation_retry_count = 0;
            story.frontmatter.implementation_complete = true;
            write_story(&story)?;
            changes.push(format!("Attempt {attempt}: build and tests passed"));
            let mut result = AgentResult::succeeded(story, changes);
            result.verification = Some(verification);
            return Ok(result);
        }

        let outcome = classify_failure(verification.build_passed, &verification.build_output);
        story.frontmatter.implementation_retry_count += 1;
        story.frontmatter.total_recovery_attempts += 1;
        let entry = record_attempt(
            attempt,
            outcome,
            &verification.build_output,
            &verification.tests_output,
            changed_paths_summary(pipeline.git),
        );
        debug!(outcome = outcome.as_str(), "attempt failed");
        changes.push(format!("Attempt {attempt}: {}", outcome.as_str()));
        history.push(entry);
        write_story(&story)?;

        if history.len() > max_retries as usize {
            let tail = tail_chars(&verification.tests_output, FINAL_OUTPUT_TAIL_CHARS);
            let mut result = AgentResult::failed(
                story,
                changes,
                format!(
                    "Implementation failed after {} attempt(s):\n{}\n\nLast test output:\n{}",
                    history.len(),
                    summarize_history(&history),
                    tail.trim_end()
                ),
            );
            result.verification = Some(verification);
            return Ok(result);
        }

        retry_inputs = Some(retry_prompt_inputs(
            attempt + 1,
            max_retries + 1,
            &verification,
            &history,
        ));
    }

    // Unreachable: the final attempt always returns above.
    Ok(AgentResult::failed(story, changes, "No implementation attempts were made"))
}

fn retry_prompt_inputs(
    attempt: u32,
    max_attempts: u32,
    verification: &VerificationResult,
    history: &[AttemptHistoryEntry],
) -> RetryPromptInputs {
    let outcome = classify_failure(verification.build_passed, &verification.build_output);
    let combined = format!("{}\n{}", verification.build_output, verification.tests_output);
    let compiler = classify_compiler_errors(&verification.build_output);
    RetryPromptInputs {
        attempt,
        max_attempts,
        outcome: outcome.as_str().to_string(),
        build_output: if verification.build_passed {
            String::new()
        } else {
            prepare_for_prompt(&verification.build_output, MAX_PROMPT_OUTPUT_CHARS)
        },
        test_output: if verification.build_passed && !verification.tests_passed {
            prepare_for_prompt(&verification.tests_output, MAX_PROMPT_OUTPUT_CHARS)
        } else {
            String::new()
        },
        dependency_guidance: missing_dependency_guidance(&detect_missing_dependencies(&combined)),
        source_errors: compiler.source,
        cascading_errors: compiler.cascading,
        history_section: recent_history_section(history),
    }
}

/// Short description of the uncommitted paths, for attempt history.
fn changed_paths_summary(git: &Git) -> String {
    match git.status_porcelain() {
        Ok(entries) => summarize_paths(&entries),
        Err(err) => {
            debug!(err = %err, "status unavailable for attempt summary");
            String::new()
        }
    }
}

fn summarize_paths(entries: &[StatusEntry]) -> String {
    if entries.is_empty() {
        return "no uncommitted changes".to_string();
    }
    let shown: Vec<&str> = entries
        .iter()
        .take(CHANGED_PATHS_SHOWN)
        .map(|entry| entry.path.as_str())
        .collect();
    let mut summary = format!("{} file(s): {}", entries.len(), shown.join(", "));
    if entries.len() > CHANGED_PATHS_SHOWN {
        summary.push_str(", ...");
    }
    summary
}
