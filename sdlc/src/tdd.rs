//! TDD cycle engine: one RED → GREEN → REFACTOR cycle per acceptance criterion.
//!
//! Each phase is a single agent invocation followed by a postcondition on the
//! test suite. A failed postcondition is a protocol violation and ends the
//! whole loop; it is never retried.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::acceptance::{check_ac_coverage, first_unchecked_criterion};
use crate::core::extract::{extract_test_file, extract_test_name};
use crate::core::sanitize::{MAX_PROMPT_OUTPUT_CHARS, prepare_for_prompt, truncate_test_output};
use crate::core::types::{TddPhase, TddPhaseResult, TddTestCycle, TddViolation};
use crate::io::commit::commit_if_all_tests_pass;
use crate::io::story::{Story, load_story, write_story};
use crate::pipeline::{AgentResult, Pipeline, sanitized_error};

/// What must hold once a phase's agent call returns.
#[derive(Debug, Clone, Copy)]
enum Postcondition<'t> {
    /// The test named in the transcript exists and fails.
    NewTestFails,
    /// The cycle's test passes and so does the full suite.
    TestAndSuitePass { test_file: &'t str, test_name: &'t str },
    /// The full suite still passes.
    SuitePasses { test_file: &'t str, test_name: &'t str },
}

/// Drive TDD cycles until every acceptance criterion is checked off.
///
/// Infrastructure errors are folded into a failed result with a sanitized
/// message so callers always receive the result contract.
pub fn run_tdd_implementation(pipeline: &Pipeline<'_>, story: Story) -> AgentResult {
    let fallback = story.clone();
    match tdd_loop(pipeline, story) {
        Ok(result) => result,
        Err(err) => {
            warn!(err = %err, "tdd implementation aborted");
            AgentResult::failed(fallback, Vec::new(), sanitized_error(&err))
        }
    }
}

#[instrument(skip_all, fields(story = %story.id()))]
fn tdd_loop(pipeline: &Pipeline<'_>, mut story: Story) -> Result<AgentResult> {
    let mut changes = Vec::new();
    let mut cycles = Vec::new();

    if check_ac_coverage(&story.content) {
        info!("acceptance criteria already covered");
        story.frontmatter.implementation_complete = true;
        write_story(&story)?;
        changes.push("All acceptance criteria already covered".to_string());
        return Ok(AgentResult::succeeded(story, changes));
    }

    let max_cycles = pipeline.config.max_tdd_cycles;
    for _ in 0..max_cycles {
        let cycle_number = u32::try_from(story.frontmatter.tdd_test_history.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let criterion = first_unchecked_criterion(&story.content).unwrap_or_default();
        info!(cycle_number, criterion = %criterion, "starting tdd cycle");

        let cycle = match run_cycle(pipeline, &story, cycle_number, &criterion, &mut changes)? {
            Ok(cycle) => cycle,
            Err(violation) => {
                warn!(%violation, "tdd protocol violated");
                let mut result = AgentResult::failed(story, changes, violation.to_string());
                result.tdd_cycles = cycles;
                return Ok(result);
            }
        };

        let message = format!(
            "feat({}): TDD cycle {} - {}",
            story.id(),
            cycle_number,
            cycle.test_name
        );
        match commit_if_all_tests_pass(
            pipeline.git,
            &message,
            pipeline.config.test_timeout,
            pipeline.test_runner,
        ) {
            Ok(outcome) if outcome.committed => {
                changes.push(format!("Committed TDD cycle {cycle_number}"));
            }
            Ok(outcome) => {
                let reason = outcome.reason.unwrap_or_default();
                debug!(%reason, "cycle not committed");
                changes.push(format!("TDD cycle {cycle_number} not committed: {reason}"));
            }
            Err(err) => {
                warn!(err = %err, "commit after tdd cycle failed");
                changes.push(format!(
                    "Warning: commit after TDD cycle {cycle_number} failed: {}",
                    sanitized_error(&err)
                ));
            }
        }

        // The agent may have checked off criteria in the story file during the cycle.
        story = load_story(&story.path)?;
        story.push_tdd_cycle(cycle.clone());
        write_story(&story)?;
        cycles.push(cycle);
        story = load_story(&story.path)?;

        if check_ac_coverage(&story.content) {
            info!(cycles = cycles.len(), "all acceptance criteria covered");
            story.frontmatter.implementation_complete = true;
            write_story(&story)?;
            let mut result = AgentResult::succeeded(story, changes);
            result.tdd_cycles = cycles;
            return Ok(result);
        }
    }

    let mut result = AgentResult::failed(
        story,
        changes,
        format!(
            "Maximum TDD cycles ({max_cycles}) reached without covering all acceptance criteria"
        ),
    );
    result.tdd_cycles = cycles;
    Ok(result)
}

/// One full cycle. The inner `Err` is a protocol violation; the outer one is
/// infrastructure.
fn run_cycle(
    pipeline: &Pipeline<'_>,
    story: &Story,
    cycle_number: u32,
    criterion: &str,
    changes: &mut Vec<String>,
) -> Result<Result<TddTestCycle, TddViolation>> {
    let prompt = pipeline.prompts.render_red(story, cycle_number, criterion)?;
    let red = match execute_phase(
        pipeline,
        story,
        TddPhase::Red,
        cycle_number,
        prompt,
        Postcondition::NewTestFails,
    )? {
        Ok(red) => red,
        Err(violation) => return Ok(Err(violation)),
    };
    changes.push(format!(
        "RED: wrote failing test `{}` in {}",
        red.test_name, red.test_file
    ));

    let prompt = pipeline.prompts.render_green(
        story,
        cycle_number,
        &red.test_file,
        &red.test_name,
        &prepare_for_prompt(&red.output, MAX_PROMPT_OUTPUT_CHARS),
    )?;
    let green = match execute_phase(
        pipeline,
        story,
        TddPhase::Green,
        cycle_number,
        prompt,
        Postcondition::TestAndSuitePass {
            test_file: &red.test_file,
            test_name: &red.test_name,
        },
    )? {
        Ok(green) => green,
        Err(violation) => return Ok(Err(violation)),
    };
    changes.push(format!("GREEN: `{}` passes with the full suite", red.test_name));

    let prompt =
        pipeline
            .prompts
            .render_refactor(story, cycle_number, &red.test_file, &red.test_name)?;
    let refactor = match execute_phase(
        pipeline,
        story,
        TddPhase::Refactor,
        cycle_number,
        prompt,
        Postcondition::SuitePasses {
            test_file: &red.test_file,
            test_name: &red.test_name,
        },
    )? {
        Ok(refactor) => refactor,
        Err(violation) => return Ok(Err(violation)),
    };
    changes.push("REFACTOR: full suite still passes".to_string());

    Ok(Ok(TddTestCycle {
        cycle_number,
        test_name: red.test_name,
        test_file: red.test_file,
        red_timestamp: red.timestamp,
        green_timestamp: Some(green.timestamp),
        refactor_timestamp: Some(refactor.timestamp),
        test_output_red: bounded(&red.output),
        test_output_green: Some(bounded(&green.output)),
        all_tests_green: refactor.success,
    }))
}

/// Invoke the agent for one phase, then check the phase's postcondition.
#[instrument(skip_all, fields(phase = %phase, cycle_number))]
fn execute_phase(
    pipeline: &Pipeline<'_>,
    story: &Story,
    phase: TddPhase,
    cycle_number: u32,
    prompt: String,
    postcondition: Postcondition<'_>,
) -> Result<Result<TddPhaseResult, TddViolation>> {
    let label = format!(
        "{}-tdd-{}-{}",
        story.id(),
        cycle_number,
        phase.label().to_ascii_lowercase()
    );
    let transcript = pipeline.invoke_agent(&label, prompt, None)?;
    let workdir = pipeline.git.workdir();
    let timeout = pipeline.config.test_timeout;
    let runner = pipeline.test_runner;

    let (test_file, test_name, output, violation) = match postcondition {
        Postcondition::NewTestFails => {
            let test_file = extract_test_file(&transcript);
            let test_name = extract_test_name(&transcript);
            let run = runner.run_single_test(workdir, &test_file, &test_name, timeout)?;
            let violation = run.passed.then(|| {
                format!("test `{test_name}` passed before any implementation; it must fail first")
            });
            (test_file, test_name, run.output, violation)
        }
        Postcondition::TestAndSuitePass {
            test_file,
            test_name,
        } => {
            let single = runner.run_single_test(workdir, test_file, test_name, timeout)?;
            if !single.passed {
                let detail = format!("test `{test_name}` still fails after implementation");
                (test_file.to_string(), test_name.to_string(), single.output, Some(detail))
            } else {
                let suite = runner.run_full_suite(workdir, timeout)?;
                let violation = (!suite.passed)
                    .then(|| "introduced regressions: the full test suite fails".to_string());
                (test_file.to_string(), test_name.to_string(), suite.output, violation)
            }
        }
        Postcondition::SuitePasses {
            test_file,
            test_name,
        } => {
            let suite = runner.run_full_suite(workdir, timeout)?;
            let violation = (!suite.passed)
                .then(|| "broke the full test suite while refactoring".to_string());
            (test_file.to_string(), test_name.to_string(), suite.output, violation)
        }
    };

    if let Some(detail) = violation {
        return Ok(Err(TddViolation { phase, detail }));
    }
    debug!(test_file = %test_file, test_name = %test_name, "phase postcondition held");
    Ok(Ok(TddPhaseResult {
        test_name,
        test_file,
        timestamp: Utc::now(),
        output,
        success: true,
    }))
}

fn bounded(output: &str) -> String {
    truncate_test_output(output, MAX_PROMPT_OUTPUT_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ResolvedConfig;
    use crate::test_support::{ScriptedAgent, ScriptedTestRunner, ScriptedVerifier, TestRepo};

    const STORY: &str = "---\nid: S-7\ntitle: Totals\n---\n\n# Totals\n\n## Acceptance Criteria\n\n- [ ] sums line items\n";

    /// Verifies a test that passes during RED aborts the loop before GREEN runs.
    #[test]
    fn red_phase_passing_test_is_a_violation() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo.write_story("S-7", STORY).expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&["Test file: tests/totals.rs\nTest name: sums_line_items"]);
        let runner = ScriptedTestRunner::scripted(vec![true], vec![]);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig::default();
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        assert!(!result.success);
        let error = result.error.expect("error");
        assert!(error.contains("TDD Violation"));
        assert!(error.contains("RED phase"));
        assert_eq!(agent.calls(), 1);
        assert_eq!(runner.full_suite_calls(), 0);
    }

    #[test]
    fn covered_story_succeeds_without_agent_calls() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo
            .write_story("S-8", "# Done\n\n## Acceptance Criteria\n\n- [x] shipped\n")
            .expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&[]);
        let runner = ScriptedTestRunner::always(true);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig::default();
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        assert!(result.success);
        assert!(result.tdd_cycles.is_empty());
        assert!(result.story.frontmatter.implementation_complete);
        assert_eq!(agent.calls(), 0);
    }

    /// Verifies a GREEN regression in the full suite is reported as a GREEN violation.
    #[test]
    fn green_regression_is_a_violation() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo.write_story("S-7", STORY).expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&[
            "Test file: tests/totals.rs\nTest name: sums_line_items",
            "implemented",
        ]);
        // RED fails, GREEN single passes, GREEN full suite fails.
        let runner = ScriptedTestRunner::scripted(vec![false, true], vec![false]);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig::default();
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        let error = result.error.expect("error");
        assert!(error.starts_with("TDD Violation: GREEN phase"));
        assert!(error.contains("regressions"));
        assert_eq!(agent.calls(), 2);
    }

    #[test]
    fn green_single_test_still_failing_is_a_violation() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo.write_story("S-7", STORY).expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&[
            "Test file: tests/totals.rs\nTest name: sums_line_items",
            "implemented",
            "refactored",
        ]);
        // RED fails as required, then the same test still fails after GREEN.
        let runner = ScriptedTestRunner::scripted(vec![false, false], vec![]);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig::default();
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        assert!(!result.success);
        let error = result.error.expect("error");
        assert!(error.starts_with("TDD Violation: GREEN phase"));
        assert!(error.contains("still fails after implementation"));
        assert_eq!(agent.calls(), 2);
        assert_eq!(runner.full_suite_calls(), 0);
        assert!(result.tdd_cycles.is_empty());
    }

    /// Verifies a REFACTOR that breaks the suite aborts before the cycle is committed.
    #[test]
    fn refactor_breaking_suite_is_a_violation() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo.write_story("S-7", STORY).expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&[
            "Test file: tests/totals.rs\nTest name: sums_line_items",
            "implemented",
            "refactored",
            "next red",
        ]);
        // GREEN suite passes, REFACTOR suite fails.
        let runner = ScriptedTestRunner::scripted(vec![false, true], vec![true, false]);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig::default();
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        assert!(!result.success);
        let error = result.error.expect("error");
        assert!(error.starts_with("TDD Violation: REFACTOR phase"));
        assert!(error.contains("broke the full test suite while refactoring"));
        assert_eq!(agent.calls(), 3);
        assert_eq!(runner.full_suite_calls(), 2);
        assert_eq!(repo.commit_count().expect("count"), 1);
        let persisted = load_story(&story_path).expect("reload");
        assert!(persisted.frontmatter.tdd_test_history.is_empty());
    }

    #[test]
    fn stops_after_max_cycles_when_criteria_stay_unchecked() {
        let repo = TestRepo::new().expect("repo");
        let story_path = repo.write_story("S-7", STORY).expect("story");
        let git = repo.git().expect("git");
        let agent = ScriptedAgent::replies(&[
            "Test file: tests/totals.rs\nTest name: sums_line_items",
            "green",
            "refactored",
        ]);
        let runner = ScriptedTestRunner::scripted(vec![false], vec![]);
        let verifier = ScriptedVerifier::passing();
        let config = ResolvedConfig {
            max_tdd_cycles: 1,
            ..ResolvedConfig::default()
        };
        let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

        let result = run_tdd_implementation(&pipeline, load_story(&story_path).expect("load"));

        assert!(!result.success);
        assert!(result.error.expect("error").contains("Maximum TDD cycles (1)"));
        assert_eq!(result.tdd_cycles.len(), 1);
        let persisted = load_story(&story_path).expect("reload");
        assert_eq!(persisted.frontmatter.tdd_test_history.len(), 1);
        assert!(!persisted.frontmatter.implementation_complete);
    }
}
