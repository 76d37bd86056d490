//! Non-TDD implementation loop: stall detection, retries and exhaustion.

use sdlc::implement::run_implementation;
use sdlc::io::config::ResolvedConfig;
use sdlc::io::story::load_story;
use sdlc::pipeline::Pipeline;
use sdlc::test_support::{
    ScriptedAgent, ScriptedTestRunner, ScriptedTurn, ScriptedVerifier, TestRepo,
    verification_build_failed, verification_tests_failed,
};

const STORY_PATH: &str = ".ai-sdlc/stories/S-2.md";
const STORY: &str = "---\nid: S-2\ntitle: Discounts\n---\n\n# Discounts\n\n## Acceptance Criteria\n\n- [ ] applies percentage discounts\n";

/// Identical fingerprints across attempts abort without a second verification.
#[test]
fn unchanged_working_tree_is_no_progress() {
    let repo = TestRepo::new().expect("repo");
    let story_path = repo.write_file(STORY_PATH, STORY).expect("story");
    let git = repo.git().expect("git");
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("first try").writing("src/discount.rs", "pub fn apply() {}\n"),
        ScriptedTurn::reply("I believe it is fixed now."),
    ]);
    let runner = ScriptedTestRunner::always(true);
    let verifier = ScriptedVerifier::new(vec![verification_tests_failed(
        "test discount ... FAILED\nTests: 1 failed, 2 passed",
    )]);
    let config = ResolvedConfig::default();
    let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

    let result = run_implementation(&pipeline, load_story(&story_path).expect("load"));

    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.contains("No progress detected"));
    assert!(error.contains("Attempt 2: 0 test failure(s), 0 build error(s) - [no file changes]"));
    assert!(error.contains("Suggested remedy: make concrete file edits"));
    assert!(error.contains("can write to the working tree"));
    assert!(result.changes_made.iter().any(|change| change == "Attempt 2: no_change"));
    assert_eq!(agent.calls(), 2);
    assert_eq!(verifier.calls(), 1);
    let persisted = load_story(&story_path).expect("reload");
    assert_eq!(persisted.frontmatter.implementation_retry_count, 1);
}

/// A build failure feeds the retry prompt; the second attempt passes and resets the counter.
#[test]
fn build_failure_then_success() {
    let repo = TestRepo::new().expect("repo");
    let story_path = repo.write_file(STORY_PATH, STORY).expect("story");
    let git = repo.git().expect("git");
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("draft").writing("src/discount.rs", "pub fn apply() { x }\n"),
        ScriptedTurn::reply("fixed").writing("src/discount.rs", "pub fn apply() {}\n"),
    ]);
    let runner = ScriptedTestRunner::always(true);
    let verifier = ScriptedVerifier::new(vec![verification_build_failed(
        "error[E0425]: cannot find value `x` in this scope\n --> src/discount.rs:1:18",
    )]);
    let config = ResolvedConfig::default();
    let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

    let result = run_implementation(&pipeline, load_story(&story_path).expect("load"));

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(verifier.calls(), 2);
    assert!(result.verification.expect("verification").passed());

    let prompts = agent.prompts();
    assert_eq!(prompts.len(), 2);
    let retry = &prompts[1];
    assert!(retry.contains("attempt 2 of 4"));
    assert!(retry.contains("failed_build"));
    assert!(retry.contains("Fix these source errors first"));
    assert!(retry.contains("Attempt 1: 0 test failure(s), 1 build error(s)"));
    assert!(retry.contains("Do not repeat the same fix"));

    let persisted = load_story(&story_path).expect("reload");
    assert_eq!(persisted.frontmatter.implementation_retry_count, 0);
    assert_eq!(persisted.frontmatter.total_recovery_attempts, 1);
    assert!(persisted.frontmatter.implementation_complete);
    let last_run = persisted.frontmatter.last_test_run.expect("last test run");
    assert!(last_run.passed);
}

/// Every attempt fails: the error summarizes each attempt and carries the test-output tail.
#[test]
fn exhausting_retries_reports_every_attempt() {
    let repo = TestRepo::new().expect("repo");
    let story = STORY.replace("title: Discounts\n", "title: Discounts\nmax_implementation_retries: 1\n");
    let story_path = repo.write_file(STORY_PATH, &story).expect("story");
    let git = repo.git().expect("git");
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("one").writing("src/discount.rs", "pub fn apply() -> u8 { 1 }\n"),
        ScriptedTurn::reply("two").writing("src/discount.rs", "pub fn apply() -> u8 { 2 }\n"),
    ]);
    let runner = ScriptedTestRunner::always(true);
    let failing = verification_tests_failed("FAIL applies percentage discounts\nTests: 1 failed, 4 passed");
    let verifier = ScriptedVerifier::new(vec![failing.clone(), failing]);
    let config = ResolvedConfig::default();
    let pipeline = Pipeline::new(&git, &agent, &runner, &verifier, &config);

    let result = run_implementation(&pipeline, load_story(&story_path).expect("load"));

    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.contains("after 2 attempt(s)"));
    assert!(error.contains("Attempt 1: 1 test failure(s), 0 build error(s) - [test:"));
    assert!(error.contains("Attempt 2:"));
    assert!(error.contains("Last test output:"));
    assert_eq!(agent.calls(), 2);

    let persisted = load_story(&story_path).expect("reload");
    assert_eq!(persisted.frontmatter.implementation_retry_count, 2);
    assert_eq!(persisted.frontmatter.total_recovery_attempts, 2);
    assert!(!persisted.frontmatter.implementation_complete);
}
