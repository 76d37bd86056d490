//! Commit gate: commit only when the full suite passes.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::io::git::Git;
use crate::io::verify::TestRunner;

pub const REASON_NOTHING_TO_COMMIT: &str = "nothing to commit";
pub const REASON_TESTS_FAILED: &str = "tests failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommitOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            committed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Check status, run the full suite, then `add -A` and `commit -m message`.
///
/// Git failures from add/commit propagate to the caller.
#[instrument(skip_all, fields(workdir = %git.workdir().display()))]
pub fn commit_if_all_tests_pass<R: TestRunner + ?Sized>(
    git: &Git,
    message: &str,
    timeout: Duration,
    test_runner: &R,
) -> Result<CommitOutcome> {
    if !git.has_uncommitted_changes()? {
        debug!("nothing to commit");
        return Ok(CommitOutcome::skipped(REASON_NOTHING_TO_COMMIT));
    }
    let run = test_runner.run_full_suite(git.workdir(), timeout)?;
    if !run.passed {
        info!("full suite failed, not committing");
        return Ok(CommitOutcome::skipped(REASON_TESTS_FAILED));
    }
    git.add_all()?;
    git.commit(message)?;
    info!("committed changes");
    Ok(CommitOutcome {
        committed: true,
        reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTestRunner, TestRepo};
    use std::fs;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn clean_tree_short_circuits_without_running_tests() {
        let repo = TestRepo::new().expect("repo");
        let runner = ScriptedTestRunner::always(true);
        let outcome =
            commit_if_all_tests_pass(&repo.git().expect("git"), "msg", TIMEOUT, &runner)
                .expect("commit");
        assert_eq!(outcome, CommitOutcome::skipped(REASON_NOTHING_TO_COMMIT));
        assert_eq!(runner.full_suite_calls(), 0);
    }

    #[test]
    fn failing_suite_leaves_changes_unstaged() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git().expect("git");
        fs::write(repo.path().join("lib.rs"), "pub fn a() {}\n").expect("write");
        let runner = ScriptedTestRunner::always(false);
        let outcome = commit_if_all_tests_pass(&git, "msg", TIMEOUT, &runner).expect("commit");
        assert_eq!(outcome, CommitOutcome::skipped(REASON_TESTS_FAILED));
        let entries = git.status_porcelain().expect("status");
        assert!(entries.iter().all(|entry| entry.is_untracked()));
    }

    /// Verifies a second call right after a commit short-circuits.
    #[test]
    fn commits_then_second_call_is_noop() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git().expect("git");
        fs::write(repo.path().join("lib.rs"), "pub fn a() {}\n").expect("write");
        let runner = ScriptedTestRunner::always(true);

        let message = "feat(S-1): it's \"quoted\" $(not run)";
        let first = commit_if_all_tests_pass(&git, message, TIMEOUT, &runner).expect("commit");
        assert!(first.committed);
        assert_eq!(repo.last_commit_message().expect("log"), message);

        let second = commit_if_all_tests_pass(&git, message, TIMEOUT, &runner).expect("commit");
        assert_eq!(second.reason.as_deref(), Some(REASON_NOTHING_TO_COMMIT));
        assert_eq!(runner.full_suite_calls(), 1);
    }
}
