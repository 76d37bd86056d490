//! Test-only fakes for the pipeline seams and a throwaway git repository.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::classifier::METADATA_DIR;
use crate::io::agent::{AgentClient, AgentRequest};
use crate::io::git::Git;
use crate::io::verify::{BUILD_SKIPPED_NOTICE, TestRun, TestRunner, VerificationResult, Verifier};

/// One scripted agent turn: a transcript plus files written before returning.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub transcript: String,
    /// Paths relative to the request's working directory.
    pub writes: Vec<(String, String)>,
}

impl ScriptedTurn {
    pub fn reply(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            writes: Vec::new(),
        }
    }

    pub fn writing(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((path.to_string(), contents.to_string()));
        self
    }
}

/// Agent that replays queued turns and records every request.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    turns: RefCell<VecDeque<ScriptedTurn>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Turns that only return text.
    pub fn replies(transcripts: &[&str]) -> Self {
        Self::new(transcripts.iter().map(|t| ScriptedTurn::reply(t)).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub fn system_prompts(&self) -> Vec<Option<String>> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.system_prompt.clone())
            .collect()
    }
}

impl AgentClient for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no turns left"))?;
        for (path, contents) in &turn.writes {
            let full = request.workdir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&full, contents).with_context(|| format!("write {}", full.display()))?;
        }
        Ok(turn.transcript)
    }
}

/// Test runner with queued pass/fail results. Exhausted queues return the default.
#[derive(Debug)]
pub struct ScriptedTestRunner {
    single: RefCell<VecDeque<bool>>,
    full: RefCell<VecDeque<bool>>,
    default: bool,
    single_calls: Cell<usize>,
    full_calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn always(passed: bool) -> Self {
        Self {
            single: RefCell::new(VecDeque::new()),
            full: RefCell::new(VecDeque::new()),
            default: passed,
            single_calls: Cell::new(0),
            full_calls: Cell::new(0),
        }
    }

    /// Queued single-test and full-suite results, passing once exhausted.
    pub fn scripted(single: Vec<bool>, full: Vec<bool>) -> Self {
        Self {
            single: RefCell::new(single.into()),
            full: RefCell::new(full.into()),
            ..Self::always(true)
        }
    }

    pub fn single_test_calls(&self) -> usize {
        self.single_calls.get()
    }

    pub fn full_suite_calls(&self) -> usize {
        self.full_calls.get()
    }

    fn run(passed: bool, label: &str) -> TestRun {
        TestRun {
            passed,
            output: if passed {
                format!("{label}: ok")
            } else {
                format!("{label}: FAILED\nTests: 1 failed, 0 passed")
            },
        }
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run_full_suite(&self, _workdir: &Path, _timeout: Duration) -> Result<TestRun> {
        self.full_calls.set(self.full_calls.get() + 1);
        let passed = self.full.borrow_mut().pop_front().unwrap_or(self.default);
        Ok(Self::run(passed, "full suite"))
    }

    fn run_single_test(
        &self,
        _workdir: &Path,
        _test_file: &str,
        test_name: &str,
        _timeout: Duration,
    ) -> Result<TestRun> {
        self.single_calls.set(self.single_calls.get() + 1);
        let passed = self.single.borrow_mut().pop_front().unwrap_or(self.default);
        Ok(Self::run(passed, test_name))
    }
}

/// Verifier with queued results, passing once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    results: RefCell<VecDeque<VerificationResult>>,
    calls: Cell<usize>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, _workdir: &Path) -> Result<VerificationResult> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(verification_passed))
    }
}

pub fn verification_passed() -> VerificationResult {
    VerificationResult {
        build_passed: true,
        build_output: "build ok".to_string(),
        tests_passed: true,
        tests_output: "Tests: 3 passed, 3 total".to_string(),
    }
}

pub fn verification_build_failed(output: &str) -> VerificationResult {
    VerificationResult {
        build_passed: false,
        build_output: output.to_string(),
        tests_passed: false,
        tests_output: BUILD_SKIPPED_NOTICE.to_string(),
    }
}

pub fn verification_tests_failed(output: &str) -> VerificationResult {
    VerificationResult {
        build_passed: true,
        build_output: "build ok".to_string(),
        tests_passed: false,
        tests_output: output.to_string(),
    }
}

/// Temporary git repository on a `main` branch with one initial commit.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { temp };
        repo.git_cmd(&["init"])?;
        repo.git_cmd(&["config", "user.email", "test@example.com"])?;
        repo.git_cmd(&["config", "user.name", "test"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README.md")?;
        repo.git_cmd(&["add", "README.md"])?;
        repo.git_cmd(&["commit", "-m", "chore: init"])?;
        repo.git_cmd(&["branch", "-M", "main"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn git(&self) -> Result<Git> {
        Git::open(self.path())
    }

    pub fn checkout_new_branch(&self, name: &str) -> Result<()> {
        self.git_cmd(&["checkout", "-b", name])
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write `.ai-sdlc/stories/<id>.md`.
    pub fn write_story(&self, id: &str, contents: &str) -> Result<PathBuf> {
        self.write_file(&format!("{METADATA_DIR}/stories/{id}.md"), contents)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git_cmd(&["add", "-A"])?;
        self.git_cmd(&["commit", "-m", message])
    }

    pub fn last_commit_message(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["log", "-1", "--format=%B"])
            .current_dir(self.path())
            .output()
            .context("git log")?;
        if !output.status.success() {
            bail!("git log failed");
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    pub fn commit_count(&self) -> Result<usize> {
        let output = Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .current_dir(self.path())
            .output()
            .context("git rev-list")?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .context("parse commit count")
    }

    fn git_cmd(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("git {}", args.join(" ")))?;
        if !status.success() {
            bail!("git {} failed", args.join(" "));
        }
        Ok(())
    }
}
