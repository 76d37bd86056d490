//! Verification gate and test runners.
//!
//! Build and test commands run as plain subprocesses (argv, no shell) with
//! per-command timeouts. Output is sanitized before it leaves this module.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::extract::is_unknown_test_file;
use crate::core::sanitize::sanitize_output;
use crate::io::config::ResolvedConfig;
use crate::io::process::{RunOptions, command_from_line, run_command, split_command};

pub const BUILD_SKIPPED_NOTICE: &str = "skipped: build failed";
const NOT_CONFIGURED: &str = "not configured";

/// Structured outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub build_passed: bool,
    pub build_output: String,
    pub tests_passed: bool,
    pub tests_output: String,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.build_passed && self.tests_passed
    }
}

/// Timeouts for one verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyTimeouts {
    pub build: Duration,
    pub test: Duration,
}

/// Seam for the verification gate so pipelines can be driven without subprocesses.
pub trait Verifier {
    fn verify(&self, workdir: &Path) -> Result<VerificationResult>;
}

/// Verifier backed by the configured build and test commands.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub timeouts: VerifyTimeouts,
    pub output_limit_bytes: usize,
}

impl CommandVerifier {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            build_command: config.build_command.clone(),
            test_command: config.test_command.clone(),
            timeouts: VerifyTimeouts {
                build: config.build_timeout,
                test: config.test_timeout,
            },
            output_limit_bytes: config.agent_output_limit_bytes,
        }
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, workdir: &Path) -> Result<VerificationResult> {
        verify(
            workdir,
            self.build_command.as_deref(),
            self.test_command.as_deref(),
            self.timeouts,
            self.output_limit_bytes,
        )
    }
}

/// Run the build then the tests. A missing command counts as passed; a
/// failing build skips the tests.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn verify(
    workdir: &Path,
    build_command: Option<&str>,
    test_command: Option<&str>,
    timeouts: VerifyTimeouts,
    output_limit_bytes: usize,
) -> Result<VerificationResult> {
    let (build_passed, build_output) = match build_command {
        Some(command) => run_check("build", command, workdir, timeouts.build, output_limit_bytes)?,
        None => (true, NOT_CONFIGURED.to_string()),
    };
    if !build_passed {
        info!("build failed, skipping tests");
        return Ok(VerificationResult {
            build_passed,
            build_output,
            tests_passed: false,
            tests_output: BUILD_SKIPPED_NOTICE.to_string(),
        });
    }

    let (tests_passed, tests_output) = match test_command {
        Some(command) => run_check("test", command, workdir, timeouts.test, output_limit_bytes)?,
        None => (true, NOT_CONFIGURED.to_string()),
    };
    info!(build_passed, tests_passed, "verification finished");
    Ok(VerificationResult {
        build_passed,
        build_output,
        tests_passed,
        tests_output,
    })
}

/// Outcome of one test-runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    pub output: String,
}

/// Seam for running tests during the TDD protocol and the commit gate.
pub trait TestRunner {
    fn run_full_suite(&self, workdir: &Path, timeout: Duration) -> Result<TestRun>;

    fn run_single_test(
        &self,
        workdir: &Path,
        test_file: &str,
        test_name: &str,
        timeout: Duration,
    ) -> Result<TestRun>;
}

/// Test runner backed by the configured commands.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    pub test_command: Option<String>,
    pub single_test_command: Option<String>,
    pub output_limit_bytes: usize,
}

impl CommandTestRunner {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            test_command: config.test_command.clone(),
            single_test_command: config.single_test_command.clone(),
            output_limit_bytes: config.agent_output_limit_bytes,
        }
    }
}

impl TestRunner for CommandTestRunner {
    fn run_full_suite(&self, workdir: &Path, timeout: Duration) -> Result<TestRun> {
        let Some(command) = &self.test_command else {
            return Ok(TestRun {
                passed: true,
                output: NOT_CONFIGURED.to_string(),
            });
        };
        let (passed, output) = run_check("test", command, workdir, timeout, self.output_limit_bytes)?;
        Ok(TestRun { passed, output })
    }

    fn run_single_test(
        &self,
        workdir: &Path,
        test_file: &str,
        test_name: &str,
        timeout: Duration,
    ) -> Result<TestRun> {
        let Some(template) = &self.single_test_command else {
            debug!("no single-test command configured, running full suite");
            return self.run_full_suite(workdir, timeout);
        };
        if is_unknown_test_file(test_file) {
            warn!("test file unknown, running full suite in place of single test");
            return self.run_full_suite(workdir, timeout);
        }
        let (program, args) = split_command(template)?;
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.replace("{file}", test_file).replace("{name}", test_name))
            .collect();
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        let (passed, output) = run_prepared("single test", cmd, timeout, self.output_limit_bytes);
        Ok(TestRun { passed, output })
    }
}

fn run_check(
    label: &str,
    command: &str,
    workdir: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<(bool, String)> {
    let cmd = command_from_line(command, workdir)?;
    Ok(run_prepared(label, cmd, timeout, output_limit_bytes))
}

/// A command that cannot be spawned is a failed check, not an infrastructure error.
fn run_prepared(
    label: &str,
    cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> (bool, String) {
    let options = RunOptions {
        output_limit_bytes,
        ..RunOptions::with_timeout(timeout)
    };
    match run_command(cmd, &options) {
        Ok(output) => (
            output.success(),
            sanitize_output(&output.combined_text(label)),
        ),
        Err(err) => {
            warn!(label, err = %err, "check could not run");
            (false, sanitize_output(&format!("{label} could not run: {err:#}")))
        }
    }
}
