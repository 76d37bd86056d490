//! Shared wiring for the pipeline entry points and their result contract.

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::review_rules::PerspectiveResults;
use crate::core::sanitize::sanitize_error_message;
use crate::core::types::{Decision, ReviewIssue, ReviewSeverity, TddTestCycle};
use crate::io::agent::{AgentClient, AgentRequest};
use crate::io::config::ResolvedConfig;
use crate::io::git::Git;
use crate::io::prompt::PromptEngine;
use crate::io::story::Story;
use crate::io::verify::{TestRunner, VerificationResult, Verifier};

/// Collaborators one pipeline run needs. Borrowed so tests can inject fakes.
pub struct Pipeline<'a> {
    pub git: &'a Git,
    pub agent: &'a dyn AgentClient,
    pub test_runner: &'a dyn TestRunner,
    pub verifier: &'a dyn Verifier,
    pub config: &'a ResolvedConfig,
    pub prompts: PromptEngine,
    /// Agent stdout is streamed to `<progress_dir>/<label>.log` when set.
    pub progress_dir: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        git: &'a Git,
        agent: &'a dyn AgentClient,
        test_runner: &'a dyn TestRunner,
        verifier: &'a dyn Verifier,
        config: &'a ResolvedConfig,
    ) -> Self {
        Self {
            git,
            agent,
            test_runner,
            verifier,
            config,
            prompts: PromptEngine::new(),
            progress_dir: None,
        }
    }

    pub fn with_progress_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.progress_dir = Some(dir.into());
        self
    }

    /// Invoke the agent in the working directory.
    #[instrument(skip_all, fields(label))]
    pub(crate) fn invoke_agent(
        &self,
        label: &str,
        prompt: String,
        system_prompt: Option<String>,
    ) -> Result<String> {
        let request = AgentRequest {
            prompt,
            system_prompt,
            workdir: self.git.workdir().to_path_buf(),
            stream_path: self
                .progress_dir
                .as_ref()
                .map(|dir| dir.join(format!("{label}.log"))),
        };
        let transcript = self.agent.invoke(&request)?;
        debug!(bytes = transcript.len(), "agent returned");
        Ok(transcript)
    }
}

/// Result of the TDD and implementation entry points.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub success: bool,
    pub story: Story,
    /// Human-readable record of what happened, in order.
    pub changes_made: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tdd_cycles: Vec<TddTestCycle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl AgentResult {
    pub fn succeeded(story: Story, changes_made: Vec<String>) -> Self {
        Self {
            success: true,
            story,
            changes_made,
            error: None,
            tdd_cycles: Vec::new(),
            verification: None,
        }
    }

    pub fn failed(story: Story, changes_made: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            story,
            changes_made,
            error: Some(error.into()),
            tdd_cycles: Vec::new(),
            verification: None,
        }
    }
}

/// Result of the review pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    /// True iff the decision is `APPROVED`.
    pub success: bool,
    pub story: Story,
    pub changes_made: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub passed: bool,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<ReviewSeverity>,
    pub issues: Vec<ReviewIssue>,
    pub feedback: String,
    pub perspectives: PerspectiveResults,
}

/// Render an infrastructure error for the result contract: no absolute paths,
/// no home directory, at most three lines.
pub(crate) fn sanitized_error(err: &anyhow::Error) -> String {
    let home = env::var("HOME").ok().filter(|home| !home.is_empty());
    sanitize_error_message(&format!("{err:#}"), home.as_deref())
}
