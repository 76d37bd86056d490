//! Agent client abstraction.
//!
//! The [`AgentClient`] trait decouples the pipeline from the actual coding
//! agent backend. Tests use scripted clients that return predetermined
//! transcripts (and optionally write files) without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ResolvedConfig;
use crate::io::process::{RunOptions, command_from_line, run_command};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Prompt text fed to the agent.
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Progress channel: stdout lines are appended here as they arrive.
    pub stream_path: Option<PathBuf>,
}

/// Abstraction over coding agent backends. Returns the agent's free-text transcript.
pub trait AgentClient {
    fn invoke(&self, request: &AgentRequest) -> Result<String>;
}

/// Agent that spawns the configured CLI with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    pub command: String,
    pub system_prompt_flag: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            command: config.agent_command.clone(),
            system_prompt_flag: config.agent_system_prompt_flag.clone(),
            timeout: config.agent_timeout,
            output_limit_bytes: config.agent_output_limit_bytes,
        }
    }
}

impl AgentClient for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), streaming = request.stream_path.is_some()))]
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let mut cmd = command_from_line(&self.command, &request.workdir)?;
        if let (Some(flag), Some(system_prompt)) = (&self.system_prompt_flag, &request.system_prompt)
        {
            cmd.arg(flag).arg(system_prompt);
        }

        let options = RunOptions {
            stdin: Some(request.prompt.as_bytes()),
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
            stream_path: request.stream_path.clone(),
        };
        let output = run_command(cmd, &options).context("run agent")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "agent failed with status {:?}: {}",
                output.status.code(),
                stderr.lines().last().unwrap_or("").trim()
            ));
        }

        debug!(bytes = output.stdout.len(), "agent completed successfully");
        Ok(output.stdout_text())
    }
}
