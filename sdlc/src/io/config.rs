//! Pipeline configuration stored under `.ai-sdlc/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::METADATA_DIR;
use crate::core::review_rules::PassThreshold;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work for a typical project; absent commands count as passing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Build command, split into argv without a shell.
    pub build_command: Option<String>,

    /// Full test suite command.
    pub test_command: Option<String>,

    /// Single-test command. `{file}` and `{name}` are substituted per argument.
    /// When absent, the full suite stands in for the single test.
    pub single_test_command: Option<String>,

    pub timeouts: TimeoutConfig,
    pub tdd: TddConfig,
    pub implementation: RetryConfig,
    pub review: ReviewConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub build_secs: u64,
    pub test_secs: u64,
    pub agent_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_secs: 5 * 60,
            test_secs: 10 * 60,
            agent_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TddConfig {
    /// Default for stories that do not set `tdd_enabled`.
    pub enabled: bool,
    pub max_cycles: u32,
}

impl Default for TddConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cycles: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Hard ceiling that per-story overrides cannot exceed.
    pub max_retries_upper_bound: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retries_upper_bound: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    pub max_retries: u32,
    pub max_retries_upper_bound: u32,
    pub detect_test_antipatterns: bool,
    /// A review passes with at most this many blocker findings.
    pub max_blockers: usize,
    /// A review passes with at most this many critical findings.
    pub max_criticals: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        let threshold = PassThreshold::default();
        Self {
            max_retries: 3,
            max_retries_upper_bound: 10,
            detect_test_antipatterns: true,
            max_blockers: threshold.max_blockers,
            max_criticals: threshold.max_criticals,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI; the prompt is written to its stdin.
    pub command: String,
    /// Flag that precedes the system prompt argument, if the CLI supports one.
    pub system_prompt_flag: Option<String>,
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude --print".to_string(),
            system_prompt_flag: Some("--append-system-prompt".to_string()),
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_command: None,
            test_command: None,
            single_test_command: None,
            timeouts: TimeoutConfig::default(),
            tdd: TddConfig::default(),
            implementation: RetryConfig::default(),
            review: ReviewConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.build_secs == 0
            || self.timeouts.test_secs == 0
            || self.timeouts.agent_secs == 0
        {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.tdd.max_cycles == 0 {
            return Err(anyhow!("tdd.max_cycles must be > 0"));
        }
        if self.implementation.max_retries > self.implementation.max_retries_upper_bound {
            return Err(anyhow!(
                "implementation.max_retries must not exceed implementation.max_retries_upper_bound"
            ));
        }
        if self.review.max_retries > self.review.max_retries_upper_bound {
            return Err(anyhow!(
                "review.max_retries must not exceed review.max_retries_upper_bound"
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must be non-empty"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        shell_words::split(&self.agent.command).context("parse agent.command")?;
        for (name, command) in [
            ("build_command", &self.build_command),
            ("test_command", &self.test_command),
            ("single_test_command", &self.single_test_command),
        ] {
            if let Some(command) = command
                && !command.trim().is_empty()
            {
                shell_words::split(command).with_context(|| format!("parse {name}"))?;
            }
        }
        Ok(())
    }

    /// Resolve into the fully-populated value object passed through the pipeline.
    pub fn resolve(&self) -> ResolvedConfig {
        ResolvedConfig {
            build_command: non_empty(&self.build_command),
            test_command: non_empty(&self.test_command),
            single_test_command: non_empty(&self.single_test_command),
            build_timeout: Duration::from_secs(self.timeouts.build_secs),
            test_timeout: Duration::from_secs(self.timeouts.test_secs),
            agent_timeout: Duration::from_secs(self.timeouts.agent_secs),
            tdd_enabled: self.tdd.enabled,
            max_tdd_cycles: self.tdd.max_cycles,
            implementation_retries: RetryLimits {
                default: self.implementation.max_retries,
                upper_bound: self.implementation.max_retries_upper_bound,
            },
            review_retries: RetryLimits {
                default: self.review.max_retries,
                upper_bound: self.review.max_retries_upper_bound,
            },
            detect_test_antipatterns: self.review.detect_test_antipatterns,
            pass_threshold: PassThreshold {
                max_blockers: self.review.max_blockers,
                max_criticals: self.review.max_criticals,
            },
            agent_command: self.agent.command.clone(),
            agent_system_prompt_flag: non_empty(&self.agent.system_prompt_flag),
            agent_output_limit_bytes: self.agent.output_limit_bytes,
        }
    }
}

/// Default retry count plus the ceiling no story override may exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub default: u32,
    pub upper_bound: u32,
}

impl RetryLimits {
    /// `min(story override or default, upper bound)`.
    pub fn effective(&self, story_override: Option<u32>) -> u32 {
        story_override
            .unwrap_or(self.default)
            .min(self.upper_bound)
    }
}

/// Configuration resolved once at the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub single_test_command: Option<String>,
    pub build_timeout: Duration,
    pub test_timeout: Duration,
    pub agent_timeout: Duration,
    pub tdd_enabled: bool,
    pub max_tdd_cycles: u32,
    pub implementation_retries: RetryLimits,
    pub review_retries: RetryLimits,
    pub detect_test_antipatterns: bool,
    pub pass_threshold: PassThreshold,
    pub agent_command: String,
    pub agent_system_prompt_flag: Option<String>,
    pub agent_output_limit_bytes: usize,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        PipelineConfig::default().resolve()
    }
}

/// `<root>/.ai-sdlc/config.toml`.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join(CONFIG_FILE_NAME)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
