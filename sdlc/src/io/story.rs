//! Story documents: markdown with YAML frontmatter.
//!
//! The frontmatter carries the pipeline's persistent state (counters, flags,
//! TDD and review history). Keys this crate does not know about are kept
//! verbatim so other tools can share the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::failure::count_test_failures;
use crate::core::types::{ContentType, ReviewAttempt, TddTestCycle};
use crate::io::config::write_atomic;
use crate::io::verify::VerificationResult;

pub const MAX_TDD_HISTORY: usize = 100;
pub const MAX_REVIEW_HISTORY: usize = 10;

/// Summary of the most recent verification, persisted on the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub passed: bool,
    pub build_passed: bool,
    pub test_failures: usize,
    pub timestamp: DateTime<Utc>,
}

/// Known frontmatter fields. Unknown keys land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryFrontmatter {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_source_changes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tdd_enabled: Option<bool>,
    pub research_complete: bool,
    pub plan_complete: bool,
    pub implementation_complete: bool,
    pub reviews_complete: bool,
    pub implementation_retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_implementation_retries: Option<u32>,
    /// Review retry counter.
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub total_recovery_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_restart_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test_run: Option<TestRunSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tdd_test_history: Vec<TddTestCycle>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review_history: Vec<ReviewAttempt>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A parsed story document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Story {
    pub path: PathBuf,
    pub frontmatter: StoryFrontmatter,
    /// Markdown body after the frontmatter.
    #[serde(skip)]
    pub content: String,
}

impl Story {
    /// Frontmatter title, else the first `# ` heading, else the id.
    pub fn title(&self) -> String {
        if !self.frontmatter.title.trim().is_empty() {
            return self.frontmatter.title.clone();
        }
        self.content
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|title| title.trim().to_string())
            .unwrap_or_else(|| self.id())
    }

    /// Frontmatter id, else the file stem.
    pub fn id(&self) -> String {
        if !self.frontmatter.id.trim().is_empty() {
            return self.frontmatter.id.clone();
        }
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn tdd_enabled(&self, config_default: bool) -> bool {
        self.frontmatter.tdd_enabled.unwrap_or(config_default)
    }

    /// Append a completed cycle, evicting the oldest beyond [`MAX_TDD_HISTORY`].
    pub fn push_tdd_cycle(&mut self, cycle: TddTestCycle) {
        let history = &mut self.frontmatter.tdd_test_history;
        history.push(cycle);
        if history.len() > MAX_TDD_HISTORY {
            let excess = history.len() - MAX_TDD_HISTORY;
            history.drain(..excess);
        }
    }

    /// Append a review attempt, evicting the oldest beyond [`MAX_REVIEW_HISTORY`].
    pub fn append_review_history(&mut self, attempt: ReviewAttempt) {
        let history = &mut self.frontmatter.review_history;
        history.push(attempt);
        if history.len() > MAX_REVIEW_HISTORY {
            let excess = history.len() - MAX_REVIEW_HISTORY;
            history.drain(..excess);
        }
    }

    /// Persist the latest verification outcome on the story.
    pub fn record_verification(&mut self, result: &VerificationResult) {
        let test_failures = if result.tests_passed {
            0
        } else {
            count_test_failures(&result.tests_output)
        };
        self.frontmatter.last_test_run = Some(TestRunSummary {
            passed: result.passed(),
            build_passed: result.build_passed,
            test_failures,
            timestamp: Utc::now(),
        });
    }

    /// Append `text` to the end of the `## {section}` section, creating it if needed.
    pub fn append_to_section(&mut self, section: &str, text: &str) {
        let lines: Vec<&str> = self.content.lines().collect();
        let start = lines.iter().position(|line| {
            let trimmed = line.trim();
            trimmed.starts_with("## ") && trimmed[3..].trim().eq_ignore_ascii_case(section)
        });
        let Some(start) = start else {
            let mut content = self.content.trim_end().to_string();
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&format!("## {section}\n\n{}\n", text.trim_end()));
            self.content = content;
            return;
        };
        let end = lines[start + 1..]
            .iter()
            .position(|line| {
                let trimmed = line.trim_start();
                trimmed.starts_with("# ") || trimmed.starts_with("## ")
            })
            .map_or(lines.len(), |offset| start + 1 + offset);

        let mut section_lines: Vec<String> =
            lines[..end].iter().map(|line| (*line).to_string()).collect();
        while section_lines.len() > start + 1
            && section_lines.last().is_some_and(|line| line.trim().is_empty())
        {
            section_lines.pop();
        }
        let continues_list = text.trim_start().starts_with("- ")
            && section_lines
                .last()
                .is_some_and(|line| line.trim_start().starts_with("- "));
        if !continues_list {
            section_lines.push(String::new());
        }
        section_lines.extend(text.trim_end().lines().map(str::to_string));
        if end < lines.len() {
            section_lines.push(String::new());
            section_lines.extend(lines[end..].iter().map(|line| (*line).to_string()));
        }
        let mut content = section_lines.join("\n");
        content.push('\n');
        self.content = content;
    }
}

/// Parse a story document from disk.
pub fn load_story(path: &Path) -> Result<Story> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read story {}", path.display()))?;
    parse_story(path, &contents)
}

/// Parse story text; documents without frontmatter get default state.
pub fn parse_story(path: &Path, contents: &str) -> Result<Story> {
    let (frontmatter, content) = match split_frontmatter(contents) {
        Some((raw, rest)) if raw.trim().is_empty() => (StoryFrontmatter::default(), rest),
        Some((raw, rest)) => (
            serde_yaml::from_str(raw)
                .with_context(|| format!("parse frontmatter {}", path.display()))?,
            rest,
        ),
        None => (StoryFrontmatter::default(), contents),
    };
    Ok(Story {
        path: path.to_path_buf(),
        frontmatter,
        content: content.trim_start_matches('\n').to_string(),
    })
}

/// Render a story back to markdown with frontmatter.
pub fn render_story(story: &Story) -> Result<String> {
    let frontmatter =
        serde_yaml::to_string(&story.frontmatter).context("serialize story frontmatter")?;
    let mut buf = String::new();
    buf.push_str("---\n");
    buf.push_str(frontmatter.trim_end());
    buf.push('\n');
    buf.push_str("---\n\n");
    buf.push_str(story.content.trim_start_matches('\n'));
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}

/// Atomically write the story to its path.
pub fn write_story(story: &Story) -> Result<()> {
    let rendered = render_story(story)?;
    write_atomic(&story.path, &rendered)
        .with_context(|| format!("write story {}", story.path.display()))
}

/// Split a document into (frontmatter, rest). Returns None if it doesn't look like frontmatter.
fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    let after = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))?;
    if let Some(rest) = after.strip_prefix("---\n") {
        return Some(("", rest));
    }
    let end = after.find("\n---\n").or_else(|| {
        after
            .ends_with("\n---")
            .then(|| after.len() - "\n---".len())
    })?;
    let frontmatter = &after[..end];
    let rest = after.get(end + "\n---\n".len()..).unwrap_or("");
    Some((frontmatter, rest))
}
