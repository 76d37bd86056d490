//! Prompt rendering for every agent call the pipeline makes.
//!
//! Templates are embedded at compile time and never change at runtime.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::io::story::Story;

const TDD_RED_TEMPLATE: &str = include_str!("prompts/tdd_red.md");
const TDD_GREEN_TEMPLATE: &str = include_str!("prompts/tdd_green.md");
const TDD_REFACTOR_TEMPLATE: &str = include_str!("prompts/tdd_refactor.md");
const IMPLEMENTATION_TEMPLATE: &str = include_str!("prompts/implementation.md");
const IMPLEMENTATION_RETRY_TEMPLATE: &str = include_str!("prompts/implementation_retry.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const REVIEW_SYSTEM_PROMPT: &str = include_str!("prompts/review_system.md");

/// Story fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct StoryContext {
    id: String,
    title: String,
    content: String,
}

impl StoryContext {
    fn from_story(story: &Story) -> Self {
        Self {
            id: story.id(),
            title: story.title(),
            content: story.content.trim().to_string(),
        }
    }
}

/// Inputs for the retry prompt, already sanitized and truncated.
#[derive(Debug, Clone, Default)]
pub struct RetryPromptInputs {
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: String,
    pub build_output: String,
    pub test_output: String,
    pub dependency_guidance: String,
    pub source_errors: Vec<String>,
    pub cascading_errors: Vec<String>,
    pub history_section: String,
}

/// Inputs for the unified review prompt.
#[derive(Debug, Clone, Default)]
pub struct ReviewPromptInputs {
    pub changed_files: Vec<String>,
    pub tdd_enabled: bool,
    pub tdd_cycles: usize,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for (name, source) in [
            ("tdd_red", TDD_RED_TEMPLATE),
            ("tdd_green", TDD_GREEN_TEMPLATE),
            ("tdd_refactor", TDD_REFACTOR_TEMPLATE),
            ("implementation", IMPLEMENTATION_TEMPLATE),
            ("implementation_retry", IMPLEMENTATION_RETRY_TEMPLATE),
            ("review", REVIEW_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    pub fn render_red(&self, story: &Story, cycle: u32, criterion: &str) -> Result<String> {
        let template = self.env.get_template("tdd_red")?;
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
            cycle => cycle,
            criterion => criterion.trim(),
        })?)
    }

    pub fn render_green(
        &self,
        story: &Story,
        cycle: u32,
        test_file: &str,
        test_name: &str,
        red_output: &str,
    ) -> Result<String> {
        let template = self.env.get_template("tdd_green")?;
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
            cycle => cycle,
            test_file => test_file,
            test_name => test_name,
            red_output => red_output.trim(),
        })?)
    }

    pub fn render_refactor(
        &self,
        story: &Story,
        cycle: u32,
        test_file: &str,
        test_name: &str,
    ) -> Result<String> {
        let template = self.env.get_template("tdd_refactor")?;
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
            cycle => cycle,
            test_file => test_file,
            test_name => test_name,
        })?)
    }

    pub fn render_implementation(&self, story: &Story) -> Result<String> {
        let template = self.env.get_template("implementation")?;
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
        })?)
    }

    pub fn render_retry(&self, story: &Story, inputs: &RetryPromptInputs) -> Result<String> {
        let template = self.env.get_template("implementation_retry")?;
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
            attempt => inputs.attempt,
            max_attempts => inputs.max_attempts,
            outcome => inputs.outcome.as_str(),
            build_output => non_empty(&inputs.build_output),
            test_output => non_empty(&inputs.test_output),
            dependency_guidance => non_empty(&inputs.dependency_guidance),
            source_errors => &inputs.source_errors,
            cascading_errors => &inputs.cascading_errors,
            history => non_empty(&inputs.history_section),
        })?)
    }

    pub fn render_review(&self, story: &Story, inputs: &ReviewPromptInputs) -> Result<String> {
        let template = self.env.get_template("review")?;
        Ok(template.render(context! {
            story => StoryContext::from_story(story),
            changed_files => &inputs.changed_files,
            tdd_enabled => inputs.tdd_enabled,
            tdd_cycles => inputs.tdd_cycles,
        })?)
    }

    pub fn review_system_prompt(&self) -> String {
        REVIEW_SYSTEM_PROMPT.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::story::parse_story;
    use std::path::Path;

    fn story() -> Story {
        parse_story(
            Path::new("S-3.md"),
            "---\nid: S-3\ntitle: Login\n---\n\n# Login\n\n## Acceptance Criteria\n\n- [ ] rejects bad password\n",
        )
        .expect("story")
    }

    #[test]
    fn red_prompt_names_criterion_and_reporting_lines() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_red(&story(), 1, "rejects bad password")
            .expect("render");
        assert!(prompt.contains("TDD cycle 1: RED"));
        assert!(prompt.contains("> rejects bad password"));
        assert!(prompt.contains("Test file:"));
        assert!(prompt.contains("Test name:"));
    }

    #[test]
    fn retry_prompt_includes_only_present_sections() {
        let engine = PromptEngine::new();
        let inputs = RetryPromptInputs {
            attempt: 2,
            max_attempts: 4,
            outcome: "failed_build".to_string(),
            build_output: "error[E0425]: cannot find value `x`".to_string(),
            source_errors: vec!["error[E0425]: cannot find value `x`".to_string()],
            history_section: "## Previous attempts\n- Attempt 1: ...\n\nDo not repeat the same fix.".to_string(),
            ..RetryPromptInputs::default()
        };
        let prompt = engine.render_retry(&story(), &inputs).expect("render");
        assert!(prompt.contains("attempt 2 of 4"));
        assert!(prompt.contains("Fix these source errors first"));
        assert!(prompt.contains("Do not repeat the same fix"));
        assert!(!prompt.contains("## Test output"));
        assert!(!prompt.contains("## Missing dependencies"));
        assert!(!prompt.contains("## Cascading errors"));
    }

    #[test]
    fn review_prompt_lists_changed_files_and_json_contract() {
        let engine = PromptEngine::new();
        let inputs = ReviewPromptInputs {
            changed_files: vec!["src/auth.rs".to_string()],
            tdd_enabled: true,
            tdd_cycles: 2,
        };
        let prompt = engine.render_review(&story(), &inputs).expect("render");
        assert!(prompt.contains("- `src/auth.rs`"));
        assert!(prompt.contains("2 cycle(s)"));
        assert!(prompt.contains("test_alignment"));
        assert!(prompt.contains("tests that pass but still assert the behavior from before the change"));
        assert!(prompt.contains("\"perspectives\""));
        assert!(!engine.review_system_prompt().is_empty());
    }
}
