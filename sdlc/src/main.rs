//! Story implementation and review pipeline CLI.
//!
//! Every command prints its result as pretty JSON on stdout and exits with a
//! stable code from [`sdlc::exit_codes`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use sdlc::core::classifier::METADATA_DIR;
use sdlc::core::types::Decision;
use sdlc::exit_codes;
use sdlc::implement::run_implementation;
use sdlc::io::agent::CommandAgent;
use sdlc::io::commit::{REASON_TESTS_FAILED, commit_if_all_tests_pass};
use sdlc::io::config::{PipelineConfig, ResolvedConfig, config_path, load_config, write_config};
use sdlc::io::git::Git;
use sdlc::io::story::load_story;
use sdlc::io::verify::{CommandTestRunner, CommandVerifier, Verifier};
use sdlc::logging;
use sdlc::pipeline::{AgentResult, Pipeline};
use sdlc::review::run_review;
use sdlc::tdd::run_tdd_implementation;

const PROGRESS_DIR: &str = "progress";

#[derive(Parser)]
#[command(
    name = "sdlc",
    version,
    about = "Test-disciplined story implementation and review pipeline"
)]
struct Cli {
    /// Working tree the pipeline operates on.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.ai-sdlc/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the configured build and test commands.
    Verify,
    /// Commit all changes if the full test suite passes.
    Commit {
        #[arg(short, long)]
        message: String,
    },
    /// Implement a story through RED/GREEN/REFACTOR cycles.
    Tdd { story: PathBuf },
    /// Implement a story; uses TDD cycles when the story enables them.
    Implement { story: PathBuf },
    /// Review a story's changes and decide APPROVED/REJECTED/RECOVERY/FAILED.
    Review { story: PathBuf },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Verify => cmd_verify(&cli.root),
        Command::Commit { message } => cmd_commit(&cli.root, &message),
        Command::Tdd { story } => cmd_implement(&cli.root, &story, true),
        Command::Implement { story } => cmd_implement(&cli.root, &story, false),
        Command::Review { story } => cmd_review(&cli.root, &story),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let git = Git::open(root)?;
    let path = config_path(git.workdir());
    if force || !path.exists() {
        write_config(&path, &PipelineConfig::default())?;
        eprintln!("wrote {}", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_verify(root: &Path) -> Result<i32> {
    let (git, config) = open(root)?;
    let result = CommandVerifier::from_config(&config).verify(git.workdir())?;
    print_json(&result)?;
    Ok(if result.passed() {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    })
}

fn cmd_commit(root: &Path, message: &str) -> Result<i32> {
    let (git, config) = open(root)?;
    let runner = CommandTestRunner::from_config(&config);
    let outcome = commit_if_all_tests_pass(&git, message, config.test_timeout, &runner)?;
    print_json(&outcome)?;
    Ok(
        if outcome.reason.as_deref() == Some(REASON_TESTS_FAILED) {
            exit_codes::REJECTED
        } else {
            exit_codes::OK
        },
    )
}

fn cmd_implement(root: &Path, story: &Path, force_tdd: bool) -> Result<i32> {
    let (git, config) = open(root)?;
    let story = load_story(&story_path(&git, story))?;
    let agent = CommandAgent::from_config(&config);
    let test_runner = CommandTestRunner::from_config(&config);
    let verifier = CommandVerifier::from_config(&config);
    let pipeline = Pipeline::new(&git, &agent, &test_runner, &verifier, &config)
        .with_progress_dir(progress_dir(&git));

    let result: AgentResult = if force_tdd || story.tdd_enabled(config.tdd_enabled) {
        run_tdd_implementation(&pipeline, story)
    } else {
        run_implementation(&pipeline, story)
    };
    print_json(&result)?;
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_review(root: &Path, story: &Path) -> Result<i32> {
    let (git, config) = open(root)?;
    let story = load_story(&story_path(&git, story))?;
    let agent = CommandAgent::from_config(&config);
    let test_runner = CommandTestRunner::from_config(&config);
    let verifier = CommandVerifier::from_config(&config);
    let pipeline = Pipeline::new(&git, &agent, &test_runner, &verifier, &config)
        .with_progress_dir(progress_dir(&git));

    let result = run_review(&pipeline, story);
    print_json(&result)?;
    Ok(match result.decision {
        Decision::Approved => exit_codes::OK,
        Decision::Rejected => exit_codes::REJECTED,
        Decision::Recovery => exit_codes::RECOVERY,
        Decision::Failed => exit_codes::FAILED,
    })
}

/// Validate the working tree and resolve its config once.
fn open(root: &Path) -> Result<(Git, ResolvedConfig)> {
    let git = Git::open(root)?;
    let path = config_path(git.workdir());
    let config = load_config(&path).with_context(|| format!("load {}", path.display()))?;
    Ok((git, config.resolve()))
}

fn story_path(git: &Git, story: &Path) -> PathBuf {
    if story.is_absolute() {
        story.to_path_buf()
    } else {
        git.workdir().join(story)
    }
}

fn progress_dir(git: &Git) -> PathBuf {
    git.workdir().join(METADATA_DIR).join(PROGRESS_DIR)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize result json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_review_with_global_root() {
        let cli = Cli::parse_from(["sdlc", "review", "stories/S-1.md", "--root", "/work"]);
        assert_eq!(cli.root, PathBuf::from("/work"));
        assert!(
            matches!(cli.command, Command::Review { story } if story == Path::new("stories/S-1.md"))
        );
    }

    #[test]
    fn parse_commit_message() {
        let cli = Cli::parse_from(["sdlc", "commit", "-m", "feat: x"]);
        assert!(matches!(cli.command, Command::Commit { message } if message == "feat: x"));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["sdlc", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }
}
