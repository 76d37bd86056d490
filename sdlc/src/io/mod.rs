//! I/O adapters: subprocesses, git, agent, story files, configuration.

pub mod agent;
pub mod commit;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod story;
pub mod verify;
