//! Test-disciplined implementation and review pipeline for a single story.
//!
//! An external coding agent writes the code; this crate enforces that the
//! work is tested, actually changes what the story asks for, and is reviewed
//! before it is committed. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, extraction,
//!   sanitization, review rules). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, subprocesses, the agent
//!   CLI, story files, configuration). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`tdd`], [`implement`], [`review`]) combine the two
//! through a [`pipeline::Pipeline`] and return the result contract the CLI
//! prints.

pub mod core;
pub mod exit_codes;
pub mod implement;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod review;
pub mod tdd;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
