//! Stable exit codes for `sdlc` CLI commands.

/// Command succeeded, or the review approved the story.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, story, or working directory.
pub const INVALID: i32 = 1;
/// The review rejected the story, or verification or the commit gate found failures.
pub const REJECTED: i32 = 2;
/// Recoverable paths are exhausted, or an implementation run did not succeed.
pub const FAILED: i32 = 3;
/// The story was sent back to implementation.
pub const RECOVERY: i32 = 4;
