//! Development-time tracing for debugging the pipeline.
//!
//! Tracing is diagnostics only, written to stderr and controlled by
//! `RUST_LOG`. Product output is the JSON result printed on stdout, and agent
//! transcripts streamed to `.ai-sdlc/progress/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=sdlc=debug sdlc review .ai-sdlc/stories/S-1.md
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
