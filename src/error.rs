// =============================================================================
// Startup error taxonomy — maps failures to process exit codes
// =============================================================================
//
// Exit codes:
//   1 — configuration / path error (no retry)
//   2 — missing startup dependency (e.g. no prior-day masters)
//
// Runtime failures never use this type: data gaps degrade a single symbol to
// null tags, transient I/O retries with backoff, and invariant violations halt
// trading through the risk state while preserving live_state.json for
// post-mortem.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(String),

    #[error("missing startup dependency: {0}")]
    MissingDependency(String),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::MissingDependency(_) => 2,
        }
    }
}
