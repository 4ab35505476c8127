use std::time::Duration;

use crate::model::{MatchId, TrialNo};
use crate::state::TrialState;

/// Errors surfaced by the polling engine, the trial state machine and the
/// submission workflow.
#[derive(Debug, thiserror::Error)]
pub enum OptHubError {
    /// Network or authentication failure talking to the trial store.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server rejected a submission.
    #[error("submission failed: {message}")]
    Submission { message: String },

    /// The overall timeout elapsed before a terminal state was reached.
    #[error("polling timed out after {elapsed:?}")]
    PollTimeout { elapsed: Duration },

    /// The trial reached `evaluator_failed`.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The trial reached `scorer_failed`.
    #[error("scoring failed: {0}")]
    Scoring(String),

    /// The server reported a status outside the known set. `trial_no` is
    /// set when the status came back from a submission that was accepted.
    #[error("unknown trial status: {status:?}")]
    UnknownStatus {
        status: String,
        trial_no: Option<TrialNo>,
    },

    /// The solution payload failed the pre-submission check.
    #[error("invalid solution: {reason}")]
    Validation { reason: String },

    /// The trial did not become visible within the visibility window.
    #[error("trial {trial_no} not found in match {match_id}")]
    TrialNotFound { match_id: MatchId, trial_no: TrialNo },

    /// A snapshot moved backwards in the trial lifecycle.
    #[error("trial status moved backwards: {from} -> {to}")]
    StatusRegression { from: TrialState, to: TrialState },

    /// The server returned a snapshot that violates the trial invariants.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// The poll loop was cancelled by the caller.
    #[error("polling cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Local cache error.
    #[error("cache error: {message}")]
    Cache { message: String },
}

impl OptHubError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Input and local state
            Self::Validation { .. } => 2,
            Self::Config { .. } => 2,
            Self::Cache { .. } => 2,
            Self::TrialNotFound { .. } => 3,

            // Remote failures
            Self::Transport { .. } => 4,
            Self::Submission { .. } => 4,
            Self::InvalidResponse { .. } => 4,
            Self::UnknownStatus { .. } => 4,
            Self::StatusRegression { .. } => 4,

            // Trial outcomes
            Self::Evaluation(_) => 5,
            Self::Scoring(_) => 6,

            // Waiting
            Self::PollTimeout { .. } => 7,
            Self::Cancelled => 130,
        }
    }

    /// Whether the error came from talking to the store rather than from the
    /// trial itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Submission { .. })
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for OptHubError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

/// Result type for OptHub client operations.
pub type Result<T> = std::result::Result<T, OptHubError>;
