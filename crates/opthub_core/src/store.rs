use async_trait::async_trait;

use crate::error::Result;
use crate::model::{MatchId, Numeric, Submitted, TrialNo, TrialSnapshot};

#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Submits a solution variable to a match.
    ///
    /// Fails with [crate::OptHubError::Submission] when the server rejects
    /// the submission and [crate::OptHubError::Transport] on network or
    /// auth failures.
    async fn submit(&self, match_id: &MatchId, variable: &Numeric) -> Result<Submitted>;

    /// Fetches the current snapshot of a trial.
    ///
    /// `Ok(None)` means the trial is not visible (yet); this is not an error.
    async fn get_trial_status(
        &self,
        match_id: &MatchId,
        trial_no: TrialNo,
    ) -> Result<Option<TrialSnapshot>>;
}
