use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{OptHubError, Result};
use crate::model::{Evaluation, MatchId, Numeric, Score, Trial, TrialNo, TrialProgress};
use crate::poll::{poll_until, CancelToken, PollConfig, PollLoop};
use crate::state::TrialState;
use crate::store::TrialStore;
use crate::validate::{check_variable, parse_solution};

/// Tuning for the submission workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub poll: PollConfig,
    /// How long a freshly assigned trial number may stay invisible before
    /// [MatchHandle::get_trial] gives up.
    pub visibility_window: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            poll: PollConfig::default(),
            visibility_window: Duration::from_secs(30),
        }
    }
}

/// Entry point: a trial store plus workflow settings.
///
/// ```
/// use std::sync::Arc;
/// use opthub_core::fakes::ScriptedTrialStore;
/// use opthub_core::model::{Evaluation, MatchId, Numeric, Score, TrialNo, TrialSnapshot};
/// use opthub_core::OptHub;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> opthub_core::Result<()> {
/// let match_id = MatchId::new("m-1");
/// let store = Arc::new(ScriptedTrialStore::new());
/// let trial_no = TrialNo::new(1).unwrap();
/// store.script(&match_id, trial_no, [
///     TrialSnapshot::new(trial_no, "success")
///         .with_evaluation(Evaluation { objective: Some(Numeric::Scalar(3.0)), ..Default::default() })
///         .with_score(Score { value: Some(0.5), ..Default::default() }),
/// ]);
///
/// let opthub = OptHub::new(store);
/// let mut trial = opthub.match_handle(match_id).submit(Numeric::Vector(vec![1.0, 2.0])).await?;
/// assert_eq!(trial.wait_for_scoring(None).await?.value, Some(0.5));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OptHub {
    store: Arc<dyn TrialStore>,
    config: WorkflowConfig,
}

impl OptHub {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        OptHub {
            store,
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn match_handle(&self, match_id: MatchId) -> MatchHandle {
        MatchHandle {
            store: Arc::clone(&self.store),
            match_id,
            config: self.config.clone(),
        }
    }
}

/// Operations scoped to one match.
#[derive(Clone)]
pub struct MatchHandle {
    store: Arc<dyn TrialStore>,
    match_id: MatchId,
    config: WorkflowConfig,
}

impl MatchHandle {
    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    /// Validates and submits a solution.
    ///
    /// The returned handle starts from the status the server reported for
    /// the submission.
    pub async fn submit(&self, variable: Numeric) -> Result<TrialHandle> {
        check_variable(&variable)?;
        self.config.poll.validate()?;

        let submitted = self.store.submit(&self.match_id, &variable).await?;
        // The trial exists on the server from here on, keep its number.
        let state = TrialState::from_status(&submitted.status).map_err(|e| match e {
            OptHubError::UnknownStatus { status, .. } => {
                warn!(
                    match_id = %self.match_id,
                    trial_no = %submitted.trial_no,
                    status = %status,
                    "solution submitted with an unknown status"
                );
                OptHubError::UnknownStatus {
                    status,
                    trial_no: Some(submitted.trial_no),
                }
            }
            other => other,
        })?;

        info!(
            match_id = %self.match_id,
            trial_no = %submitted.trial_no,
            status = %state,
            "solution submitted"
        );

        let mut handle = self.trial(submitted.trial_no);
        handle.state = Some(state);
        Ok(handle)
    }

    /// Parses a textual solution, then submits it.
    pub async fn submit_raw(&self, text: &str) -> Result<TrialHandle> {
        let variable = parse_solution(text)?;
        self.submit(variable).await
    }

    /// Handle for an already submitted trial. Nothing is fetched.
    pub fn trial(&self, trial_no: TrialNo) -> TrialHandle {
        TrialHandle {
            match_handle: self.clone(),
            trial_no,
            state: None,
            last: None,
            cancel: None,
        }
    }

    /// Fetches one snapshot; `None` while the trial is not visible.
    pub async fn try_get_trial(&self, trial_no: TrialNo) -> Result<Option<Trial>> {
        let snapshot = match self.store.get_trial_status(&self.match_id, trial_no).await? {
            Some(snapshot) => snapshot,
            None => return Ok(None),
        };

        if snapshot.trial_no != trial_no {
            return Err(OptHubError::InvalidResponse {
                message: format!(
                    "asked for trial {} but the store returned trial {}",
                    trial_no, snapshot.trial_no
                ),
            });
        }

        Trial::try_from_snapshot(snapshot).map(Some)
    }

    /// Fetches a trial, waiting out the visibility window if it is not
    /// visible yet.
    pub async fn get_trial(&self, trial_no: TrialNo) -> Result<Trial> {
        let this = self;
        let res = poll_until(
            &self.config.poll,
            Some(self.config.visibility_window),
            None,
            move || this.try_get_trial(trial_no),
            |trial| trial.is_some(),
        )
        .await;

        match res {
            Ok(trial) => trial.ok_or_else(|| self.not_found(trial_no)),
            Err(OptHubError::PollTimeout { .. }) => Err(self.not_found(trial_no)),
            Err(e) => Err(e),
        }
    }

    fn not_found(&self, trial_no: TrialNo) -> OptHubError {
        OptHubError::TrialNotFound {
            match_id: self.match_id.clone(),
            trial_no,
        }
    }
}

/// A submitted trial being tracked by the client.
pub struct TrialHandle {
    match_handle: MatchHandle,
    trial_no: TrialNo,
    state: Option<TrialState>,
    last: Option<Trial>,
    cancel: Option<CancelToken>,
}

impl TrialHandle {
    pub fn trial_no(&self) -> TrialNo {
        self.trial_no
    }

    pub fn match_id(&self) -> &MatchId {
        self.match_handle.match_id()
    }

    /// Last state observed, from the submission or a poll.
    pub fn state(&self) -> Option<TrialState> {
        self.state
    }

    pub fn last_trial(&self) -> Option<&Trial> {
        self.last.as_ref()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fetches one snapshot.
    pub async fn refresh(&mut self) -> Result<Option<&Trial>> {
        match self.match_handle.try_get_trial(self.trial_no).await? {
            Some(trial) => {
                self.observe(trial)?;
                Ok(self.last.as_ref())
            }
            None => Ok(None),
        }
    }

    /// Waits until the evaluation phase is over and returns its record.
    ///
    /// Fails with [OptHubError::Evaluation] if the evaluator failed.
    pub async fn wait_for_evaluation(&mut self, timeout: Option<Duration>) -> Result<Evaluation> {
        let trial = self
            .wait_until(timeout, TrialState::evaluation_finished)
            .await?;

        match trial.progress {
            TrialProgress::EvaluatorFailed { error, .. } => Err(OptHubError::Evaluation(error)),
            TrialProgress::Scoring { evaluation }
            | TrialProgress::ScorerFailed { evaluation, .. }
            | TrialProgress::Success { evaluation, .. } => Ok(evaluation),
            TrialProgress::Evaluating => Err(OptHubError::InvalidResponse {
                message: format!("trial {} is still evaluating", self.trial_no),
            }),
        }
    }

    /// Waits until scoring is over and returns the score.
    ///
    /// Fails with [OptHubError::Scoring] if the scorer failed and with
    /// [OptHubError::Evaluation] if the trial never reached scoring.
    pub async fn wait_for_scoring(&mut self, timeout: Option<Duration>) -> Result<Score> {
        let trial = self.wait_until(timeout, TrialState::scoring_finished).await?;

        match trial.progress {
            TrialProgress::Success { score, .. } => Ok(score),
            TrialProgress::ScorerFailed { error, .. } => Err(OptHubError::Scoring(error)),
            TrialProgress::EvaluatorFailed { error, .. } => Err(OptHubError::Evaluation(error)),
            TrialProgress::Evaluating | TrialProgress::Scoring { .. } => {
                Err(OptHubError::InvalidResponse {
                    message: format!("trial {} has not finished scoring", self.trial_no),
                })
            }
        }
    }

    async fn wait_until(
        &mut self,
        timeout: Option<Duration>,
        done: fn(&TrialState) -> bool,
    ) -> Result<Trial> {
        // Terminal snapshots never change.
        if let Some(trial) = &self.last {
            let state = trial.state();
            if state.is_terminal() && done(&state) {
                return Ok(trial.clone());
            }
        }

        let config = &self.match_handle.config.poll;
        config.validate()?;
        let mut poll = PollLoop::new(config, timeout, self.cancel.clone());

        loop {
            poll.checkpoint()?;

            let fetched = poll
                .fetch(self.match_handle.try_get_trial(self.trial_no))
                .await?;
            match fetched {
                Some(trial) => {
                    let state = trial.state();
                    self.observe(trial.clone())?;
                    if done(&state) {
                        info!(
                            match_id = %self.match_id(),
                            trial_no = %self.trial_no,
                            status = %state,
                            polls = poll.attempts() + 1,
                            "trial reached {}",
                            state
                        );
                        return Ok(trial);
                    }
                    debug!(trial_no = %self.trial_no, status = %state, "trial not finished");
                }
                None => debug!(trial_no = %self.trial_no, "trial not visible yet"),
            }

            poll.wait().await?;
        }
    }

    fn observe(&mut self, trial: Trial) -> Result<()> {
        let next = trial.state();
        if let Some(previous) = self.state {
            if !previous.can_advance_to(next) {
                return Err(OptHubError::StatusRegression {
                    from: previous,
                    to: next,
                });
            }
        }
        self.state = Some(next);
        self.last = Some(trial);
        Ok(())
    }
}
