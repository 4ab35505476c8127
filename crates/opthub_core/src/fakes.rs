use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{OptHubError, Result};
use crate::model::{MatchId, Numeric, Submitted, TrialNo, TrialSnapshot};
use crate::store::TrialStore;

/// One scripted answer to `get_trial_status`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Visible(TrialSnapshot),
    NotFound,
    TransportError(String),
}

impl From<TrialSnapshot> for ScriptStep {
    fn from(value: TrialSnapshot) -> Self {
        ScriptStep::Visible(value)
    }
}

#[derive(Debug)]
struct Script {
    pending: VecDeque<ScriptStep>,
    last: ScriptStep,
}

#[derive(Debug)]
struct Inner {
    next_trial_no: u64,
    initial_status: String,
    rejection: Option<String>,
    submissions: Vec<(MatchId, Numeric)>,
    scripts: HashMap<(MatchId, TrialNo), Script>,
    status_calls: usize,
}

/// Scripted in-memory trial store.
#[derive(Debug)]
pub struct ScriptedTrialStore {
    inner: Mutex<Inner>,
}

impl Default for ScriptedTrialStore {
    fn default() -> Self {
        ScriptedTrialStore {
            inner: Mutex::new(Inner {
                next_trial_no: 1,
                initial_status: "evaluating".to_string(),
                rejection: None,
                submissions: Vec::new(),
                scripts: HashMap::new(),
                status_calls: 0,
            }),
        }
    }
}

impl ScriptedTrialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trial number handed out by the next submission.
    pub fn with_next_trial_no(self, trial_no: u64) -> Self {
        self.lock().next_trial_no = trial_no;
        self
    }

    /// Status string returned by `submit`.
    pub fn with_initial_status(self, status: &str) -> Self {
        self.lock().initial_status = status.to_string();
        self
    }

    /// Makes every submission fail with the given server message.
    pub fn rejecting_submissions(self, message: &str) -> Self {
        self.lock().rejection = Some(message.to_string());
        self
    }

    /// Replaces the script for one trial. An empty script means "not found".
    pub fn script<I, S>(&self, match_id: &MatchId, trial_no: TrialNo, steps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<ScriptStep>,
    {
        let pending: VecDeque<ScriptStep> = steps.into_iter().map(Into::into).collect();
        let last = pending.back().cloned().unwrap_or(ScriptStep::NotFound);
        self.lock()
            .scripts
            .insert((match_id.clone(), trial_no), Script { pending, last });
    }

    pub fn submissions(&self) -> Vec<(MatchId, Numeric)> {
        self.lock().submissions.clone()
    }

    /// Number of `get_trial_status` calls served so far.
    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }
}

#[async_trait]
impl TrialStore for ScriptedTrialStore {
    async fn submit(&self, match_id: &MatchId, variable: &Numeric) -> Result<Submitted> {
        let mut inner = self.lock();
        if let Some(message) = &inner.rejection {
            return Err(OptHubError::Submission {
                message: message.clone(),
            });
        }

        let trial_no = TrialNo::new(inner.next_trial_no).ok_or_else(|| OptHubError::Submission {
            message: "store handed out trial number 0".to_string(),
        })?;
        inner.next_trial_no += 1;
        inner.submissions.push((match_id.clone(), variable.clone()));

        Ok(Submitted {
            trial_no,
            status: inner.initial_status.clone(),
        })
    }

    async fn get_trial_status(
        &self,
        match_id: &MatchId,
        trial_no: TrialNo,
    ) -> Result<Option<TrialSnapshot>> {
        let mut inner = self.lock();
        inner.status_calls += 1;

        let step = match inner.scripts.get_mut(&(match_id.clone(), trial_no)) {
            Some(script) => script
                .pending
                .pop_front()
                .unwrap_or_else(|| script.last.clone()),
            None => ScriptStep::NotFound,
        };

        match step {
            ScriptStep::Visible(snapshot) => Ok(Some(snapshot)),
            ScriptStep::NotFound => Ok(None),
            ScriptStep::TransportError(message) => Err(OptHubError::Transport { message }),
        }
    }
}
