use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OptHubError, Result};
use crate::state::TrialState;

/// Server-side id of a match.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn new(id: impl Into<String>) -> Self {
        MatchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side id of a competition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CompetitionId(String);

impl CompetitionId {
    pub fn new(id: impl Into<String>) -> Self {
        CompetitionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CompetitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trial number, assigned by the server and unique within a match.
///
/// ```
/// use opthub_core::model::TrialNo;
///
/// assert!(TrialNo::new(0).is_none());
/// assert_eq!(TrialNo::new(7).unwrap().get(), 7);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u64", into = "u64")]
pub struct TrialNo(u64);

impl TrialNo {
    pub fn new(no: u64) -> Option<Self> {
        (no > 0).then_some(TrialNo(no))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for TrialNo {
    type Error = String;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        TrialNo::new(value).ok_or_else(|| "trial number must be positive".to_string())
    }
}

impl From<TrialNo> for u64 {
    fn from(value: TrialNo) -> Self {
        value.0
    }
}

impl Display for TrialNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scalar or a vector of floating-point numbers.
///
/// Used for solution variables as well as objective and constraint values.
/// On the wire it is `{"scalar": x}` or `{"vector": [..]}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Numeric {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Numeric {
    /// Number of components; a scalar counts as one.
    pub fn dimension(&self) -> usize {
        match self {
            Numeric::Scalar(_) => 1,
            Numeric::Vector(values) => values.len(),
        }
    }

    pub fn values(&self) -> &[f64] {
        match self {
            Numeric::Scalar(value) => std::slice::from_ref(value),
            Numeric::Vector(values) => values,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Numeric::Scalar(value) => Some(*value),
            Numeric::Vector(_) => None,
        }
    }

    /// Rejects a value whose arity differs from `expected`.
    ///
    /// ```
    /// use opthub_core::model::Numeric;
    ///
    /// let solution = Numeric::Vector(vec![1.0, 2.0]);
    /// assert!(solution.check_dimension(2).is_ok());
    /// assert!(solution.check_dimension(3).is_err());
    /// ```
    pub fn check_dimension(&self, expected: usize) -> Result<()> {
        let actual = self.dimension();
        if actual != expected {
            return Err(OptHubError::validation(format!(
                "expected {} value(s), got {}",
                expected, actual
            )));
        }
        Ok(())
    }
}

impl Display for Numeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Numeric::Scalar(value) => write!(f, "{}", value),
            Numeric::Vector(values) => write!(
                f,
                "[{}]",
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        }
    }
}

/// Outcome flag the server attaches to evaluation and score records.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[serde(alias = "Success")]
    Success,
    #[serde(alias = "Failed")]
    Failed,
}

/// A submitted solution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Solution {
    pub variable: Numeric,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of the evaluation phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    #[serde(default)]
    pub status: Option<PhaseStatus>,
    #[serde(default)]
    pub objective: Option<Numeric>,
    #[serde(default)]
    pub constraint: Option<Numeric>,
    #[serde(default)]
    pub feasible: Option<bool>,
    #[serde(default)]
    pub info: Option<serde_json::Value>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Evaluation {
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.status == Some(PhaseStatus::Failed)
    }
}

/// Result of the scoring phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Score {
    #[serde(default)]
    pub status: Option<PhaseStatus>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What the store returns for a fresh submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submitted {
    pub trial_no: TrialNo,
    pub status: String,
}

/// One status snapshot as reported by the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialSnapshot {
    pub trial_no: TrialNo,
    pub status: String,
    #[serde(default)]
    pub solution: Option<Solution>,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub score: Option<Score>,
}

impl TrialSnapshot {
    pub fn new(trial_no: TrialNo, status: impl Into<String>) -> Self {
        TrialSnapshot {
            trial_no,
            status: status.into(),
            solution: None,
            evaluation: None,
            error: None,
            score: None,
        }
    }

    pub fn with_solution(mut self, solution: Solution) -> Self {
        self.solution = Some(solution);
        self
    }

    pub fn with_evaluation(mut self, evaluation: Evaluation) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    pub fn with_score(mut self, score: Score) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Lifecycle position of a trial together with the data that position
/// guarantees.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialProgress {
    Evaluating,
    EvaluatorFailed {
        evaluation: Option<Evaluation>,
        error: String,
    },
    Scoring {
        evaluation: Evaluation,
    },
    ScorerFailed {
        evaluation: Evaluation,
        score: Option<Score>,
        error: String,
    },
    Success {
        evaluation: Evaluation,
        score: Score,
    },
}

/// A validated trial snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub trial_no: TrialNo,
    pub solution: Option<Solution>,
    pub progress: TrialProgress,
}

const DEFAULT_EVALUATION_ERROR: &str = "evaluation failed";
const DEFAULT_SCORING_ERROR: &str = "scoring failed";

impl Trial {
    /// Maps a wire snapshot into a [Trial], rejecting unknown statuses and
    /// snapshots whose records contradict their status.
    pub fn try_from_snapshot(snapshot: TrialSnapshot) -> Result<Trial> {
        let state = TrialState::from_status(&snapshot.status)?;
        let TrialSnapshot {
            trial_no,
            solution,
            evaluation,
            error,
            score,
            ..
        } = snapshot;

        let progress = match state {
            TrialState::Evaluating => {
                if score.is_some() {
                    return Err(OptHubError::invalid_response(format!(
                        "trial {} has a score while still evaluating",
                        trial_no
                    )));
                }
                TrialProgress::Evaluating
            }
            TrialState::EvaluatorFailed => {
                if score.is_some() {
                    return Err(OptHubError::invalid_response(format!(
                        "trial {} has a score but its evaluation failed",
                        trial_no
                    )));
                }
                let error = evaluation
                    .as_ref()
                    .and_then(|e| e.error.clone())
                    .or(error)
                    .unwrap_or_else(|| DEFAULT_EVALUATION_ERROR.to_string());
                TrialProgress::EvaluatorFailed { evaluation, error }
            }
            TrialState::Scoring => {
                let evaluation = Self::successful_evaluation(trial_no, state, evaluation)?;
                TrialProgress::Scoring { evaluation }
            }
            TrialState::ScorerFailed => {
                let evaluation = Self::successful_evaluation(trial_no, state, evaluation)?;
                let error = score
                    .as_ref()
                    .and_then(|s| s.error.clone())
                    .or(error)
                    .unwrap_or_else(|| DEFAULT_SCORING_ERROR.to_string());
                TrialProgress::ScorerFailed {
                    evaluation,
                    score,
                    error,
                }
            }
            TrialState::Success => {
                let evaluation = Self::successful_evaluation(trial_no, state, evaluation)?;
                let score = score.filter(|s| s.value.is_some()).ok_or_else(|| {
                    OptHubError::invalid_response(format!(
                        "trial {} succeeded without a score value",
                        trial_no
                    ))
                })?;
                TrialProgress::Success { evaluation, score }
            }
        };

        Ok(Trial {
            trial_no,
            solution,
            progress,
        })
    }

    fn successful_evaluation(
        trial_no: TrialNo,
        state: TrialState,
        evaluation: Option<Evaluation>,
    ) -> Result<Evaluation> {
        match evaluation {
            Some(evaluation) if !evaluation.is_failed() => Ok(evaluation),
            Some(_) => Err(OptHubError::invalid_response(format!(
                "trial {} is {} but its evaluation failed",
                trial_no, state
            ))),
            None => Err(OptHubError::invalid_response(format!(
                "trial {} is {} but has no evaluation",
                trial_no, state
            ))),
        }
    }

    pub fn state(&self) -> TrialState {
        match self.progress {
            TrialProgress::Evaluating => TrialState::Evaluating,
            TrialProgress::EvaluatorFailed { .. } => TrialState::EvaluatorFailed,
            TrialProgress::Scoring { .. } => TrialState::Scoring,
            TrialProgress::ScorerFailed { .. } => TrialState::ScorerFailed,
            TrialProgress::Success { .. } => TrialState::Success,
        }
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        match &self.progress {
            TrialProgress::Evaluating => None,
            TrialProgress::EvaluatorFailed { evaluation, .. } => evaluation.as_ref(),
            TrialProgress::Scoring { evaluation }
            | TrialProgress::ScorerFailed { evaluation, .. }
            | TrialProgress::Success { evaluation, .. } => Some(evaluation),
        }
    }

    pub fn score(&self) -> Option<&Score> {
        match &self.progress {
            TrialProgress::Success { score, .. } => Some(score),
            TrialProgress::ScorerFailed { score, .. } => score.as_ref(),
            _ => None,
        }
    }

    /// Server-reported failure message, if the trial failed.
    pub fn error(&self) -> Option<&str> {
        match &self.progress {
            TrialProgress::EvaluatorFailed { error, .. }
            | TrialProgress::ScorerFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<&Trial> for TrialSnapshot {
    fn from(trial: &Trial) -> Self {
        TrialSnapshot {
            trial_no: trial.trial_no,
            status: trial.state().as_str().to_string(),
            solution: trial.solution.clone(),
            evaluation: trial.evaluation().cloned(),
            error: trial.error().map(str::to_string),
            score: trial.score().cloned(),
        }
    }
}

/// A competition the user participates in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Competition {
    pub id: CompetitionId,
    pub alias: String,
}

/// A match inside a competition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub alias: String,
}
