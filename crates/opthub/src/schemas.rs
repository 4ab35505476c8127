use std::fmt::Display;

use chrono::{DateTime, Local, Utc};
use opthub_core::model::{Numeric, TrialNo, TrialSnapshot};
use opthub_core::TrialState;
use serde::{Deserialize, Serialize};

/// Body of a submission request.
#[derive(Serialize, Debug)]
pub struct SubmitRequest<'a> {
    pub variable: &'a Numeric,
}

/// Status part of a trial, without evaluation or score.
#[derive(Deserialize, Debug)]
pub struct TrialStatusResponse {
    pub trial_no: TrialNo,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error body the API attaches to failed requests.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct LatestVersion {
    pub latest: String,
}

/// One page of a match's trials.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialPage {
    pub is_first: bool,
    pub is_last: bool,
    pub trials: Vec<TrialSnapshot>,
}

impl TrialPage {
    /// Drops every trial that did not finish successfully.
    pub fn only_success(mut self) -> Self {
        self.trials
            .retain(|t| matches!(TrialState::from_status(&t.status), Ok(TrialState::Success)));
        self
    }
}

impl Display for TrialPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.trials.is_empty() {
            return writeln!(f, "No solutions to display.");
        }
        self.trials
            .iter()
            .map(|t| write!(f, "{}", TrialLine(t)))
            .collect::<std::fmt::Result>()
    }
}

/// Splits the trial range `start..=end` into `(first, limit)` requests of at
/// most `size` trials, walking from the top when `descending`.
/// Trial numbers start at 1, so a `start` of 0 means the first trial.
/// ```
/// use opthub_lib::schemas::page_windows;
///
/// assert_eq!(page_windows(0, 120, false, 50), vec![(1, 50), (51, 50), (101, 20)]);
/// assert_eq!(page_windows(10, 120, true, 50), vec![(120, 50), (70, 50), (20, 11)]);
/// assert!(page_windows(5, 4, false, 50).is_empty());
/// ```
pub fn page_windows(start: u64, end: u64, descending: bool, size: u64) -> Vec<(u64, u64)> {
    let first = start.max(1);
    if first > end || size == 0 {
        return Vec::new();
    }
    let size = size as usize;

    if descending {
        (first..=end)
            .rev()
            .step_by(size)
            .map(|top| (top, (top - first + 1).min(size as u64)))
            .collect()
    } else {
        (first..=end)
            .step_by(size)
            .map(|bottom| (bottom, (end - bottom + 1).min(size as u64)))
            .collect()
    }
}

/// Human readable label of a raw status string.
pub fn status_label(status: &str) -> &'static str {
    match TrialState::from_status(status) {
        Ok(TrialState::Evaluating) => "Evaluating",
        Ok(TrialState::Scoring) => "Scoring",
        Ok(TrialState::EvaluatorFailed) => "Failed to evaluate",
        Ok(TrialState::ScorerFailed) => "Failed to score",
        Ok(TrialState::Success) => "Success",
        Err(_) => "Unknown",
    }
}

/// One line summary of a trial.
/// ```
/// use opthub_core::model::{TrialNo, TrialSnapshot};
/// use opthub_lib::schemas::TrialLine;
///
/// let snapshot = TrialSnapshot::new(TrialNo::new(3).unwrap(), "scoring");
/// assert_eq!(TrialLine(&snapshot).to_string(), "#3 Scoring\n");
/// ```
pub struct TrialLine<'a>(pub &'a TrialSnapshot);

impl Display for TrialLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let trial = self.0;
        write!(f, "#{} {}", trial.trial_no, status_label(&trial.status))?;
        if let Some(evaluation) = &trial.evaluation {
            if let Some(objective) = &evaluation.objective {
                write!(f, " objective={}", objective)?;
            }
            match evaluation.feasible {
                Some(true) => write!(f, " feasible")?,
                Some(false) => write!(f, " infeasible")?,
                None => {}
            }
        }
        if let Some(value) = trial.score.as_ref().and_then(|s| s.value) {
            write!(f, " score={}", value)?;
        }
        writeln!(f)
    }
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

/// Multi line description of a trial.
pub struct TrialDetails<'a>(pub &'a TrialSnapshot);

impl Display for TrialDetails<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let trial = self.0;
        writeln!(f, "Trial : {}", trial.trial_no)?;
        writeln!(f, "Status : {}", status_label(&trial.status))?;
        if let Some(solution) = &trial.solution {
            writeln!(f, "Solution : {}", solution.variable)?;
            if let Some(created_at) = solution.created_at {
                writeln!(f, "Submitted At : {}", local_time(created_at))?;
            }
        }
        if let Some(evaluation) = &trial.evaluation {
            if let Some(objective) = &evaluation.objective {
                writeln!(f, "Objective : {}", objective)?;
            }
            if let Some(constraint) = &evaluation.constraint {
                writeln!(f, "Constraint : {}", constraint)?;
            }
            if let Some(feasible) = evaluation.feasible {
                writeln!(f, "Feasible : {}", feasible)?;
            }
            if let Some(info) = &evaluation.info {
                writeln!(f, "Info : {}", info)?;
            }
            if let (Some(start), Some(end)) = (evaluation.started_at, evaluation.finished_at) {
                let secs = (end - start).num_milliseconds() as f64 / 1000.0;
                writeln!(f, "Evaluation Time : {}s", secs)?;
            }
        }
        if let Some(score) = &trial.score {
            if let Some(value) = score.value {
                writeln!(f, "Score : {}", value)?;
            }
        }
        let error = trial
            .error
            .as_deref()
            .or_else(|| trial.evaluation.as_ref().and_then(|e| e.error.as_deref()))
            .or_else(|| trial.score.as_ref().and_then(|s| s.error.as_deref()));
        if let Some(error) = error {
            writeln!(f, "Error : {}", error)?;
        }
        Ok(())
    }
}
