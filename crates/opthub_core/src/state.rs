use std::fmt::Display;

use crate::error::{OptHubError, Result};

/// Trial lifecycle as reported by the server. `Scoring` may be skipped
/// between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialState {
    Evaluating,
    Scoring,
    EvaluatorFailed,
    ScorerFailed,
    Success,
}

impl TrialState {
    pub const ALL: [TrialState; 5] = [
        TrialState::Evaluating,
        TrialState::Scoring,
        TrialState::EvaluatorFailed,
        TrialState::ScorerFailed,
        TrialState::Success,
    ];

    /// Maps a raw server status to a state.
    ///
    /// Both `snake_case` and `PascalCase` spellings are accepted. Anything
    /// else is [OptHubError::UnknownStatus].
    /// ```
    /// use opthub_core::state::TrialState;
    ///
    /// assert_eq!(TrialState::from_status("scorer_failed").unwrap(), TrialState::ScorerFailed);
    /// assert_eq!(TrialState::from_status("EvaluatorFailed").unwrap(), TrialState::EvaluatorFailed);
    /// assert!(TrialState::from_status("quantum_flux").is_err());
    /// ```
    pub fn from_status(raw: &str) -> Result<TrialState> {
        let key: String = raw
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "evaluating" => Ok(TrialState::Evaluating),
            "scoring" => Ok(TrialState::Scoring),
            "evaluatorfailed" => Ok(TrialState::EvaluatorFailed),
            "scorerfailed" => Ok(TrialState::ScorerFailed),
            "success" => Ok(TrialState::Success),
            _ => Err(OptHubError::UnknownStatus {
                status: raw.to_string(),
                trial_no: None,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrialState::Evaluating => "evaluating",
            TrialState::Scoring => "scoring",
            TrialState::EvaluatorFailed => "evaluator_failed",
            TrialState::ScorerFailed => "scorer_failed",
            TrialState::Success => "success",
        }
    }

    /// Polling stops once a terminal state is observed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrialState::EvaluatorFailed | TrialState::ScorerFailed | TrialState::Success
        )
    }

    /// Position in the lifecycle; states on different branches share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            TrialState::Evaluating => 0,
            TrialState::Scoring | TrialState::EvaluatorFailed => 1,
            TrialState::Success | TrialState::ScorerFailed => 2,
        }
    }

    /// Whether a snapshot in `next` may follow one in `self`.
    pub fn can_advance_to(&self, next: TrialState) -> bool {
        use TrialState::*;

        match (self, next) {
            (a, b) if *a == b => true,
            (Evaluating, _) => true,
            (Scoring, Success | ScorerFailed) => true,
            _ => false,
        }
    }

    /// Whether the evaluation phase has finished, successfully or not.
    pub fn evaluation_finished(&self) -> bool {
        !matches!(self, TrialState::Evaluating)
    }

    /// Whether the scoring phase has finished or will never start.
    pub fn scoring_finished(&self) -> bool {
        !matches!(self, TrialState::Evaluating | TrialState::Scoring)
    }
}

impl Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for state in TrialState::ALL {
            assert_eq!(TrialState::from_status(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn pascal_case_is_accepted() {
        assert_eq!(
            TrialState::from_status("Evaluating").unwrap(),
            TrialState::Evaluating
        );
        assert_eq!(TrialState::from_status("Success").unwrap(), TrialState::Success);
        assert_eq!(
            TrialState::from_status("ScorerFailed").unwrap(),
            TrialState::ScorerFailed
        );
    }

    #[test]
    fn unknown_status_is_not_coerced() {
        for raw in ["quantum_flux", "", "failed", "evaluating!", "succeeded"] {
            match TrialState::from_status(raw) {
                Err(OptHubError::UnknownStatus { status, .. }) => assert_eq!(status, raw),
                other => panic!("expected UnknownStatus for {:?}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<TrialState> = TrialState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                TrialState::EvaluatorFailed,
                TrialState::ScorerFailed,
                TrialState::Success
            ]
        );
    }

    #[test]
    fn transitions_never_lower_rank() {
        for from in TrialState::ALL {
            for to in TrialState::ALL {
                if from.can_advance_to(to) {
                    assert!(to.rank() >= from.rank(), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn terminal_states_only_repeat() {
        for from in TrialState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TrialState::ALL {
                assert_eq!(from.can_advance_to(to), from == to, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn branches_do_not_cross() {
        assert!(!TrialState::Scoring.can_advance_to(TrialState::EvaluatorFailed));
        assert!(!TrialState::Scoring.can_advance_to(TrialState::Evaluating));
        assert!(TrialState::Evaluating.can_advance_to(TrialState::Success));
    }
}
