//! Run lifecycle state machine.
//!
//! ```text
//!            Started            AnalyzerSucceeded          ScorerSucceeded
//! PENDING ───────────> RUNNING ───────────────────> ANALYZED ───────────────> DONE
//!                        │  ^                          │
//!                 Failed │  │ Started                  │ Failed
//!                        v  │                          v
//!                       ERROR <────────────────────────┘
//! ```
//!
//! `Reset` returns any status except `RUNNING` to `PENDING`. The transition
//! function is pure; the worker applies its result to the store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::RunStatus;

/// Outcome of a pipeline step, fed into [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// A worker picked the run up.
    Started,
    /// Analyzer output is persisted (or was already present).
    AnalyzerSucceeded,
    /// Scorer output and overall score are persisted.
    ScorerSucceeded,
    /// An unrecoverable failure in the current phase.
    Failed,
    /// Explicit reset requested by an operator.
    Reset,
}

impl PhaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::AnalyzerSucceeded => "analyzer_succeeded",
            Self::ScorerSucceeded => "scorer_succeeded",
            Self::Failed => "failed",
            Self::Reset => "reset",
        }
    }
}

impl std::fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal run transition: {from} --{outcome}-->")]
pub struct TransitionError {
    pub from: RunStatus,
    pub outcome: PhaseOutcome,
}

/// Compute the next status for `(current, outcome)`.
pub fn transition(current: RunStatus, outcome: PhaseOutcome) -> Result<RunStatus, TransitionError> {
    use PhaseOutcome as O;
    use RunStatus as S;

    let next = match (current, outcome) {
        (S::Pending | S::Error, O::Started) => S::Running,
        (S::Running, O::AnalyzerSucceeded) => S::Analyzed,
        (S::Analyzed, O::ScorerSucceeded) => S::Done,
        (S::Running | S::Analyzed, O::Failed) => S::Error,
        (S::Pending | S::Analyzed | S::Done | S::Error, O::Reset) => S::Pending,
        _ => {
            return Err(TransitionError {
                from: current,
                outcome,
            });
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [RunStatus; 5] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Analyzed,
        RunStatus::Done,
        RunStatus::Error,
    ];

    const ALL_OUTCOMES: [PhaseOutcome; 5] = [
        PhaseOutcome::Started,
        PhaseOutcome::AnalyzerSucceeded,
        PhaseOutcome::ScorerSucceeded,
        PhaseOutcome::Failed,
        PhaseOutcome::Reset,
    ];

    #[test]
    fn happy_path_walks_every_phase() {
        let mut status = RunStatus::Pending;
        for outcome in [
            PhaseOutcome::Started,
            PhaseOutcome::AnalyzerSucceeded,
            PhaseOutcome::ScorerSucceeded,
        ] {
            status = transition(status, outcome).unwrap();
        }
        assert_eq!(status, RunStatus::Done);
    }

    #[test]
    fn failures_lead_to_error_from_active_states_only() {
        assert_eq!(
            transition(RunStatus::Running, PhaseOutcome::Failed),
            Ok(RunStatus::Error)
        );
        assert_eq!(
            transition(RunStatus::Analyzed, PhaseOutcome::Failed),
            Ok(RunStatus::Error)
        );
        assert!(transition(RunStatus::Pending, PhaseOutcome::Failed).is_err());
        assert!(transition(RunStatus::Done, PhaseOutcome::Failed).is_err());
    }

    #[test]
    fn error_restarts_into_running() {
        assert_eq!(
            transition(RunStatus::Error, PhaseOutcome::Started),
            Ok(RunStatus::Running)
        );
    }

    #[test]
    fn no_transition_skips_a_phase() {
        // Scorer success is only legal after the analyzer phase.
        assert!(transition(RunStatus::Running, PhaseOutcome::ScorerSucceeded).is_err());
        assert!(transition(RunStatus::Pending, PhaseOutcome::AnalyzerSucceeded).is_err());
        assert!(transition(RunStatus::Pending, PhaseOutcome::ScorerSucceeded).is_err());
        assert!(transition(RunStatus::Error, PhaseOutcome::ScorerSucceeded).is_err());
    }

    #[test]
    fn done_only_leaves_through_reset() {
        for outcome in ALL_OUTCOMES {
            let result = transition(RunStatus::Done, outcome);
            if outcome == PhaseOutcome::Reset {
                assert_eq!(result, Ok(RunStatus::Pending));
            } else {
                assert!(result.is_err(), "DONE accepted {}", outcome);
            }
        }
    }

    #[test]
    fn running_cannot_be_reset() {
        let err = transition(RunStatus::Running, PhaseOutcome::Reset).unwrap_err();
        assert_eq!(err.from, RunStatus::Running);
        assert!(err.to_string().contains("RUNNING"));
    }

    #[test]
    fn legal_edge_table_is_exact() {
        let mut legal = Vec::new();
        for status in ALL_STATUSES {
            for outcome in ALL_OUTCOMES {
                if let Ok(next) = transition(status, outcome) {
                    legal.push((status, outcome, next));
                }
            }
        }
        assert_eq!(legal.len(), 10);
        // Forward edges never move backwards except through Started (retry) and Reset.
        for (from, outcome, to) in legal {
            if to == RunStatus::Pending {
                assert_eq!(outcome, PhaseOutcome::Reset);
            }
            if from == RunStatus::Error && to == RunStatus::Running {
                assert_eq!(outcome, PhaseOutcome::Started);
            }
        }
    }
}
