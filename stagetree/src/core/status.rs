//! Stage status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage.
///
/// A stage starts in [`StageStatus::None`] and settles in exactly one
/// terminal state. Only a running stage has further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Freshly created; the scheduler has not decided how to treat it.
    None,
    /// Skipped because the stage or an ancestor is disabled.
    Disabled,
    /// Skipped this run by the run-mode selection rule; cached results
    /// remain available to descendants.
    Bypassed,
    /// The work closure is executing.
    Running,
    /// Work finished and any result was persisted.
    Completed,
    /// The work closure raised an unhandled fault.
    Errored,
    /// A cancellation signal was observed before or during work.
    Cancelled,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Disabled => write!(f, "disabled"),
            Self::Bypassed => write!(f, "bypassed"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true once no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::Bypassed | Self::Completed | Self::Errored | Self::Cancelled
        )
    }

    /// Returns true for the failure outcomes.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Errored | Self::Cancelled)
    }

    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::None => next != Self::None,
            Self::Running => matches!(next, Self::Completed | Self::Errored | Self::Cancelled),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(StageStatus::Bypassed.to_string(), "bypassed");
        assert_eq!(StageStatus::Errored.to_string(), "errored");
        assert_eq!(StageStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_default_is_none() {
        assert_eq!(StageStatus::default(), StageStatus::None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Errored.is_terminal());
        assert!(StageStatus::Cancelled.is_terminal());
        assert!(StageStatus::Disabled.is_terminal());
        assert!(StageStatus::Bypassed.is_terminal());
        assert!(!StageStatus::None.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_failure_states() {
        assert!(StageStatus::Errored.is_failure());
        assert!(StageStatus::Cancelled.is_failure());
        assert!(!StageStatus::Disabled.is_failure());
        assert!(!StageStatus::Completed.is_failure());
    }

    #[test]
    fn test_transitions_from_none() {
        for next in [
            StageStatus::Disabled,
            StageStatus::Bypassed,
            StageStatus::Running,
            StageStatus::Cancelled,
        ] {
            assert!(StageStatus::None.can_transition_to(next));
        }
        assert!(!StageStatus::None.can_transition_to(StageStatus::None));
    }

    #[test]
    fn test_transitions_from_running() {
        assert!(StageStatus::Running.can_transition_to(StageStatus::Completed));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Errored));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Cancelled));
        assert!(!StageStatus::Running.can_transition_to(StageStatus::Bypassed));
        assert!(!StageStatus::Running.can_transition_to(StageStatus::Disabled));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [
            StageStatus::Disabled,
            StageStatus::Bypassed,
            StageStatus::Completed,
            StageStatus::Errored,
            StageStatus::Cancelled,
        ] {
            assert!(!terminal.can_transition_to(StageStatus::Running));
            assert!(!terminal.can_transition_to(StageStatus::Completed));
        }
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&StageStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);
        let back: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageStatus::Completed);
    }
}
