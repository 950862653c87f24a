//! Step state machine.

use serde::{Deserialize, Serialize};

/// The state of one saga step.
///
/// State transitions:
/// ```text
///   Pending ─success─► Completed ─(reverse walk)─► Compensating ─► Compensated
///         └─failure─► Failed
///         └─timeout─► Failed
/// ```
///
/// A Pending step is either waiting for its turn or, once its command has
/// been dispatched, awaiting the correlated status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    /// The inverse command is in flight.
    Compensating,
    Compensated,
}

impl StepStatus {
    /// Whether moving from `self` to `next` respects the step state machine.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Completed)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Completed, StepStatus::Compensating)
                | (StepStatus::Compensating, StepStatus::Compensated)
        )
    }

    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Compensated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Compensating => "compensating",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(StepStatus::default(), StepStatus::Pending);
    }

    #[test]
    fn test_forward_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Failed));
        assert!(!StepStatus::Pending.can_transition_to(StepStatus::Compensated));
    }

    #[test]
    fn test_compensation_transitions() {
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Compensating));
        assert!(StepStatus::Compensating.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Compensating));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Compensated.is_terminal());
        assert!(!StepStatus::Completed.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::Compensating).unwrap();
        assert_eq!(json, "\"compensating\"");
    }
}
