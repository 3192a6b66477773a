use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Lifecycle state of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Initialized,
    Validating,
    Validated,
    SettingUp,
    Setup,
    Optimizing,
    Optimized,
    Executing,
    Executed,
    Analyzing,
    Analyzed,
    Checkpointing,
    Checkpointed,
    Submitting,
    Submitted,
    TeardownInitialized,
    TeardownComplete,
    Complete,
    Cancelled,
    Errored,
}

impl StageState {
    /// Position on the forward lifecycle path; terminal failure states have none.
    fn rank(&self) -> Option<u8> {
        Some(match self {
            StageState::Initialized => 0,
            StageState::Validating => 1,
            StageState::Validated => 2,
            StageState::SettingUp => 3,
            StageState::Setup => 4,
            StageState::Optimizing => 5,
            StageState::Optimized => 6,
            StageState::Executing => 7,
            StageState::Executed => 8,
            StageState::Analyzing => 9,
            StageState::Analyzed => 10,
            StageState::Checkpointing => 11,
            StageState::Checkpointed => 12,
            StageState::Submitting => 13,
            StageState::Submitted => 14,
            StageState::TeardownInitialized => 15,
            StageState::TeardownComplete => 16,
            StageState::Complete => 17,
            StageState::Cancelled | StageState::Errored => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Complete | StageState::Cancelled | StageState::Errored
        )
    }

    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(&self, next: StageState) -> bool {
        match (self, next) {
            (StageState::Cancelled | StageState::Errored, _) => false,
            (_, StageState::Cancelled | StageState::Errored) => true,
            // Repeatable graphs re-enter setup from a completed run.
            (StageState::Complete, StageState::SettingUp | StageState::Setup) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks a stage's state and the path it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStateMachine {
    stage: String,
    state: StageState,
    path: Vec<StageState>,
}

impl StageStateMachine {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            state: StageState::Initialized,
            path: vec![StageState::Initialized],
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn path(&self) -> &[StageState] {
        &self.path
    }

    pub fn advance(&mut self, next: StageState) -> Result<(), StageError> {
        if !self.state.can_transition_to(next) {
            return Err(StageError::InvalidState {
                stage: self.stage.clone(),
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(stage = %self.stage, from = %self.state, to = %next, "Stage state changed");
        self.state = next;
        self.path.push(next);
        Ok(())
    }

    /// Moves to a terminal failure state unless already terminal.
    pub fn fail(&mut self, state: StageState) {
        if self.state.can_transition_to(state) {
            self.state = state;
            self.path.push(state);
        }
    }
}

/// True when `path` is a legal walk through the state machine.
pub fn is_monotone_path(path: &[StageState]) -> bool {
    path.windows(2).all(|w| w[0].can_transition_to(w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut machine = StageStateMachine::new("load");
        machine.advance(StageState::Executing).unwrap();
        machine.advance(StageState::Executed).unwrap();
        machine.advance(StageState::Complete).unwrap();
        assert_eq!(machine.state(), StageState::Complete);
        assert!(is_monotone_path(machine.path()));
    }

    #[test]
    fn test_backwards_rejected() {
        let mut machine = StageStateMachine::new("load");
        machine.advance(StageState::Executed).unwrap();
        let err = machine.advance(StageState::Executing).unwrap_err();
        assert!(matches!(
            err,
            StageError::InvalidState {
                from: StageState::Executed,
                to: StageState::Executing,
                ..
            }
        ));
    }

    #[test]
    fn test_complete_reenters_setup() {
        let mut machine = StageStateMachine::new("setup");
        machine.advance(StageState::SettingUp).unwrap();
        machine.advance(StageState::Setup).unwrap();
        machine.advance(StageState::Complete).unwrap();
        machine.advance(StageState::SettingUp).unwrap();
        assert!(is_monotone_path(machine.path()));
        assert!(!StageState::Complete.can_transition_to(StageState::Executing));
    }

    #[test]
    fn test_terminal_failures() {
        let mut machine = StageStateMachine::new("load");
        machine.advance(StageState::Executing).unwrap();
        machine.fail(StageState::Cancelled);
        assert_eq!(machine.state(), StageState::Cancelled);
        machine.fail(StageState::Errored);
        assert_eq!(machine.state(), StageState::Cancelled);
        assert!(machine.advance(StageState::Complete).is_err());
        assert!(is_monotone_path(machine.path()));
    }
}
