// Retrain Cycle State Machine
//
// One iteration moves through
// Pending -> Evaluated -> (Triggered | Skipped) -> Blended -> Retrained -> Persisted.
// Transitions only check order; nothing here touches the store.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single retrain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    /// Nothing has happened yet.
    Pending,

    /// Drift between reference and current has been measured.
    Evaluated,

    /// Drift exceeded the trigger threshold.
    Triggered,

    /// Drift did not exceed the trigger threshold. Terminal.
    Skipped,

    /// A blended reference has been produced.
    Blended,

    /// A new model has been fitted.
    Retrained,

    /// Reference, model and report have been published. Terminal.
    Persisted,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Skipped | CycleState::Persisted)
    }
}

/// Step taken by the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    Evaluate,
    Trigger,
    Skip,
    Blend,
    Retrain,
    Persist,
}

/// Rejected cycle transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal cycle transition: {0}")]
    IllegalTransition(String),
}

/// Stateful reducer for cycle events.
#[derive(Debug)]
pub struct CycleStateMachine {
    state: CycleState,
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStateMachine {
    pub fn new() -> Self {
        Self {
            state: CycleState::Pending,
        }
    }

    /// Apply a single event to the state machine.
    pub fn apply(&mut self, event: CycleEvent) -> Result<CycleState, StateError> {
        use CycleEvent::*;
        use CycleState::*;

        self.state = match (self.state, event) {
            (Pending, Evaluate) => Evaluated,

            (Evaluated, Trigger) => Triggered,
            (Evaluated, Skip) => Skipped,

            (Triggered, Blend) => Blended,
            (Blended, Retrain) => Retrained,
            (Retrained, Persist) => Persisted,

            (state, evt) => {
                return Err(StateError::IllegalTransition(format!(
                    "cannot apply {:?} while in {:?}",
                    evt, state
                )))
            }
        };

        Ok(self.state)
    }

    pub fn current_state(&self) -> CycleState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggered_lifecycle() {
        let mut sm = CycleStateMachine::new();

        for (event, expected) in [
            (CycleEvent::Evaluate, CycleState::Evaluated),
            (CycleEvent::Trigger, CycleState::Triggered),
            (CycleEvent::Blend, CycleState::Blended),
            (CycleEvent::Retrain, CycleState::Retrained),
            (CycleEvent::Persist, CycleState::Persisted),
        ] {
            assert_eq!(sm.apply(event).unwrap(), expected);
        }
        assert!(sm.current_state().is_terminal());
    }

    #[test]
    fn skipped_lifecycle() {
        let mut sm = CycleStateMachine::new();
        sm.apply(CycleEvent::Evaluate).unwrap();
        sm.apply(CycleEvent::Skip).unwrap();

        assert_eq!(sm.current_state(), CycleState::Skipped);
        assert!(sm.current_state().is_terminal());
    }

    #[test]
    fn persisting_before_retraining_is_rejected() {
        let mut sm = CycleStateMachine::new();
        sm.apply(CycleEvent::Evaluate).unwrap();
        sm.apply(CycleEvent::Trigger).unwrap();

        let err = sm.apply(CycleEvent::Persist).unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition(_)));
    }

    #[test]
    fn skipped_cycle_cannot_blend() {
        let mut sm = CycleStateMachine::new();
        sm.apply(CycleEvent::Evaluate).unwrap();
        sm.apply(CycleEvent::Skip).unwrap();

        assert!(sm.apply(CycleEvent::Blend).is_err());
    }
}
