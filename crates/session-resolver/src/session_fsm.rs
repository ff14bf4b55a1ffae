//! Session lifecycle state machine using rust-fsm.
//!
//! ```text
//! Unloaded ──Load──► Loading ──LoadSucceeded──► Loaded ──Reload──► Reloading
//!    ▲                  │                          ▲                  │
//!    └───LoadFailed─────┘                          └──LoadSucceeded───┤
//!                                                  └──LoadFailed──────┘
//! SignOut from any state returns to Unloaded.
//! ```
//!
//! A failed reload keeps the previous snapshot, so it lands back in `Loaded`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unloaded)

    Unloaded => {
        Load => Loading,
        SignOut => Unloaded
    },
    Loading => {
        LoadSucceeded => Loaded,
        LoadFailed => Unloaded,
        SignOut => Unloaded
    },
    Loaded => {
        Reload => Reloading,
        SignOut => Unloaded
    },
    Reloading => {
        LoadSucceeded => Loaded,
        LoadFailed => Loaded,
        SignOut => Unloaded
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Loaded,
    Reloading,
}

impl SessionPhase {
    /// A snapshot is available (possibly being refreshed).
    pub fn has_snapshot(&self) -> bool {
        matches!(self, SessionPhase::Loaded | SessionPhase::Reloading)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unloaded => SessionPhase::Unloaded,
            SessionMachineState::Loading => SessionPhase::Loading,
            SessionMachineState::Loaded => SessionPhase::Loaded,
            SessionMachineState::Reloading => SessionPhase::Reloading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(fsm: &SessionMachine) -> SessionPhase {
        SessionPhase::from(fsm.state())
    }

    #[test]
    fn load_then_reload() {
        let mut fsm = SessionMachine::new();
        assert_eq!(phase(&fsm), SessionPhase::Unloaded);

        fsm.consume(&SessionMachineInput::Load).unwrap();
        fsm.consume(&SessionMachineInput::LoadSucceeded).unwrap();
        assert_eq!(phase(&fsm), SessionPhase::Loaded);

        fsm.consume(&SessionMachineInput::Reload).unwrap();
        assert!(phase(&fsm).has_snapshot());
        fsm.consume(&SessionMachineInput::LoadFailed).unwrap();
        assert_eq!(phase(&fsm), SessionPhase::Loaded);
    }

    #[test]
    fn failed_first_load_returns_to_unloaded() {
        let mut fsm = SessionMachine::new();
        fsm.consume(&SessionMachineInput::Load).unwrap();
        fsm.consume(&SessionMachineInput::LoadFailed).unwrap();
        assert_eq!(phase(&fsm), SessionPhase::Unloaded);
    }

    #[test]
    fn reload_requires_loaded() {
        let mut fsm = SessionMachine::new();
        assert!(fsm.consume(&SessionMachineInput::Reload).is_err());
        fsm.consume(&SessionMachineInput::Load).unwrap();
        assert!(fsm.consume(&SessionMachineInput::Load).is_err());
    }

    #[test]
    fn sign_out_from_any_state() {
        for prefix in [
            vec![],
            vec![SessionMachineInput::Load],
            vec![SessionMachineInput::Load, SessionMachineInput::LoadSucceeded],
            vec![
                SessionMachineInput::Load,
                SessionMachineInput::LoadSucceeded,
                SessionMachineInput::Reload,
            ],
        ] {
            let mut fsm = SessionMachine::new();
            for input in &prefix {
                fsm.consume(input).unwrap();
            }
            fsm.consume(&SessionMachineInput::SignOut).unwrap();
            assert_eq!(phase(&fsm), SessionPhase::Unloaded);
        }
    }
}
