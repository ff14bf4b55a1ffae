//! Sync pipeline state machine using rust-fsm.
//!
//! ```text
//!                 ┌──CollectorSelected──► Collector
//! Uninitialized ──LoadSession──► SessionLoading ──ViewerSelected──► Viewer
//!       ▲                        │   └──NoRole──► Idle
//!       └────────LoadFailed──────┘
//! ```
//!
//! Collector, Viewer and Idle re-enter SessionLoading on `LoadSession`
//! (connectivity restored, role change). `Reset` returns any state to
//! Uninitialized.

use rust_fsm::*;
use serde::Serialize;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub pipeline_machine(Uninitialized)

    Uninitialized => {
        LoadSession => SessionLoading,
        Reset => Uninitialized
    },
    SessionLoading => {
        CollectorSelected => Collector,
        ViewerSelected => Viewer,
        NoRole => Idle,
        LoadFailed => Uninitialized,
        Reset => Uninitialized
    },
    Collector => {
        LoadSession => SessionLoading,
        Reset => Uninitialized
    },
    Viewer => {
        LoadSession => SessionLoading,
        Reset => Uninitialized
    },
    Idle => {
        LoadSession => SessionLoading,
        Reset => Uninitialized
    }
}

pub use pipeline_machine::Input as PipelineMachineInput;
pub use pipeline_machine::State as PipelineMachineState;
pub use pipeline_machine::StateMachine as PipelineMachine;

/// Pipeline state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    SessionLoading,
    Collector,
    Viewer,
    Idle,
}

impl PipelineState {
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Collector | PipelineState::Viewer)
    }
}

impl From<&PipelineMachineState> for PipelineState {
    fn from(state: &PipelineMachineState) -> Self {
        match state {
            PipelineMachineState::Uninitialized => PipelineState::Uninitialized,
            PipelineMachineState::SessionLoading => PipelineState::SessionLoading,
            PipelineMachineState::Collector => PipelineState::Collector,
            PipelineMachineState::Viewer => PipelineState::Viewer,
            PipelineMachineState::Idle => PipelineState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(fsm: &PipelineMachine) -> PipelineState {
        PipelineState::from(fsm.state())
    }

    #[test]
    fn collector_path() {
        let mut fsm = PipelineMachine::new();
        assert_eq!(state(&fsm), PipelineState::Uninitialized);

        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        assert_eq!(state(&fsm), PipelineState::SessionLoading);
        fsm.consume(&PipelineMachineInput::CollectorSelected).unwrap();
        assert_eq!(state(&fsm), PipelineState::Collector);
        assert!(state(&fsm).is_active());
    }

    #[test]
    fn role_change_reenters_loading() {
        let mut fsm = PipelineMachine::new();
        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        fsm.consume(&PipelineMachineInput::CollectorSelected).unwrap();

        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        fsm.consume(&PipelineMachineInput::ViewerSelected).unwrap();
        assert_eq!(state(&fsm), PipelineState::Viewer);
    }

    #[test]
    fn load_failure_and_no_role() {
        let mut fsm = PipelineMachine::new();
        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        fsm.consume(&PipelineMachineInput::LoadFailed).unwrap();
        assert_eq!(state(&fsm), PipelineState::Uninitialized);

        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        fsm.consume(&PipelineMachineInput::NoRole).unwrap();
        assert_eq!(state(&fsm), PipelineState::Idle);
        assert!(!state(&fsm).is_active());
    }

    #[test]
    fn role_selection_requires_loading() {
        let mut fsm = PipelineMachine::new();
        assert!(fsm.consume(&PipelineMachineInput::CollectorSelected).is_err());
        fsm.consume(&PipelineMachineInput::LoadSession).unwrap();
        assert!(fsm.consume(&PipelineMachineInput::LoadSession).is_err());
    }

    #[test]
    fn reset_from_every_state() {
        let paths: [&[PipelineMachineInput]; 5] = [
            &[],
            &[PipelineMachineInput::LoadSession],
            &[PipelineMachineInput::LoadSession, PipelineMachineInput::CollectorSelected],
            &[PipelineMachineInput::LoadSession, PipelineMachineInput::ViewerSelected],
            &[PipelineMachineInput::LoadSession, PipelineMachineInput::NoRole],
        ];
        for path in paths {
            let mut fsm = PipelineMachine::new();
            for input in path {
                fsm.consume(input).unwrap();
            }
            fsm.consume(&PipelineMachineInput::Reset).unwrap();
            assert_eq!(state(&fsm), PipelineState::Uninitialized);
        }
    }
}
