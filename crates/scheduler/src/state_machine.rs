use phaseflow_core::RunState;

use crate::error::{Result, SchedulerError};

/// Transition rules for one `PhaseList::run` invocation.
///
/// Every path ends with `RunningFinal -> Done`; the error phase is only
/// entered from the regular phases.
pub struct RunStateMachine;

impl RunStateMachine {
    pub fn validate_transition(from: &RunState, to: &RunState) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &RunState) -> &'static [RunState] {
        match from {
            RunState::Start => &[RunState::RunningRegular],
            RunState::RunningRegular => &[RunState::RunningError, RunState::RunningFinal],
            RunState::RunningError => &[RunState::RunningFinal],
            RunState::RunningFinal => &[RunState::Done],
            RunState::Done => &[],
        }
    }

    pub fn can_transition(from: &RunState, to: &RunState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// The state a successful step leads to.
    pub fn next_state(current: &RunState) -> Option<RunState> {
        match current {
            RunState::Start => Some(RunState::RunningRegular),
            RunState::RunningRegular | RunState::RunningError => Some(RunState::RunningFinal),
            RunState::RunningFinal => Some(RunState::Done),
            RunState::Done => None,
        }
    }
}
