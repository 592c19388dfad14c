//! RAII guard for a single run.
//!
//! The guard walks the run through its lifecycle states and publishes the
//! matching events. A run future dropped mid-flight, typically by a host
//! timeout, leaves the guard short of `Done`; dropping it then reports the
//! run as abandoned.

use phaseflow_core::RunState;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use events::Event;

use crate::core::OrderedEventEmitter;
use crate::error::{Result, SchedulerError};
use crate::state_machine::RunStateMachine;

pub struct RunGuard {
    run_id: Uuid,
    state: RunState,
    failed: bool,
    started_at: Instant,
    emitter: Option<OrderedEventEmitter>,
}

impl RunGuard {
    /// Create a guard in the `Start` state with a fresh run id.
    pub fn new(emitter: Option<OrderedEventEmitter>) -> Self {
        Self::with_run_id(Uuid::new_v4(), emitter)
    }

    /// Create a guard for a run id chosen by the caller.
    pub fn with_run_id(run_id: Uuid, emitter: Option<OrderedEventEmitter>) -> Self {
        debug!(run_id = %run_id, "Run guard created");

        Self {
            run_id,
            state: RunState::Start,
            failed: false,
            started_at: Instant::now(),
            emitter,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether the regular phases failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Enter the regular phases.
    pub fn start(&mut self, phases: usize) -> Result<()> {
        self.emit(Event::RunStarted {
            run_id: self.run_id,
            phases,
        });
        self.advance(RunState::RunningRegular)
    }

    /// Record a regular-phase failure and enter the error phase.
    pub fn fail(&mut self, error: &SchedulerError) -> Result<()> {
        self.failed = true;
        self.emit(Event::RunFailed {
            run_id: self.run_id,
            error: error.to_string(),
        });
        self.advance(RunState::RunningError)
    }

    /// Move to `to`, validating the transition.
    pub fn advance(&mut self, to: RunState) -> Result<()> {
        RunStateMachine::validate_transition(&self.state, &to)?;
        debug!(
            run_id = %self.run_id,
            from = %self.state,
            to = %to,
            "Run state changed"
        );
        self.emit(Event::RunStateChanged {
            run_id: self.run_id,
            from_state: self.state.as_str().to_string(),
            to_state: to.as_str().to_string(),
        });
        self.state = to;
        Ok(())
    }

    /// Enter `Done` and publish the outcome.
    ///
    /// `success` is false when the regular phases failed, even if the error
    /// phase handled it.
    pub fn finish(&mut self, result: &Result<()>) -> Result<()> {
        self.advance(RunState::Done)?;
        let success = !self.failed && result.is_ok();
        let duration_ms = self.started_at.elapsed().as_millis() as u64;
        debug!(
            run_id = %self.run_id,
            success,
            duration_ms,
            "Run finished"
        );
        self.emit(Event::RunFinished {
            run_id: self.run_id,
            success,
            duration_ms,
        });
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(ref emitter) = self.emitter {
            emitter.emit(event);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            warn!(
                run_id = %self.run_id,
                state = %self.state,
                "Run dropped before finishing - reporting it abandoned"
            );
            self.emit(Event::RunAbandoned {
                run_id: self.run_id,
                state: self.state.as_str().to_string(),
            });
        }
    }
}

impl std::fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("failed", &self.failed)
            .finish()
    }
}
