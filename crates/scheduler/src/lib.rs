pub mod core;
pub mod error;
pub mod phase_list;
pub mod resources;
pub mod state_machine;

pub use crate::core::{
    as_runnable, handler_fn, Chain, ExecutionContext, FnHandler, Handler, HandlerList,
    OrderedEventEmitter, Phase, Runnable, TaggedHandler,
};
pub use error::{Result, SchedulerError};
pub use phase_list::PhaseList;
pub use phaseflow_core::{merge, PhaseOptions, RunState, Sub, ERROR_PHASE, FINAL_PHASE};
pub use resources::RunGuard;
pub use state_machine::RunStateMachine;
