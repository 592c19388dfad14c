mod phase;
mod run;

pub use phase::{PhaseOptions, Sub, ERROR_PHASE, FINAL_PHASE};
pub use run::RunState;
