//! Core domain types for phaseflow.
//!
//! This crate holds the pieces of the scheduler that need no runtime:
//!
//! - [`merge`] - the zip-merge that reconciles two phase orderings
//! - [`Sub`] - the bucket a handler is registered into
//! - [`PhaseOptions`] - per-phase execution policy
//! - [`RunState`] - lifecycle states of one run

pub mod domain;
pub mod error;
pub mod merge;

pub use domain::{PhaseOptions, RunState, Sub, ERROR_PHASE, FINAL_PHASE};
pub use error::CoreError;
pub use merge::merge;
