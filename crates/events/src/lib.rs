//! Run lifecycle events for phaseflow
//!
//! This crate provides the event bus and event types that let a host
//! observe `PhaseList::run` invocations without touching the handlers.

mod bus;
mod types;

pub use bus::{EventBus, RunSubscription};
pub use types::*;
