//! Core abstractions for the phase execution model.
//!
//! - [`Handler`] - A unit of work registered on a phase
//! - [`Chain`] - Continuation handed to a handler for its position
//! - [`Runnable`] - A handler sequence bound to execution options
//! - [`Phase`] - Named group of before/use/after handler buckets
//! - [`ExecutionContext`] - Shared per-run key/value state
//! - [`OrderedEventEmitter`] - Event emitter with sequence guarantees

mod context;
mod events;
mod execution;
mod handler;
mod phase;

pub use context::ExecutionContext;
pub use events::OrderedEventEmitter;
pub use execution::{as_runnable, Chain, Runnable};
pub use handler::{handler_fn, FnHandler, Handler, HandlerList, TaggedHandler};
pub use phase::Phase;
