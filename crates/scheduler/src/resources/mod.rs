//! RAII guards for run bookkeeping.
//!
//! - [`RunGuard`] - lifecycle tracking and abandoned-run reporting

mod run_guard;

pub use run_guard::RunGuard;
