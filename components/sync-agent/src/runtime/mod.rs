//! Agent main loop and sync cycles.

pub mod cycle;
#[allow(clippy::module_inception)]
pub mod runtime;
