//! Command line interface.

#[allow(clippy::module_inception)]
pub mod cli;
