//! End-to-end wrapper run.

#[allow(clippy::module_inception)]
pub mod runtime;
