//! Service wrapper for the multi-sync program.
//!
//! Under a service manager the wrapper makes sure the log directory exists,
//! picks how to start the sync program (directly, or through an isolated
//! runtime environment), runs it from the installation root, tees its merged
//! stdout/stderr into `service_stdout.log` and exits with the child's status
//! so the manager's restart policy can act on it.

pub mod cli;
pub mod helpers;
pub mod launcher;
pub mod runtime;
