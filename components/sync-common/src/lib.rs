//! Pieces shared by the `multi-sync` agent and its service wrapper: a
//! cancellation-based shutdown coordinator with OS signal wiring, and the
//! tracing subscriber setup both binaries log through.

pub mod helpers;
pub mod instrumentation;
