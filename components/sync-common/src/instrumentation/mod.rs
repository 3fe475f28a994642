//! Tracing subscriber and panic hook installation.

pub mod tracing;
