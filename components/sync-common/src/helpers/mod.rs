//! Runtime helpers.

pub mod shutdown;
