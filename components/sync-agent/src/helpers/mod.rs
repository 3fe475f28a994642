//! Configuration and connection list loading.

pub mod connections;
pub mod load_config;
