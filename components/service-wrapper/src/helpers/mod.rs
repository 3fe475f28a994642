//! Configuration loading and log directory preparation.

pub mod load_config;
pub mod log_dir;
