//! Source schema description and consolidated table alignment.

pub mod align;
pub mod catalog;
pub mod models;
pub mod types;
