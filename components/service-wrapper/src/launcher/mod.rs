//! Launch strategies, output capture and child supervision.

pub mod errors;
pub mod strategy;
pub mod supervisor;
pub mod tee;
