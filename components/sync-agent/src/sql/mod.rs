//! SQL text building and driver-independent values.

pub mod identifiers;
pub mod query;
pub mod upsert;
pub mod values;
