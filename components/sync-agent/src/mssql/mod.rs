//! SQL Server implementation of the engine ports over `tiberius`.

pub mod connector;
pub mod session;
pub mod values;
