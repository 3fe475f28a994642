//! Multi-branch SQL Server consolidation agent.
//!
//! Every cycle reads the connection list, resolves a label for each branch
//! database and merges the configured tables into one consolidated database,
//! tagging each row with its branch. Progress per branch and table lives in
//! `[sync].[SyncMeta]` so an interrupted cycle resumes from its last
//! committed batch.
//!
//! The engine only talks to the ports in [`engine::ports`]; [`mssql`]
//! implements them over `tiberius`.

pub mod cli;
pub mod engine;
pub mod helpers;
pub mod meta;
pub mod mssql;
pub mod runtime;
pub mod schedule;
pub mod schema;
pub mod sql;
