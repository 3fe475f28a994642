pub mod models;
pub mod statements;
