//! Branch and table sync against the driver-independent ports.

pub mod branch;
pub mod context;
pub mod ports;
pub mod table;
pub mod watermark;
