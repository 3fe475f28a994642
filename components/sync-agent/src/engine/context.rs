// Local crates
use crate::engine::ports::Connector;
use crate::helpers::load_config::AgentConfig;

// External crates
use sync_common::helpers::shutdown::Shutdown;

/// Everything a branch or table sync needs, shared across tasks behind an
/// `Arc`.
#[derive(Debug)]
pub struct SyncContext<C: Connector> {
    /// Opens database sessions.
    pub connector: C,
    pub config: AgentConfig,
    /// Checked between tables and between batches.
    pub shutdown: Shutdown,
}

impl<C: Connector> SyncContext<C> {
    pub fn new(connector: C, config: AgentConfig, shutdown: Shutdown) -> Self {
        Self {
            connector,
            config,
            shutdown,
        }
    }
}
