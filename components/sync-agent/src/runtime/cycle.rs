// Local crates
use crate::engine::{
    branch::{BranchReport, sync_branch},
    context::SyncContext,
    ports::Connector,
};
use crate::helpers::connections::{ConnectionsError, load_connections, split_roles};
use crate::meta::models::SyncStatus;

// External crates
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use sync_common::instrumentation::tracing::SUCCESS_TARGET;
use tracing::instrument;

/// Outcome of one pass over every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub branches: Vec<BranchReport>,
    /// Why no branch was synced, when the cycle stopped early.
    pub aborted: Option<String>,
}

impl CycleReport {
    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            branches: Vec::new(),
            aborted: Some(reason.into()),
        }
    }

    /// Tables that ended `Complete`, across all branches.
    #[must_use]
    pub fn completed_tables(&self) -> usize {
        self.branches
            .iter()
            .flat_map(|b| &b.tables)
            .filter(|t| t.status == Some(SyncStatus::Complete))
            .count()
    }
}

/// Load the connection list and sync every source branch into the target,
/// at most `max_branch_workers` at a time.
#[instrument(name = "agent_sync_cycle", target = "runtime::cycle", level = "info", skip_all)]
pub async fn run_cycle<C: Connector>(ctx: Arc<SyncContext<C>>) -> CycleReport {
    tracing::info!("Starting sync cycle");

    let connections = match load_connections(&ctx.config.general.connections_file).await {
        Ok(connections) => connections,
        Err(e) => {
            tracing::error!(error = %e, "Cannot read connection configurations, aborting cycle");
            return CycleReport::aborted(e.to_string());
        }
    };

    let roles = match split_roles(connections) {
        Ok(roles) => roles,
        Err(e @ ConnectionsError::NoSources) => {
            tracing::warn!("No source connections configured, nothing to sync");
            return CycleReport::aborted(e.to_string());
        }
        Err(e) => {
            tracing::error!(error = %e, "No target connection configured, aborting cycle");
            return CycleReport::aborted(e.to_string());
        }
    };

    tracing::info!(
        target_server = %roles.target.label(),
        sources = roles.sources.len(),
        workers = ctx.config.workers.max_branch_workers,
        "Syncing branches"
    );

    let target = roles.target;
    let limit = ctx.config.workers.max_branch_workers.max(1);
    let mut branches: Vec<BranchReport> = stream::iter(roles.sources)
        .map(|source| {
            let label = source.label();
            let handle = tokio::spawn(sync_branch(ctx.clone(), source, target.clone()));
            async move {
                match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(source = %label, error = %e, "Branch task failed");
                        BranchReport {
                            source: label,
                            branch: None,
                            tables: Vec::new(),
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;
    branches.sort_by(|a, b| a.source.cmp(&b.source));

    for branch in &branches {
        match &branch.error {
            Some(error) => tracing::error!(source = %branch.source, error = %error, "Branch skipped"),
            None => tracing::info!(
                source = %branch.source,
                branch = branch.branch.as_deref().unwrap_or_default(),
                tables = branch.tables.len(),
                "Branch processed"
            ),
        }
    }

    let report = CycleReport {
        branches,
        aborted: None,
    };
    tracing::info!(
        target: SUCCESS_TARGET,
        branches = report.branches.len(),
        completed_tables = report.completed_tables(),
        "Sync cycle finished"
    );
    report
}
