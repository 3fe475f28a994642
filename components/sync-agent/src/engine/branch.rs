// Local crates
use crate::engine::{
    context::SyncContext,
    ports::{Connector, SourceSession, SyncError},
    table::{TableReport, sync_table},
};
use crate::helpers::connections::ConnectionConfig;

// External crates
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::instrument;

/// Outcome of one source database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReport {
    /// `server:port/database` of the source.
    pub source: String,
    /// Resolved branch identifier; `None` when the source was unreachable.
    pub branch: Option<String>,
    pub tables: Vec<TableReport>,
    /// Why the branch was skipped.
    pub error: Option<String>,
}

/// Resolve the branch identifier of `source`, then sync every configured
/// table with bounded concurrency.
#[instrument(
    name = "agent_branch_sync",
    target = "engine::branch",
    level = "info",
    skip_all,
    fields(source = %source.label())
)]
pub async fn sync_branch<C: Connector>(
    ctx: Arc<SyncContext<C>>,
    source: ConnectionConfig,
    target: ConnectionConfig,
) -> BranchReport {
    let branch = match resolve_branch_id(&ctx, &source).await {
        Ok(branch) => branch,
        Err(e) => {
            tracing::error!(error = %e, "Cannot connect to source, skipping branch");
            return BranchReport {
                source: source.label(),
                branch: None,
                tables: Vec::new(),
                error: Some(e.to_string()),
            };
        }
    };
    tracing::info!(branch = %branch, "Syncing branch");

    let limit = ctx.config.workers.max_tables_per_branch.max(1);
    let syncs: Vec<_> = ctx
        .config
        .sync
        .tables
        .iter()
        .map(|table| sync_table(&ctx, &branch, &source, &target, table))
        .collect();
    let mut tables: Vec<TableReport> = stream::iter(syncs).buffer_unordered(limit).collect().await;
    tables.sort_by(|a, b| a.table.cmp(&b.table));

    tracing::info!(branch = %branch, tables = tables.len(), "Branch finished");
    BranchReport {
        source: source.label(),
        branch: Some(branch),
        tables,
        error: None,
    }
}

/// The label query's first value, trimmed and lowercased; the database name
/// when the query fails or returns nothing. Errors only when the source
/// cannot be opened.
pub async fn resolve_branch_id<C: Connector>(
    ctx: &SyncContext<C>,
    source: &ConnectionConfig,
) -> Result<String, SyncError> {
    let mut session = ctx.connector.open_source(source).await?;

    let label = match session.first_text(&ctx.config.general.branch_label_query).await {
        Ok(label) => label.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "Branch label query failed");
            None
        }
    };

    Ok(label.unwrap_or_else(|| {
        let fallback = source.database.to_lowercase();
        tracing::warn!(fallback = %fallback, "No branch label found, using database name");
        fallback
    }))
}
