// Local crates
use crate::{
    engine::{context::SyncContext, ports::Connector},
    runtime::cycle::run_cycle,
    schedule::window::SyncWindow,
};

// External crates
use chrono::Local;
use std::sync::Arc;
use tracing::instrument;

/// How long the agent keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run cycles inside the allowed window until shutdown.
    Loop,
    /// One cycle right away, ignoring the window.
    Once,
}

/// Agent main loop. Returns once shutdown is requested, or after the single
/// cycle in [`RunMode::Once`].
#[instrument(name = "agent_runtime", target = "runtime::runtime", level = "info", skip_all, fields(mode = ?mode))]
pub async fn run_agent<C: Connector>(ctx: Arc<SyncContext<C>>, mode: RunMode) {
    if mode == RunMode::Once {
        run_cycle(ctx).await;
        return;
    }

    let schedule = &ctx.config.schedule;
    let window = SyncWindow::parse(&schedule.allowed_start_time, &schedule.allowed_end_time);
    tracing::info!(
        window = %window,
        run_interval_secs = schedule.run_interval_secs,
        "Multi-sync agent started"
    );

    while !ctx.shutdown.is_triggered() {
        let now = Local::now().time();
        if !window.contains(now) {
            tracing::info!(now = %now.format("%H:%M:%S"), window = %window, "Outside the allowed sync window, waiting");
            ctx.shutdown.sleep(schedule.window_check_interval()).await;
            continue;
        }

        let report = run_cycle(ctx.clone()).await;
        if ctx.shutdown.is_triggered() {
            break;
        }
        if let Some(reason) = &report.aborted {
            tracing::warn!(reason = %reason, "Cycle aborted");
        }

        tracing::info!(seconds = schedule.run_interval_secs, "Waiting for the next cycle");
        ctx.shutdown.sleep(schedule.run_interval()).await;
    }

    tracing::info!("Multi-sync agent stopped");
}
