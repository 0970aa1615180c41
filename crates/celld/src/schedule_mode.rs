//! Schedule mode — routes a single run-instance request and exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use cellgrid_core::{CellgridConfig, RequestContext, RoutingPath, RunInstanceRequest};
use cellgrid_scheduler::{CellsScheduler, LocalPlacer, ScheduleOutcome};

use crate::bootstrap;

pub struct ScheduleArgs {
    pub request: PathBuf,
    pub user: String,
    pub project: String,
    pub roles: Vec<String>,
}

/// Stands in for the host scheduler; records the hand-off and succeeds.
struct LoggingPlacer;

#[async_trait]
impl LocalPlacer for LoggingPlacer {
    async fn run_instance(
        &self,
        ctx: &RequestContext,
        request: &RunInstanceRequest,
    ) -> anyhow::Result<()> {
        info!(
            project = %ctx.project_id,
            instance_uuids = ?request.instance_uuids(),
            "handing request to local host scheduler"
        );
        Ok(())
    }
}

pub async fn run_schedule(
    config: CellgridConfig,
    data_dir: PathBuf,
    args: ScheduleArgs,
) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(&args.request)
        .with_context(|| format!("read request {}", args.request.display()))?;
    let value: serde_json::Value = serde_json::from_str(&body)?;
    let request = RunInstanceRequest::from_value(value)?;

    let state = bootstrap::open_state(&config, &data_dir)?;
    let (messenger, messenger_handle) = bootstrap::logging_messenger();
    let state = Arc::new(state);

    let scheduler = CellsScheduler::new(
        &config.scheduler,
        state.clone(),
        messenger,
        state,
        Arc::new(LoggingPlacer),
    )?;
    info!(pipeline = ?scheduler.pipeline(), "scheduler initialized");

    let mut ctx = RequestContext::new(args.user, args.project);
    ctx.roles = args.roles;
    let routing_path = RoutingPath::root(config.cell.name.clone());

    let outcome = scheduler.run_instance(&ctx, &routing_path, &request).await;

    // Let the logger drain anything the scheduler sent.
    tokio::task::yield_now().await;
    messenger_handle.abort();

    match outcome? {
        ScheduleOutcome::Local { cell } => println!("scheduled in local cell {cell}"),
        ScheduleOutcome::Forwarded { target } => println!("forwarded to {target}"),
        ScheduleOutcome::DirectRouted { target } => println!("routed directly to {target}"),
        ScheduleOutcome::Handled => println!("handled by filter"),
    }
    Ok(())
}
