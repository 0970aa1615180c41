//! CellsScheduler — picks where a run-instance request goes next.
//!
//! One call to [`CellsScheduler::run_instance`] makes up to `retries + 1`
//! scheduling attempts. Each attempt takes a fresh topology snapshot, runs
//! the pipeline, then either executes a routing directive or walks the
//! ranked cells until one accepts the request. When every attempt fails,
//! or the failure is not retryable, every requested instance is marked
//! errored both upward and locally.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cellgrid_core::config::SchedulerConfig;
use cellgrid_core::{
    epoch_secs, CellMessage, CellState, HierarchyMessenger, InstanceAction, InstanceStore,
    InstanceUpdate, RequestContext, RoutingPath, RunInstanceRequest, TopologyProvider, VmState,
};
use cellgrid_placement::{FilterProperties, Pipeline, PipelineOutcome, build_pipeline};
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::local::LocalPlacer;

/// Where a successful attempt sent the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Instances were created in this cell and handed to the local placer.
    Local { cell: String },
    /// Forwarded to a ranked child cell.
    Forwarded { target: RoutingPath },
    /// Forwarded by a routing directive, without ranking.
    DirectRouted { target: RoutingPath },
    /// A filter took care of the request.
    Handled,
}

/// The cell-level scheduler.
///
/// Collaborators are injected at construction and shared behind `Arc`, so
/// one scheduler can serve concurrent requests.
pub struct CellsScheduler {
    topology: Arc<dyn TopologyProvider>,
    messenger: Arc<dyn HierarchyMessenger>,
    instances: Arc<dyn InstanceStore>,
    placer: Arc<dyn LocalPlacer>,
    pipeline: Pipeline,
    retries: u32,
    retry_delay: Duration,
}

impl CellsScheduler {
    /// Create a scheduler whose pipeline is built from the configured names.
    pub fn new(
        config: &SchedulerConfig,
        topology: Arc<dyn TopologyProvider>,
        messenger: Arc<dyn HierarchyMessenger>,
        instances: Arc<dyn InstanceStore>,
        placer: Arc<dyn LocalPlacer>,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            topology,
            messenger,
            instances,
            placer,
            pipeline: build_pipeline(config)?,
            retries: config.retry_count(),
            retry_delay: config.retry_delay(),
        })
    }

    /// Replace the configured pipeline.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Schedule a request that arrived at this cell along `routing_path`.
    ///
    /// On failure every requested instance has already been marked errored
    /// when this returns.
    pub async fn run_instance(
        &self,
        ctx: &RequestContext,
        routing_path: &RoutingPath,
        request: &RunInstanceRequest,
    ) -> SchedulerResult<ScheduleOutcome> {
        let result = match request.validate() {
            Ok(()) => self.run_with_retries(ctx, routing_path, request).await,
            Err(e) => Err(SchedulerError::from(e)),
        };
        if let Err(e) = &result {
            error!(
                error = %e,
                instance_uuids = ?request.instance_uuids(),
                "error scheduling instances"
            );
            self.mark_errored(ctx, request.instance_uuids()).await;
        }
        result
    }

    async fn run_with_retries(
        &self,
        ctx: &RequestContext,
        routing_path: &RoutingPath,
        request: &RunInstanceRequest,
    ) -> SchedulerResult<ScheduleOutcome> {
        let mut attempt: u32 = 0;
        loop {
            match self.schedule_once(ctx, routing_path, request).await {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    info!(
                        attempt,
                        retries = self.retries,
                        sleep_secs = self.retry_delay.as_secs(),
                        "no cells available when scheduling, will retry"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    /// One scheduling attempt against a fresh topology snapshot.
    async fn schedule_once(
        &self,
        ctx: &RequestContext,
        routing_path: &RoutingPath,
        request: &RunInstanceRequest,
    ) -> SchedulerResult<ScheduleOutcome> {
        debug!(%routing_path, "scheduling");

        let cells = self.possible_cells()?;
        let mut props = FilterProperties::new(ctx, routing_path, request);

        let ranked = match self.pipeline.run(cells, &mut props)? {
            PipelineOutcome::Ranked(ranked) => ranked,
            PipelineOutcome::Directive(directive) => {
                let forwarded = forwarded_request(request, &props);
                let message = CellMessage::ScheduleRunInstance {
                    ctxt: ctx.clone(),
                    routing_path: directive.target.clone(),
                    request: forwarded,
                };
                info!(route = %directive.target, "executing direct route");
                self.messenger
                    .cast(&directive.target, message)
                    .await
                    .map_err(|source| SchedulerError::DirectRoute {
                        target: directive.target.clone(),
                        source,
                    })?;
                return Ok(ScheduleOutcome::DirectRouted {
                    target: directive.target,
                });
            }
            PipelineOutcome::Handled => return Ok(ScheduleOutcome::Handled),
            PipelineOutcome::NoCandidates => return Err(SchedulerError::NoCellsAvailable),
        };

        debug!(
            weighted_cells = ?ranked.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "weighted cells"
        );

        for weighted in &ranked {
            let cell = &weighted.cell;
            let attempt = if cell.is_me {
                self.place_here(ctx, request)
                    .await
                    .map(|()| ScheduleOutcome::Local {
                        cell: cell.name.clone(),
                    })
            } else {
                self.forward_to(ctx, routing_path, cell, request, &props)
                    .await
                    .map(|target| ScheduleOutcome::Forwarded { target })
            };
            match attempt {
                Ok(outcome) => {
                    info!(cell = %cell.name, score = weighted.score, "request scheduled");
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(cell = %cell.name, error = %format!("{e:#}"), "couldn't communicate with cell");
                }
            }
        }

        error!("couldn't communicate with any cells");
        Err(SchedulerError::NoCellsAvailable)
    }

    /// Children, plus this cell when there are no children or it reports capacity.
    fn possible_cells(&self) -> SchedulerResult<Vec<CellState>> {
        let mut cells = self.topology.child_cells()?;
        let me = self.topology.my_cell()?;
        if cells.is_empty() || me.has_capacities() {
            cells.push(me);
        }
        Ok(cells)
    }

    /// Create the instances in this cell and hand them to the local placer.
    async fn place_here(
        &self,
        ctx: &RequestContext,
        request: &RunInstanceRequest,
    ) -> anyhow::Result<()> {
        let spec = &request.request_spec;
        let uuids = request.instance_uuids();
        let num_instances = uuids.len() as u32;

        for (index, uuid) in uuids.iter().enumerate() {
            let record = self
                .instances
                .create_instance(spec, uuid, num_instances, index as u32)
                .with_context(|| format!("creating instance {uuid}"))?;
            self.messenger
                .broadcast_up(CellMessage::InstanceUpdateAtTop {
                    instance: InstanceUpdate::from(&record),
                })
                .await
                .with_context(|| format!("sending instance {uuid} to the top"))?;
        }

        let now = epoch_secs();
        for uuid in uuids {
            self.instances
                .action_start(&InstanceAction::create_started(ctx, uuid, now))
                .with_context(|| format!("recording create action for {uuid}"))?;
        }

        self.placer.run_instance(ctx, request).await
    }

    /// Cast the request to a child cell. Returns the child's path.
    async fn forward_to(
        &self,
        ctx: &RequestContext,
        routing_path: &RoutingPath,
        cell: &CellState,
        request: &RunInstanceRequest,
        props: &FilterProperties,
    ) -> anyhow::Result<RoutingPath> {
        let target = routing_path.child(&cell.name);
        let message = CellMessage::ScheduleRunInstance {
            ctxt: ctx.clone(),
            routing_path: target.clone(),
            request: forwarded_request(request, props),
        };
        self.messenger
            .cast(&target, message)
            .await
            .with_context(|| format!("casting to {target}"))?;
        Ok(target)
    }

    /// Flip every requested instance to `error`, upward and locally.
    ///
    /// Nothing here fails the caller; problems are logged.
    async fn mark_errored(&self, ctx: &RequestContext, uuids: &[String]) {
        for uuid in uuids.iter().filter(|u| !u.trim().is_empty()) {
            let update = CellMessage::InstanceUpdateAtTop {
                instance: InstanceUpdate::error(uuid),
            };
            if let Err(e) = self.messenger.broadcast_up(update).await {
                warn!(%uuid, error = %e, "failed to send error state to the top");
            }
            if let Err(e) = self.instances.set_vm_state(uuid, VmState::Error) {
                debug!(%uuid, error = %e, user_id = %ctx.user_id, "local error state not recorded");
            }
        }
    }
}

/// The request as the next cell should see it, with consumed hints stripped.
fn forwarded_request(request: &RunInstanceRequest, props: &FilterProperties) -> RunInstanceRequest {
    let mut forwarded = request.clone();
    forwarded.filter_properties.scheduler_hints = props.scheduler_hints.clone();
    forwarded
}
