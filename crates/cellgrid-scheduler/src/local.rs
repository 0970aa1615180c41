//! Hand-off to the host-level scheduler of this cell.

use async_trait::async_trait;
use cellgrid_core::{RequestContext, RunInstanceRequest};

/// Places instances on hosts inside the local cell.
///
/// Called after the instance records and create actions exist; an error
/// makes the scheduler move on to the next candidate.
#[async_trait]
pub trait LocalPlacer: Send + Sync {
    async fn run_instance(
        &self,
        ctx: &RequestContext,
        request: &RunInstanceRequest,
    ) -> anyhow::Result<()>;
}
