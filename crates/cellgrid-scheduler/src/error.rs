//! Scheduler error types.

use cellgrid_core::{MessengerError, RequestError, RoutingPath, TopologyError};
use cellgrid_placement::{FilterError, RegistryError};
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no cells available")]
    NoCellsAvailable,

    #[error("malformed request: {0}")]
    MalformedRequest(#[from] RequestError),

    #[error("direct route to {target} failed: {source}")]
    DirectRoute {
        target: RoutingPath,
        #[source]
        source: MessengerError,
    },

    #[error("invalid routing directive: {0}")]
    InvalidTarget(#[from] FilterError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("pipeline configuration error: {0}")]
    Registry(#[from] RegistryError),
}

impl SchedulerError {
    /// Only "no cells available" is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::NoCellsAvailable)
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
