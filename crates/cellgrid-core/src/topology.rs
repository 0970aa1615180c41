//! Topology provider — the scheduler's view of its neighbours.

use thiserror::Error;

use crate::types::CellState;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("topology unavailable: {0}")]
    Unavailable(String),
    #[error("local cell is not configured")]
    NoLocalCell,
}

/// Supplies fresh snapshots of the local cell and its children.
///
/// Every call returns a new snapshot; callers never see a snapshot change
/// underneath them.
pub trait TopologyProvider: Send + Sync {
    fn child_cells(&self) -> Result<Vec<CellState>, TopologyError>;

    fn my_cell(&self) -> Result<CellState, TopologyError>;
}
