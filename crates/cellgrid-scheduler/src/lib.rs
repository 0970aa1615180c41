//! cellgrid-scheduler — cell selection for run-instance requests.
//!
//! Given a request arriving at this cell, the scheduler decides whether
//! the instances are created here or the request is forwarded to a child
//! cell. It:
//!
//! - Gathers candidates (children, plus this cell when appropriate)
//! - Runs the filter/weigher pipeline from `cellgrid-placement`
//! - Executes routing directives without ranking
//! - Tries ranked candidates in order until one accepts
//! - Retries when no cell is available, then marks instances errored
//!
//! # Architecture
//!
//! ```text
//! CellsScheduler
//!   ├── TopologyProvider (child cells, this cell)
//!   ├── Pipeline (filters → weighers)
//!   ├── HierarchyMessenger (forward, instance_update_at_top)
//!   ├── InstanceStore (records and actions for local placement)
//!   └── LocalPlacer (host-level scheduling inside this cell)
//! ```

pub mod error;
pub mod local;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use local::LocalPlacer;
pub use scheduler::{CellsScheduler, ScheduleOutcome};
