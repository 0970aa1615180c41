//! cellgrid-core — shared vocabulary of the cell hierarchy.
//!
//! Defines the data every other crate passes around (cells, routing paths,
//! scheduling requests, consistency entries) and the interfaces of the
//! collaborators the scheduler and the healing loop depend on but do not
//! implement:
//!
//! - **`messenger`** — cast/call/broadcast between cells
//! - **`source`** — consistency records by kind
//! - **`topology`** — the local cell and its children
//! - **`workload`** — local instance records

pub mod config;
pub mod entries;
pub mod messenger;
pub mod routing;
pub mod source;
pub mod topology;
pub mod types;
pub mod workload;

pub use config::{CellgridConfig, ConfigError};
pub use entries::{ConsistencyEntry, EntryKind};
pub use messenger::{CellMessage, ChannelMessenger, HierarchyMessenger, MessengerError};
pub use routing::RoutingPath;
pub use source::{sort_entries, EntryFilters, RecordSource, SortDir, SortKey, SourceError};
pub use topology::{TopologyError, TopologyProvider};
pub use types::*;
pub use workload::{InstanceStore, WorkloadError};
