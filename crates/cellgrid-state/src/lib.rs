//! cellgrid-state — embedded state store for a cell.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the cell topology, locally created instances and their
//! actions, and every kind of consistency entry.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements the collaborator interfaces from `cellgrid-core`:
//! [`TopologyProvider`](cellgrid_core::TopologyProvider),
//! [`RecordSource`](cellgrid_core::RecordSource) for every entry kind, and
//! [`InstanceStore`](cellgrid_core::InstanceStore).

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
