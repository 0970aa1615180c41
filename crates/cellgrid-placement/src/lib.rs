//! cellgrid-placement — filter/weigher pipeline.
//!
//! Narrows a list of candidate cells for one scheduling attempt and ranks
//! the survivors. It does NOT talk to other cells (that's
//! `cellgrid-scheduler`); a filter that wants the request forwarded
//! somewhere specific hands back a [`Directive`] instead.
//!
//! # Components
//!
//! - **`filter`** — `CellFilter` and the built-in filters
//! - **`weigher`** — `CellWeigher` and the built-in weighers
//! - **`pipeline`** — runs filters then weighers, produces the ranking
//! - **`registry`** — builds a pipeline from configured names

pub mod filter;
pub mod pipeline;
pub mod registry;
pub mod weigher;

pub use filter::{
    AvailabilityZoneFilter, CellFilter, DirectOnlyFilter, Directive, DirectiveAction,
    FilterError, FilterOutcome, FilterProperties, PickCellFilter, RestrictFilter,
};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use registry::{RegistryError, build_pipeline};
pub use weigher::{CellWeigher, MuteChildWeigher, RamByInstanceTypeWeigher, WeightOffsetWeigher};
