//! cellgrid-heal — periodic re-broadcast of consistency records.
//!
//! Messages that update the top of the cell hierarchy are fire-and-forget,
//! so the parent's copy of a record can drift. Each child periodically
//! replays a random slice of its recently-changed records upward.
//!
//! # Architecture
//!
//! ```text
//! HealMonitor
//!   └── Per-kind background task (wakes every `tick`)
//!       └── HealEngine<S: HealStrategy>
//!           ├── time gate (interval_secs, 0 = disabled)
//!           ├── HealCursor (one fetch per pass, shuffled batch)
//!           └── strategy: MappingHandler / GroupHandler /
//!               RuleHandler / InstanceGroupHandler
//! ```
//!
//! A pass syncs at most `update_number` entries. Entries the cursor holds
//! over are synced by the next pass before any new fetch.

pub mod cursor;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod monitor;
pub mod security_group;

pub use cursor::HealCursor;
pub use engine::{BroadcastDirection, HealEngine, HealReport, HealStrategy, Healer};
pub use error::{HealError, HealResult};
pub use mapping::MappingHandler;
pub use monitor::HealMonitor;
pub use security_group::{GroupHandler, InstanceGroupHandler, RuleHandler};
