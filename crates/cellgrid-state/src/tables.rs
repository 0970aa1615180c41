//! redb table definitions for the cellgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Consistency entries get one table per kind, named by
//! [`EntryKind::table_name`](cellgrid_core::EntryKind::table_name).

use cellgrid_core::EntryKind;
use redb::TableDefinition;

/// Child cells keyed by cell name.
pub const CELLS: TableDefinition<&str, &[u8]> = TableDefinition::new("cells");

/// The local cell, stored under [`LOCAL_CELL_KEY`].
pub const LOCAL_CELL: TableDefinition<&str, &[u8]> = TableDefinition::new("local_cell");

pub const LOCAL_CELL_KEY: &str = "me";

/// Instance records keyed by uuid.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Instance actions keyed by `{instance_uuid}:{start_time}:{action}`.
pub const INSTANCE_ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("instance_actions");

/// Table holding consistency entries of one kind, keyed by entry id.
pub fn entry_table(kind: EntryKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(kind.table_name())
}
