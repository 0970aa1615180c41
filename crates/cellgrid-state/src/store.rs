//! StateStore — redb-backed state persistence for a cell.
//!
//! Provides typed CRUD operations over the cell topology, instance records,
//! instance actions and consistency entries. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use cellgrid_core::{
    epoch_secs, sort_entries, CellState, ConsistencyEntry, EntryFilters, EntryKind,
    InstanceAction, InstanceRecord, InstanceStore, RecordSource, RequestSpec, SortDir, SortKey,
    SourceError, TopologyError, TopologyProvider, VmState, WorkloadError,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CELLS).map_err(map_err!(Table))?;
        txn.open_table(LOCAL_CELL).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_ACTIONS).map_err(map_err!(Table))?;
        for kind in EntryKind::ALL {
            txn.open_table(entry_table(kind)).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Raw JSON access ────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove(&self, def: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Cells ──────────────────────────────────────────────────────

    /// Insert or update a child cell.
    pub fn put_cell(&self, cell: &CellState) -> StateResult<()> {
        self.put_json(CELLS, &cell.name, cell)?;
        debug!(cell = %cell.name, "child cell stored");
        Ok(())
    }

    pub fn get_cell(&self, name: &str) -> StateResult<Option<CellState>> {
        self.get_json(CELLS, name)
    }

    /// List all child cells, ordered by name.
    pub fn list_cells(&self) -> StateResult<Vec<CellState>> {
        self.list_json(CELLS, "")
    }

    /// Delete a child cell by name. Returns true if it existed.
    pub fn delete_cell(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove(CELLS, name)?;
        debug!(cell = %name, existed, "child cell deleted");
        Ok(existed)
    }

    /// Record the local cell. It is always flagged as `is_me`.
    pub fn set_my_cell(&self, cell: &CellState) -> StateResult<()> {
        let mut cell = cell.clone();
        cell.is_me = true;
        self.put_json(LOCAL_CELL, LOCAL_CELL_KEY, &cell)?;
        debug!(cell = %cell.name, "local cell stored");
        Ok(())
    }

    pub fn get_my_cell(&self) -> StateResult<Option<CellState>> {
        self.get_json(LOCAL_CELL, LOCAL_CELL_KEY)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        self.put_json(INSTANCES, &record.uuid, record)
    }

    pub fn get_instance(&self, uuid: &str) -> StateResult<Option<InstanceRecord>> {
        self.get_json(INSTANCES, uuid)
    }

    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.list_json(INSTANCES, "")
    }

    /// Update the lifecycle state of an existing instance.
    pub fn update_vm_state(&self, uuid: &str, state: VmState) -> StateResult<InstanceRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut current: InstanceRecord = match table.get(uuid).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("instance {uuid}"))),
            };
            current.vm_state = state;
            current.updated_at = epoch_secs();
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(uuid, value.as_slice())
                .map_err(map_err!(Write))?;
            record = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, ?state, "instance state updated");
        Ok(record)
    }

    // ── Instance actions ───────────────────────────────────────────

    pub fn put_action(&self, action: &InstanceAction) -> StateResult<()> {
        let key = format!(
            "{}:{:020}:{}",
            action.instance_uuid, action.start_time, action.action
        );
        self.put_json(INSTANCE_ACTIONS, &key, action)
    }

    /// All actions recorded for one instance, oldest first.
    pub fn list_actions(&self, instance_uuid: &str) -> StateResult<Vec<InstanceAction>> {
        self.list_json(INSTANCE_ACTIONS, &format!("{instance_uuid}:"))
    }

    // ── Consistency entries ────────────────────────────────────────

    /// Insert or update a consistency entry in its kind's table.
    pub fn put_entry<E: ConsistencyEntry>(&self, entry: &E) -> StateResult<()> {
        let key = entry_key(&entry.id());
        self.put_json(entry_table(E::KIND), &key, entry)?;
        debug!(kind = %E::KIND, id = %entry.id(), deleted = entry.deleted(), "entry stored");
        Ok(())
    }

    pub fn get_entry<E: ConsistencyEntry>(&self, id: &str) -> StateResult<Option<E>> {
        self.get_json(entry_table(E::KIND), &entry_key(id))
    }

    /// Entries matching `filters`, sorted by `sort_key` with ties kept in id order.
    pub fn list_entries<E: ConsistencyEntry>(
        &self,
        filters: &EntryFilters,
        sort_key: SortKey,
        sort_dir: SortDir,
    ) -> StateResult<Vec<E>> {
        let mut entries: Vec<E> = self.list_json(entry_table(E::KIND), "")?;
        entries.retain(|entry| filters.matches(entry));
        sort_entries(&mut entries, sort_key, sort_dir);
        Ok(entries)
    }

    /// Delete an entry outright. Soft deletion is a `put_entry` with `deleted` set.
    pub fn purge_entry(&self, kind: EntryKind, id: &str) -> StateResult<bool> {
        self.remove(entry_table(kind), &entry_key(id))
    }
}

/// Zero-padded so numeric ids iterate in numeric order.
fn entry_key(id: &str) -> String {
    format!("{id:0>20}")
}

// ── Collaborator interfaces ────────────────────────────────────────

impl TopologyProvider for StateStore {
    fn child_cells(&self) -> Result<Vec<CellState>, TopologyError> {
        let mut cells = self.list_cells()?;
        for cell in &mut cells {
            cell.is_me = false;
        }
        Ok(cells)
    }

    fn my_cell(&self) -> Result<CellState, TopologyError> {
        self.get_my_cell()?.ok_or(TopologyError::NoLocalCell)
    }
}

impl<E: ConsistencyEntry> RecordSource<E> for StateStore {
    fn get_entries(
        &self,
        filters: &EntryFilters,
        sort_key: SortKey,
        sort_dir: SortDir,
    ) -> Result<Vec<E>, SourceError> {
        Ok(self.list_entries(filters, sort_key, sort_dir)?)
    }
}

impl InstanceStore for StateStore {
    fn create_instance(
        &self,
        spec: &RequestSpec,
        uuid: &str,
        num_instances: u32,
        index: u32,
    ) -> Result<InstanceRecord, WorkloadError> {
        let cell_name = match self.get_my_cell() {
            Ok(cell) => cell.map(|c| c.name),
            Err(e) => {
                warn!(error = %e, "local cell unreadable, instance left without cell name");
                None
            }
        };
        let now = epoch_secs();
        let props = &spec.instance_properties;
        let record = InstanceRecord {
            uuid: uuid.to_string(),
            launch_index: index,
            num_instances,
            vm_state: VmState::Building,
            project_id: props.project_id.clone(),
            availability_zone: props.availability_zone.clone(),
            display_name: props.display_name.clone(),
            memory_mb: spec.instance_type.memory_mb,
            cell_name,
            created_at: now,
            updated_at: now,
        };
        self.put_instance(&record)?;
        debug!(%uuid, index, num_instances, "instance record created");
        Ok(record)
    }

    fn action_start(&self, action: &InstanceAction) -> Result<(), WorkloadError> {
        Ok(self.put_action(action)?)
    }

    fn set_vm_state(&self, uuid: &str, state: VmState) -> Result<(), WorkloadError> {
        self.update_vm_state(uuid, state)?;
        Ok(())
    }
}
