//! Record source — where the healing loop reads consistency entries from.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entries::ConsistencyEntry;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record in {table}: {reason}")]
    Corrupt { table: String, reason: String },
}

/// Filters understood by every record source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilters {
    /// Only records created, updated, or deleted at or after this time.
    #[serde(rename = "changes-since", skip_serializing_if = "Option::is_none")]
    pub changes_since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// `None` returns deleted and live records alike.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
}

impl EntryFilters {
    pub fn changes_since(mut self, since: u64) -> Self {
        self.changes_since = Some(since);
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn live_only(mut self) -> Self {
        self.deleted = Some(false);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn natural_key(mut self, key: impl Into<String>) -> Self {
        self.natural_key = Some(key.into());
        self
    }

    /// Apply the filters to one record.
    pub fn matches<E: ConsistencyEntry>(&self, entry: &E) -> bool {
        if let Some(since) = self.changes_since {
            if entry.last_changed() < since {
                return false;
            }
        }
        if let Some(project) = &self.project_id {
            if entry.project_id() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if entry.deleted() != deleted {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if &entry.id() != id {
                return false;
            }
        }
        if let Some(key) = &self.natural_key {
            if &entry.natural_key() != key {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Deleted,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

/// Supplies records of one entry kind.
pub trait RecordSource<E: ConsistencyEntry>: Send + Sync {
    fn get_entries(
        &self,
        filters: &EntryFilters,
        sort_key: SortKey,
        sort_dir: SortDir,
    ) -> Result<Vec<E>, SourceError>;
}

/// Sort records in place the way every source is expected to.
///
/// The sort is stable, so records with equal keys keep storage order.
pub fn sort_entries<E: ConsistencyEntry>(entries: &mut [E], sort_key: SortKey, sort_dir: SortDir) {
    entries.sort_by(|a, b| {
        let ord = match sort_key {
            SortKey::Deleted => a.deleted().cmp(&b.deleted()),
            SortKey::CreatedAt => a.created_at().cmp(&b.created_at()),
        };
        match sort_dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    });
}
