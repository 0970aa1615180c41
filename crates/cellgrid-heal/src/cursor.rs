//! Resumable position over the current batch of entries to heal.

use std::collections::VecDeque;

use cellgrid_core::SourceError;
use rand::seq::SliceRandom;

/// Holds the rest of the current batch and whether it was fetched this pass.
///
/// A batch is fetched at most once per pass. [`HealCursor::reset`] only
/// allows the next fetch; entries already fetched are never dropped, so a
/// new pass first finishes the old batch.
#[derive(Debug)]
pub struct HealCursor<E> {
    batch: VecDeque<E>,
    refreshed: bool,
    shuffle: bool,
}

impl<E> Default for HealCursor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> HealCursor<E> {
    pub fn new() -> Self {
        Self {
            batch: VecDeque::new(),
            refreshed: false,
            shuffle: true,
        }
    }

    /// Keep fetched batches in source order instead of shuffling them.
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Allow one more fetch once the current batch runs out.
    pub fn reset(&mut self) {
        self.refreshed = false;
    }

    pub fn remaining(&self) -> usize {
        self.batch.len()
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// Pop the next entry, calling `fetch` if the batch is empty and no
    /// fetch has happened since the last reset.
    ///
    /// A failed fetch leaves the cursor as it was.
    pub fn next_entry<F>(&mut self, fetch: F) -> Result<Option<E>, SourceError>
    where
        F: FnOnce() -> Result<Vec<E>, SourceError>,
    {
        if let Some(entry) = self.batch.pop_front() {
            return Ok(Some(entry));
        }
        if self.refreshed {
            return Ok(None);
        }
        let mut fresh = fetch()?;
        if self.shuffle {
            fresh.shuffle(&mut rand::rng());
        }
        self.batch = fresh.into();
        self.refreshed = true;
        Ok(self.batch.pop_front())
    }
}
