//! The master table: canonical `id -> entry` storage.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::btree::Table;
use crate::error::{DirError, Result};
use crate::model::{Entry, EntryId};
use crate::storage::{deserialize_entry, serialize_entry, RecordManager};

/// Sidecar property holding the next id to hand out.
const NEXT_ID_PROP: &str = "nextId";

/// Entries the master keeps decoded in memory.
const ENTRY_CACHE_SIZE: usize = 1000;

/// Canonical entry storage plus the monotonically increasing id counter.
///
/// Ids start at one (zero is the reserved root parent marker) and are never
/// reused, even across reopen: the counter lives in the record file's
/// property sidecar.
pub struct MasterTable {
    table: Table<u64, Vec<u8>>,
    recman: Arc<Mutex<RecordManager>>,
    cache: Mutex<LruCache<EntryId, Entry>>,
}

impl MasterTable {
    /// Open the master table inside `recman`.
    pub fn open(recman: Arc<Mutex<RecordManager>>) -> Result<Self> {
        let table = Table::open("master", Arc::clone(&recman), 1)?;
        let cache_size = NonZeroUsize::new(ENTRY_CACHE_SIZE)
            .ok_or_else(|| DirError::InvalidArgument("entry cache size must be non-zero".into()))?;
        Ok(Self {
            table,
            recman,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Allocate the next entry id and persist the advanced counter.
    pub fn next_id(&self) -> Result<EntryId> {
        let mut rm = self.recman.lock();
        let next: EntryId = match rm.property(NEXT_ID_PROP) {
            Some(text) => text.parse().map_err(|_| {
                DirError::Corruption(format!("next-id counter is not a number: {text}"))
            })?,
            None => 1,
        };
        rm.set_property(NEXT_ID_PROP, &(next + 1).to_string())?;
        Ok(next)
    }

    /// Upsert an entry under `id`.
    pub fn put(&self, id: EntryId, entry: &Entry) -> Result<()> {
        let blob = serialize_entry(entry)?;
        self.table.set(&id, &blob)?;
        self.cache.lock().put(id, entry.clone());
        Ok(())
    }

    /// Fetch the entry stored under `id`.
    pub fn get(&self, id: EntryId) -> Result<Option<Entry>> {
        if let Some(entry) = self.cache.lock().get(&id) {
            return Ok(Some(entry.clone()));
        }
        match self.table.get(&id)? {
            None => Ok(None),
            Some(blob) => {
                let entry = deserialize_entry(&blob)?;
                self.cache.lock().put(id, entry.clone());
                Ok(Some(entry))
            }
        }
    }

    /// Remove the entry stored under `id`. The id is not recycled.
    pub fn delete(&self, id: EntryId) -> Result<()> {
        self.table.remove_key(&id)?;
        self.cache.lock().pop(&id);
        Ok(())
    }

    /// Number of live entries.
    pub fn count(&self) -> u64 {
        self.table.len()
    }

    /// Commit the backing record file.
    pub fn sync(&self) -> Result<()> {
        self.recman.lock().commit()
    }
}
