//! Secondary indices.
//!
//! An [`Index`] is a pair of tables kept in perfect correspondence: forward
//! `key -> {id}` and reverse `id -> {key}`. Every mutation touches both;
//! a disagreement between the two sides is fatal and reported as
//! [`DirError::IndexInconsistent`].
//!
//! User attribute indices carry the attribute's equality normalizer and an
//! LRU cache memoizing raw-value normalization; system indices store
//! pre-normalized keys and skip both.

use std::fmt::Display;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::btree::{KeyCodec, Table, TableCursor, ValCodec};
use crate::error::{DirError, Result};
use crate::model::EntryId;
use crate::schema::AttributeType;

/// Bound for types usable as index keys.
pub trait IndexKey: KeyCodec + ValCodec + Clone + Display {}

impl<T: KeyCodec + ValCodec + Clone + Display> IndexKey for T {}

/// A forward/reverse table pair over one record file.
pub struct Index<K: IndexKey> {
    name: String,
    forward: Table<K, u64>,
    reverse: Table<u64, K>,
    recman: Arc<Mutex<crate::storage::RecordManager>>,
    attr_type: Option<Arc<AttributeType>>,
    key_cache: Mutex<LruCache<String, String>>,
}

impl<K: IndexKey> Index<K> {
    /// Open the index over `recman`, with the given duplicate limit and,
    /// for attribute indices, the attribute type driving normalization and
    /// the size of the normalization cache.
    pub fn open(
        name: &str,
        recman: Arc<Mutex<crate::storage::RecordManager>>,
        dup_limit: usize,
        attr_type: Option<Arc<AttributeType>>,
        key_cache_size: usize,
    ) -> Result<Self> {
        let forward = Table::open("forward", Arc::clone(&recman), dup_limit)?;
        let reverse = Table::open("reverse", Arc::clone(&recman), dup_limit)?;
        let key_cache_size = NonZeroUsize::new(key_cache_size.max(1))
            .ok_or_else(|| DirError::InvalidArgument("index cache size must be non-zero".into()))?;
        Ok(Self {
            name: name.to_string(),
            forward,
            reverse,
            recman,
            attr_type,
            key_cache: Mutex::new(LruCache::new(key_cache_size)),
        })
    }

    /// Index name (system name or attribute OID).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert the `(key, id)` pair into both tables. Idempotent.
    pub fn add(&self, key: &K, id: EntryId) -> Result<()> {
        let fwd = self.forward.put(key, &id)?;
        let rev = self.reverse.put(&id, key)?;
        if fwd != rev {
            return Err(self.mismatch(&format!("add of id {id}")));
        }
        Ok(())
    }

    /// Remove one `(key, id)` pair from both tables. Returns false when the
    /// pair was absent.
    pub fn drop_pair(&self, key: &K, id: EntryId) -> Result<bool> {
        let fwd = self.forward.remove(key, &id)?;
        let rev = self.reverse.remove(&id, key)?;
        if fwd != rev {
            return Err(self.mismatch(&format!("drop of id {id}")));
        }
        Ok(fwd)
    }

    /// Remove every pair involving `id`, walking the reverse table to
    /// enumerate the keys. Returns how many pairs were removed.
    pub fn drop_id(&self, id: EntryId) -> Result<u64> {
        let keys = self.reverse.values(&id)?;
        for key in &keys {
            if !self.forward.remove(key, &id)? {
                return Err(self.mismatch(&format!("reverse-only pair for id {id}")));
            }
        }
        let removed = self.reverse.remove_key(&id)?;
        if removed != keys.len() as u64 {
            return Err(self.mismatch(&format!("reverse fanout drift for id {id}")));
        }
        Ok(removed)
    }

    /// Least id stored under `key`, or `None`.
    pub fn forward_lookup(&self, key: &K) -> Result<Option<EntryId>> {
        self.forward.get(key)
    }

    /// First key stored under `id`, or `None`.
    pub fn reverse_lookup(&self, id: EntryId) -> Result<Option<K>> {
        self.reverse.get(&id)
    }

    /// Every key stored under `id`.
    pub fn reverse_values(&self, id: EntryId) -> Result<Vec<K>> {
        self.reverse.values(&id)
    }

    /// True when the exact pair is present.
    pub fn has_value(&self, key: &K, id: EntryId) -> Result<bool> {
        self.forward.has(key, &id)
    }

    /// Total number of pairs in the index.
    pub fn count(&self) -> u64 {
        self.forward.len()
    }

    /// Number of ids stored under `key`.
    pub fn count_key(&self, key: &K) -> Result<u64> {
        self.forward.count_key(key)
    }

    /// Snapshot of the ids stored under `key`, in id order.
    pub fn list(&self, key: &K) -> Result<Vec<EntryId>> {
        self.forward.values(key)
    }

    /// Streaming cursor over the whole forward table.
    pub fn cursor(&self) -> Result<TableCursor<K, u64>> {
        self.forward.cursor()
    }

    /// Commit the backing record file.
    pub fn sync(&self) -> Result<()> {
        self.recman.lock().commit()
    }

    fn mismatch(&self, context: &str) -> DirError {
        tracing::error!(index = %self.name, context, "forward/reverse correspondence lost");
        DirError::IndexInconsistent(format!(
            "index {} forward/reverse mismatch during {context}",
            self.name
        ))
    }
}

impl Index<String> {
    /// Normalize a raw key through the attribute's equality rule, memoized
    /// in the index's LRU cache. Indices without an attribute type store
    /// keys verbatim.
    pub fn norm_key(&self, raw: &str) -> String {
        let Some(at) = &self.attr_type else {
            return raw.to_string();
        };
        let mut cache = self.key_cache.lock();
        if let Some(hit) = cache.get(raw) {
            return hit.clone();
        }
        let normalized = at.equality.apply(raw);
        cache.put(raw.to_string(), normalized.clone());
        normalized
    }

    /// [`Index::add`] with raw-key normalization.
    pub fn add_value(&self, raw: &str, id: EntryId) -> Result<()> {
        self.add(&self.norm_key(raw), id)
    }

    /// [`Index::drop_pair`] with raw-key normalization.
    pub fn drop_value(&self, raw: &str, id: EntryId) -> Result<bool> {
        self.drop_pair(&self.norm_key(raw), id)
    }

    /// [`Index::forward_lookup`] with raw-key normalization.
    pub fn lookup_value(&self, raw: &str) -> Result<Option<EntryId>> {
        self.forward_lookup(&self.norm_key(raw))
    }

    /// [`Index::has_value`] with raw-key normalization.
    pub fn has_raw(&self, raw: &str, id: EntryId) -> Result<bool> {
        self.has_value(&self.norm_key(raw), id)
    }
}
