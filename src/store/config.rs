//! Store configuration.

use std::path::PathBuf;

use crate::btree::DEFAULT_DUPLICATE_LIMIT;
use crate::model::Entry;
use crate::pager::DEFAULT_CACHE_SIZE;

/// Default normalization-cache capacity of a user index.
pub const DEFAULT_INDEX_CACHE_SIZE: usize = 100;

/// Per-attribute index settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Attribute id (name or OID) to index.
    pub attr_id: String,
    /// Capacity of the index's key-normalization cache.
    pub cache_size: usize,
    /// Threshold at which a key's duplicate set leaves the leaf.
    pub duplicate_limit: usize,
}

impl IndexConfig {
    /// Index the given attribute with default tuning.
    pub fn new(attr_id: impl Into<String>) -> Self {
        Self {
            attr_id: attr_id.into(),
            cache_size: DEFAULT_INDEX_CACHE_SIZE,
            duplicate_limit: DEFAULT_DUPLICATE_LIMIT,
        }
    }

    /// Override the normalization-cache capacity.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Override the duplicate limit.
    pub fn with_duplicate_limit(mut self, duplicate_limit: usize) -> Self {
        self.duplicate_limit = duplicate_limit;
        self
    }
}

/// Partition store configuration. Immutable once the store is initialized.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root path for the master and index record files.
    pub working_directory: Option<PathBuf>,
    /// Page cache capacity of every record file.
    pub cache_size: usize,
    /// Commit after every mutation instead of on explicit `sync`.
    pub sync_on_write: bool,
    /// Partition name, used for diagnostics only.
    pub name: String,
    /// Root DN of the partition. Required.
    pub suffix_dn: Option<String>,
    /// Entry used to synthesize the suffix when absent on disk.
    pub context_entry: Option<Entry>,
    /// User indices to maintain, one per attribute.
    pub indexed_attributes: Vec<IndexConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            cache_size: DEFAULT_CACHE_SIZE,
            sync_on_write: false,
            name: String::new(),
            suffix_dn: None,
            context_entry: None,
            indexed_attributes: Vec::new(),
        }
    }
}
