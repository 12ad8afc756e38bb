//! The partition store coordinator.
//!
//! [`Store`] is the sole writer over the master table and every index.
//! Public mutations serialize behind a store-wide write lock; reads share a
//! read lock. Fatal storage failures after the first index write of an
//! operation taint the store: every later mutation fails until the store is
//! destroyed and initialized again.

mod add;
mod alias;
mod config;
mod core;
mod delete;
mod diagnostics;
mod lifecycle;
mod modify;
mod rename;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::error::{DirError, Result};
use crate::index::Index;
use crate::model::{Attribute, AttrValue, Entry, EntryId, ModOp, Modification, OBJECT_CLASS_AT};
use crate::schema::SchemaRef;

use self::core::Inner;
use self::lifecycle::Lifecycle;

pub use self::config::{IndexConfig, StoreConfig, DEFAULT_INDEX_CACHE_SIZE};
pub use self::core::{
    ALIAS_INDEX, HIERARCHY_INDEX, NDN_INDEX, ONE_ALIAS_INDEX, PRESENCE_INDEX, SUB_ALIAS_INDEX,
    UPDN_INDEX,
};
pub use self::diagnostics::IndexEntrySnapshot;

/// Handle to one system index; the hierarchy and alias-scope indices are
/// keyed by entry id, the rest by text.
#[derive(Clone)]
pub enum SystemIndexHandle {
    /// Text-keyed system index (`ndn`, `updn`, `presence`, `alias`).
    Text(Arc<Index<String>>),
    /// Id-keyed system index (`hierarchy`, `oneAlias`, `subAlias`).
    Id(Arc<Index<u64>>),
}

/// An embedded LDAP partition store.
pub struct Store {
    schema: SchemaRef,
    config: Mutex<StoreConfig>,
    lifecycle: Lifecycle,
    inner: RwLock<Option<Inner>>,
}

fn is_fatal(err: &DirError) -> bool {
    matches!(
        err,
        DirError::Io(_)
            | DirError::Corruption(_)
            | DirError::Serialization(_)
            | DirError::IndexInconsistent(_)
    )
}

impl Store {
    /// Create an uninitialized store over the given schema resolver.
    pub fn new(schema: SchemaRef) -> Self {
        Self::with_config(schema, StoreConfig::default())
    }

    /// Create an uninitialized store with a prepared configuration.
    pub fn with_config(schema: SchemaRef, config: StoreConfig) -> Self {
        Self {
            schema,
            config: Mutex::new(config),
            lifecycle: Lifecycle::default(),
            inner: RwLock::new(None),
        }
    }

    fn set_config<F: FnOnce(&mut StoreConfig)>(&self, f: F) -> Result<()> {
        self.lifecycle.check_not_initialized()?;
        f(&mut self.config.lock());
        Ok(())
    }

    /// Set the directory holding the partition's record files.
    pub fn set_working_directory(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.set_config(|c| c.working_directory = Some(path))
    }

    /// Set the page cache capacity of every record file.
    pub fn set_cache_size(&self, cache_size: usize) -> Result<()> {
        self.set_config(|c| c.cache_size = cache_size)
    }

    /// Commit after every mutation when enabled.
    pub fn set_sync_on_write(&self, sync_on_write: bool) -> Result<()> {
        self.set_config(|c| c.sync_on_write = sync_on_write)
    }

    /// Set the partition's diagnostic name.
    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.set_config(|c| c.name = name)
    }

    /// Set the partition suffix DN. Required before `init`.
    pub fn set_suffix_dn(&self, suffix: impl Into<String>) -> Result<()> {
        let suffix = suffix.into();
        self.set_config(|c| c.suffix_dn = Some(suffix))
    }

    /// Set the entry used to synthesize the suffix when absent on disk.
    pub fn set_context_entry(&self, entry: Entry) -> Result<()> {
        self.set_config(|c| c.context_entry = Some(entry))
    }

    /// Register a user index for an attribute.
    pub fn add_indexed_attribute(&self, index_config: IndexConfig) -> Result<()> {
        self.set_config(|c| c.indexed_attributes.push(index_config))
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> StoreConfig {
        self.config.lock().clone()
    }

    /// True between a successful `init` and `destroy`.
    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    /// Open the record files, create missing system indices, and synthesize
    /// the suffix entry when the partition is empty.
    pub fn init(&self) -> Result<()> {
        self.lifecycle.check_not_initialized()?;
        let config = self.config.lock().clone();
        let inner = Inner::open(Arc::clone(&self.schema), &config)?;

        if inner.entry_id_norm(&inner.suffix)?.is_none() {
            let entry = match &config.context_entry {
                Some(entry) => entry.clone(),
                None => default_suffix_entry(&inner.up_suffix),
            };
            let updn = inner.up_suffix.clone();
            let norm = inner.suffix.clone();
            let suffix_id = inner.add_parsed(updn, norm, entry)?;
            info!(suffix_id, suffix = %inner.suffix, "suffix entry created");
        }
        inner.sync_all()?;

        *self.inner.write() = Some(inner);
        self.lifecycle.set_initialized();
        Ok(())
    }

    /// Flush everything and close. The store may be initialized again.
    pub fn destroy(&self) -> Result<()> {
        self.lifecycle.check_initialized()?;
        let inner = self.inner.write().take();
        self.lifecycle.reset();
        if let Some(inner) = inner {
            inner.sync_all()?;
        }
        info!("partition store destroyed");
        Ok(())
    }

    /// Commit every record file.
    pub fn sync(&self) -> Result<()> {
        self.read_op(|inner| inner.sync_all())
    }

    fn read_op<T>(&self, f: impl FnOnce(&Inner) -> Result<T>) -> Result<T> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(DirError::NotInitialized)?;
        f(inner)
    }

    fn write_op<T>(&self, f: impl FnOnce(&Inner) -> Result<T>) -> Result<T> {
        self.lifecycle.check_writable()?;
        let guard = self.inner.write();
        let inner = guard.as_ref().ok_or(DirError::NotInitialized)?;
        let result = f(inner);
        if let Err(err) = &result {
            if is_fatal(err) {
                error!(error = %err, "fatal storage failure; store marked inconsistent");
                self.lifecycle.taint();
            }
        }
        result
    }

    // --- naming ---

    /// Normalized suffix DN.
    pub fn suffix(&self) -> Result<String> {
        self.read_op(|inner| Ok(inner.suffix.to_string()))
    }

    /// User-provided suffix DN.
    pub fn up_suffix(&self) -> Result<String> {
        self.read_op(|inner| Ok(inner.up_suffix.to_string()))
    }

    /// Resolve a DN to its entry id.
    pub fn entry_id(&self, dn: &str) -> Result<Option<EntryId>> {
        self.read_op(|inner| {
            let (_updn, norm) = inner.parse_dn(dn)?;
            inner.entry_id_norm(&norm)
        })
    }

    /// Normalized DN of an entry id.
    pub fn entry_dn(&self, id: EntryId) -> Result<Option<String>> {
        self.read_op(|inner| inner.ndn.reverse_lookup(id))
    }

    /// User-provided DN of an entry id.
    pub fn entry_updn(&self, id: EntryId) -> Result<Option<String>> {
        self.read_op(|inner| inner.updn.reverse_lookup(id))
    }

    /// Parent id of the entry at `dn`.
    pub fn parent_id(&self, dn: &str) -> Result<Option<EntryId>> {
        self.read_op(|inner| {
            let (_updn, norm) = inner.parse_dn(dn)?;
            match inner.entry_id_norm(&norm)? {
                None => Ok(None),
                Some(id) => inner.hierarchy.reverse_lookup(id),
            }
        })
    }

    /// Parent id of an entry id.
    pub fn parent_id_of(&self, id: EntryId) -> Result<Option<EntryId>> {
        self.read_op(|inner| inner.hierarchy.reverse_lookup(id))
    }

    // --- CRUD ---

    /// Add an entry. Returns the id assigned to it.
    pub fn add(&self, dn: &str, entry: Entry) -> Result<EntryId> {
        self.write_op(|inner| inner.add(dn, entry))
    }

    /// Fetch an entry by id.
    pub fn lookup(&self, id: EntryId) -> Result<Option<Entry>> {
        self.read_op(|inner| inner.master.get(id))
    }

    /// Delete an entry by id. Deleting an entry that still has children is
    /// a caller error; check [`Store::child_count`] first.
    pub fn delete(&self, id: EntryId) -> Result<()> {
        self.write_op(|inner| inner.delete(id))
    }

    /// Apply one operation to a set of attributes.
    pub fn modify(&self, dn: &str, op: ModOp, mods: &[Attribute]) -> Result<()> {
        self.write_op(|inner| inner.modify(dn, op, mods))
    }

    /// Apply a sequence of modification items in order.
    pub fn modify_items(&self, dn: &str, mods: &[Modification]) -> Result<()> {
        self.write_op(|inner| inner.modify_items(dn, mods))
    }

    /// Change an entry's RDN, recursively rewriting descendant DNs.
    pub fn rename(&self, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        self.write_op(|inner| inner.rename(dn, new_rdn, delete_old_rdn))
    }

    /// Move an entry (and its subtree) under a new parent.
    pub fn move_entry(&self, dn: &str, new_parent: &str) -> Result<()> {
        self.write_op(|inner| inner.move_entry(dn, new_parent))
    }

    /// Move an entry under a new parent and change its RDN in one step.
    pub fn move_and_rename(
        &self,
        dn: &str,
        new_parent: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.write_op(|inner| inner.move_and_rename(dn, new_parent, new_rdn, delete_old_rdn))
    }

    /// Number of live entries in the partition.
    pub fn entry_count(&self) -> Result<u64> {
        self.read_op(|inner| Ok(inner.master.count()))
    }

    // --- traversal ---

    /// Ids of the entry's children, in id order.
    pub fn list(&self, id: EntryId) -> Result<Vec<EntryId>> {
        self.read_op(|inner| inner.children(id))
    }

    /// Number of children under an entry.
    pub fn child_count(&self, id: EntryId) -> Result<u64> {
        self.read_op(|inner| inner.child_count(id))
    }

    // --- indices ---

    /// True when a user index is configured for the attribute.
    pub fn has_user_index_on(&self, attr_id: &str) -> Result<bool> {
        self.read_op(|inner| match inner.schema.resolve_oid(attr_id) {
            Ok(oid) => Ok(inner.user_indices.contains_key(&oid)),
            Err(_) => Ok(false),
        })
    }

    /// True when `name` names one of the seven system indices.
    pub fn has_system_index_on(&self, name: &str) -> Result<bool> {
        self.read_op(|_| Ok(system_index_names().iter().any(|n| n.eq_ignore_ascii_case(name))))
    }

    /// Handle to a user index, by attribute name or OID.
    pub fn user_index(&self, attr_id: &str) -> Result<Arc<Index<String>>> {
        self.read_op(|inner| {
            let oid = inner
                .schema
                .resolve_oid(attr_id)
                .map_err(|_| DirError::IndexNotFound(attr_id.to_string()))?;
            inner
                .user_index_for(&oid)
                .ok_or_else(|| DirError::IndexNotFound(attr_id.to_string()))
        })
    }

    /// Handle to a system index, by name.
    pub fn system_index(&self, name: &str) -> Result<SystemIndexHandle> {
        self.read_op(|inner| {
            let handle = if name.eq_ignore_ascii_case(NDN_INDEX) {
                SystemIndexHandle::Text(Arc::clone(&inner.ndn))
            } else if name.eq_ignore_ascii_case(UPDN_INDEX) {
                SystemIndexHandle::Text(Arc::clone(&inner.updn))
            } else if name.eq_ignore_ascii_case(PRESENCE_INDEX) {
                SystemIndexHandle::Text(Arc::clone(&inner.presence))
            } else if name.eq_ignore_ascii_case(ALIAS_INDEX) {
                SystemIndexHandle::Text(Arc::clone(&inner.alias))
            } else if name.eq_ignore_ascii_case(HIERARCHY_INDEX) {
                SystemIndexHandle::Id(Arc::clone(&inner.hierarchy))
            } else if name.eq_ignore_ascii_case(ONE_ALIAS_INDEX) {
                SystemIndexHandle::Id(Arc::clone(&inner.one_alias))
            } else if name.eq_ignore_ascii_case(SUB_ALIAS_INDEX) {
                SystemIndexHandle::Id(Arc::clone(&inner.sub_alias))
            } else {
                return Err(DirError::IndexNotFound(name.to_string()));
            };
            Ok(handle)
        })
    }

    /// Handles to every configured user index.
    pub fn user_indices(&self) -> Result<Vec<Arc<Index<String>>>> {
        self.read_op(|inner| Ok(inner.user_indices.values().map(Arc::clone).collect()))
    }

    /// Handles to the seven system indices.
    pub fn system_indices(&self) -> Result<Vec<SystemIndexHandle>> {
        self.read_op(|inner| {
            Ok(vec![
                SystemIndexHandle::Text(Arc::clone(&inner.ndn)),
                SystemIndexHandle::Text(Arc::clone(&inner.updn)),
                SystemIndexHandle::Id(Arc::clone(&inner.hierarchy)),
                SystemIndexHandle::Text(Arc::clone(&inner.presence)),
                SystemIndexHandle::Text(Arc::clone(&inner.alias)),
                SystemIndexHandle::Id(Arc::clone(&inner.one_alias)),
                SystemIndexHandle::Id(Arc::clone(&inner.sub_alias)),
            ])
        })
    }

    // --- diagnostics ---

    /// Every index entry touching `id`, rendered for debugging.
    pub fn index_snapshot(&self, id: EntryId) -> Result<Vec<IndexEntrySnapshot>> {
        self.read_op(|inner| inner.index_snapshot(id))
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort flush for stores abandoned without `destroy`.
        if let Some(inner) = self.inner.get_mut().take() {
            if let Err(err) = inner.sync_all() {
                error!(error = %err, "flush on drop failed");
            }
        }
    }
}

fn system_index_names() -> [&'static str; 7] {
    [
        NDN_INDEX,
        UPDN_INDEX,
        HIERARCHY_INDEX,
        PRESENCE_INDEX,
        ALIAS_INDEX,
        ONE_ALIAS_INDEX,
        SUB_ALIAS_INDEX,
    ]
}

fn default_suffix_entry(up_suffix: &crate::name::Dn) -> Entry {
    let mut entry = Entry::new();
    entry.put(Attribute::new(
        OBJECT_CLASS_AT,
        vec![AttrValue::from("top")],
    ));
    let rdn = up_suffix.rdn();
    entry.add_value(&rdn.attr, AttrValue::Text(rdn.value.clone()));
    entry
}
