//! Store internals: the index registry and shared lookup helpers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::btree::DEFAULT_DUPLICATE_LIMIT;
use crate::error::{DirError, Result};
use crate::index::Index;
use crate::master::MasterTable;
use crate::model::{AttrValue, Entry, EntryId, ALIASED_OBJECT_NAME_AT};
use crate::name::Dn;
use crate::schema::{AttributeType, SchemaRef};
use crate::storage::RecordManager;
use crate::store::config::StoreConfig;

/// Name of the normalized-DN system index.
pub const NDN_INDEX: &str = "ndn";
/// Name of the user-provided-DN system index.
pub const UPDN_INDEX: &str = "updn";
/// Name of the parent/child system index.
pub const HIERARCHY_INDEX: &str = "hierarchy";
/// Name of the attribute-presence system index.
pub const PRESENCE_INDEX: &str = "presence";
/// Name of the alias-target system index.
pub const ALIAS_INDEX: &str = "alias";
/// Name of the one-level alias scope index.
pub const ONE_ALIAS_INDEX: &str = "oneAlias";
/// Name of the subtree alias scope index.
pub const SUB_ALIAS_INDEX: &str = "subAlias";

/// The initialized partition state behind the store's lock.
pub(crate) struct Inner {
    pub schema: SchemaRef,
    pub sync_on_write: bool,
    /// Normalized partition suffix.
    pub suffix: Dn,
    /// User-provided partition suffix.
    pub up_suffix: Dn,
    /// OID of `aliasedObjectName`, resolved once at open.
    pub alias_oid: String,
    pub master: MasterTable,
    pub ndn: Arc<Index<String>>,
    pub updn: Arc<Index<String>>,
    pub hierarchy: Arc<Index<u64>>,
    pub presence: Arc<Index<String>>,
    pub alias: Arc<Index<String>>,
    pub one_alias: Arc<Index<u64>>,
    pub sub_alias: Arc<Index<u64>>,
    /// User indices keyed by attribute OID.
    pub user_indices: BTreeMap<String, Arc<Index<String>>>,
}

fn open_recman(dir: &Path, file: &str, cache_size: usize) -> Result<Arc<Mutex<RecordManager>>> {
    Ok(Arc::new(Mutex::new(RecordManager::open(
        &dir.join(file),
        cache_size,
    )?)))
}

fn open_system_text(dir: &Path, name: &str, cache_size: usize) -> Result<Arc<Index<String>>> {
    let file = format!("{}.db", name.to_ascii_lowercase());
    Ok(Arc::new(Index::open(
        name,
        open_recman(dir, &file, cache_size)?,
        DEFAULT_DUPLICATE_LIMIT,
        None,
        1,
    )?))
}

fn open_system_id(dir: &Path, name: &str, cache_size: usize) -> Result<Arc<Index<u64>>> {
    let file = format!("{}.db", name.to_ascii_lowercase());
    Ok(Arc::new(Index::open(
        name,
        open_recman(dir, &file, cache_size)?,
        DEFAULT_DUPLICATE_LIMIT,
        None,
        1,
    )?))
}

impl Inner {
    /// Open or create every record file under the working directory.
    pub(crate) fn open(schema: SchemaRef, config: &StoreConfig) -> Result<Self> {
        let dir: PathBuf = config
            .working_directory
            .clone()
            .ok_or_else(|| DirError::InvalidArgument("working directory not configured".into()))?;
        let suffix_str = config
            .suffix_dn
            .clone()
            .ok_or_else(|| DirError::InvalidArgument("suffix DN not configured".into()))?;
        fs::create_dir_all(&dir)?;

        let up_suffix = Dn::parse(&suffix_str)?;
        let suffix = up_suffix.normalize(schema.as_ref())?;
        let alias_oid = schema.resolve_oid(ALIASED_OBJECT_NAME_AT)?;
        let cache = config.cache_size;

        let master = MasterTable::open(open_recman(&dir, "master.db", cache)?)?;
        let ndn = open_system_text(&dir, NDN_INDEX, cache)?;
        let updn = open_system_text(&dir, UPDN_INDEX, cache)?;
        let presence = open_system_text(&dir, PRESENCE_INDEX, cache)?;
        let alias = open_system_text(&dir, ALIAS_INDEX, cache)?;
        let hierarchy = open_system_id(&dir, HIERARCHY_INDEX, cache)?;
        let one_alias = open_system_id(&dir, ONE_ALIAS_INDEX, cache)?;
        let sub_alias = open_system_id(&dir, SUB_ALIAS_INDEX, cache)?;

        let mut user_indices = BTreeMap::new();
        for index_config in &config.indexed_attributes {
            let attr_type = schema.attribute_type(&index_config.attr_id)?;
            let oid = attr_type.oid.clone();
            let index = Arc::new(Index::open(
                &oid,
                open_recman(&dir, &format!("{oid}.db"), cache)?,
                index_config.duplicate_limit,
                Some(Arc::clone(&attr_type)),
                index_config.cache_size,
            )?);
            user_indices.insert(oid, index);
        }

        info!(
            name = %config.name,
            directory = %dir.display(),
            suffix = %suffix,
            user_indices = user_indices.len(),
            "partition store opened"
        );

        Ok(Self {
            schema,
            sync_on_write: config.sync_on_write,
            suffix,
            up_suffix,
            alias_oid,
            master,
            ndn,
            updn,
            hierarchy,
            presence,
            alias,
            one_alias,
            sub_alias,
            user_indices,
        })
    }

    /// Commit every record file.
    pub(crate) fn sync_all(&self) -> Result<()> {
        self.master.sync()?;
        self.ndn.sync()?;
        self.updn.sync()?;
        self.hierarchy.sync()?;
        self.presence.sync()?;
        self.alias.sync()?;
        self.one_alias.sync()?;
        self.sub_alias.sync()?;
        for index in self.user_indices.values() {
            index.sync()?;
        }
        Ok(())
    }

    pub(crate) fn maybe_sync(&self) -> Result<()> {
        if self.sync_on_write {
            self.sync_all()?;
        }
        Ok(())
    }

    /// Parse and normalize a caller-supplied DN.
    pub(crate) fn parse_dn(&self, dn: &str) -> Result<(Dn, Dn)> {
        let updn = Dn::parse(dn)?;
        let norm = updn.normalize(self.schema.as_ref())?;
        Ok((updn, norm))
    }

    pub(crate) fn entry_id_norm(&self, norm: &Dn) -> Result<Option<EntryId>> {
        self.ndn.forward_lookup(&norm.to_string())
    }

    pub(crate) fn require_entry_id(&self, norm: &Dn) -> Result<EntryId> {
        self.entry_id_norm(norm)?
            .ok_or_else(|| DirError::NoSuchObject(norm.to_string()))
    }

    pub(crate) fn require_entry(&self, id: EntryId) -> Result<Entry> {
        self.master
            .get(id)?
            .ok_or_else(|| DirError::NoSuchObject(format!("entry id {id}")))
    }

    /// The entry's current normalized DN, reconstructed from the ndn index.
    pub(crate) fn current_norm_dn(&self, id: EntryId) -> Result<Dn> {
        let text = self
            .ndn
            .reverse_lookup(id)?
            .ok_or_else(|| DirError::NoSuchObject(format!("entry id {id}")))?;
        Dn::parse(&text)
    }

    /// The entry's current user-provided DN.
    pub(crate) fn current_updn(&self, id: EntryId) -> Result<Dn> {
        let text = self
            .updn
            .reverse_lookup(id)?
            .ok_or_else(|| DirError::NoSuchObject(format!("entry id {id}")))?;
        Dn::parse(&text)
    }

    pub(crate) fn user_index_for(&self, oid: &str) -> Option<Arc<Index<String>>> {
        self.user_indices.get(oid).map(Arc::clone)
    }

    /// Compare two attribute values under the attribute's equality rule.
    pub(crate) fn values_eq(at: &AttributeType, a: &AttrValue, b: &AttrValue) -> bool {
        match (a, b) {
            (AttrValue::Text(x), AttrValue::Text(y)) => {
                at.equality.apply(x) == at.equality.apply(y)
            }
            (AttrValue::Binary(x), AttrValue::Binary(y)) => x == y,
            _ => false,
        }
    }

    /// Raw index key of an attribute value. The index applies the
    /// attribute's normalizer; binary values are hex-keyed.
    pub(crate) fn value_key(value: &AttrValue) -> String {
        match value {
            AttrValue::Text(text) => text.clone(),
            AttrValue::Binary(bytes) => hex::encode(bytes),
        }
    }
}
