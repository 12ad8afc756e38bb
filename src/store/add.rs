//! Entry addition.

use tracing::debug;

use crate::error::{DirError, Result};
use crate::model::{Entry, EntryId, ALIASED_OBJECT_NAME_AT, ALIAS_OC, OBJECT_CLASS_AT, ROOT_PARENT_ID};
use crate::name::Dn;
use crate::store::core::Inner;

impl Inner {
    /// Add an entry under `dn`. Returns the id assigned to it.
    pub(crate) fn add(&self, dn: &str, entry: Entry) -> Result<EntryId> {
        let (updn, norm) = self.parse_dn(dn)?;
        self.add_parsed(updn, norm, entry)
    }

    pub(crate) fn add_parsed(&self, updn: Dn, norm: Dn, entry: Entry) -> Result<EntryId> {
        let norm_str = norm.to_string();
        if self.ndn.forward_lookup(&norm_str)?.is_some() {
            return Err(DirError::InvalidArgument(format!(
                "entry already exists: {norm_str}"
            )));
        }
        // Resolve every attribute id up front so schema violations surface
        // before any index is touched.
        let mut attr_oids = Vec::with_capacity(entry.attributes().len());
        for attr in entry.attributes() {
            attr_oids.push(self.schema.resolve_oid(&attr.id)?);
        }

        let id = self.master.next_id()?;

        let parent_id = if norm == self.suffix {
            ROOT_PARENT_ID
        } else {
            let parent = norm
                .parent()
                .ok_or_else(|| DirError::NoSuchParent(updn.to_string()))?;
            self.entry_id_norm(&parent)?
                .ok_or_else(|| DirError::NoSuchParent(updn.to_string()))?
        };

        if !entry.has(OBJECT_CLASS_AT) {
            return Err(DirError::SchemaViolation(format!(
                "entry {updn} has no objectClass attribute"
            )));
        }

        if entry.has_object_class(ALIAS_OC) {
            let target = entry
                .get(ALIASED_OBJECT_NAME_AT)
                .and_then(|attr| attr.values.first())
                .and_then(|value| value.as_text())
                .map(str::to_string)
                .ok_or_else(|| {
                    DirError::SchemaViolation(format!(
                        "alias entry {updn} is missing aliasedObjectName"
                    ))
                })?;
            self.alias_add(id, &norm, &target)?;
        }

        self.ndn.add(&norm_str, id)?;
        self.updn.add(&updn.to_string(), id)?;
        self.hierarchy.add(&parent_id, id)?;

        for (attr, oid) in entry.attributes().iter().zip(&attr_oids) {
            if let Some(index) = self.user_index_for(oid) {
                for value in &attr.values {
                    index.add_value(&Self::value_key(value), id)?;
                }
                self.presence.add(oid, id)?;
            }
        }

        self.master.put(id, &entry)?;
        self.maybe_sync()?;
        debug!(id, dn = %updn, "entry added");
        Ok(id)
    }
}
