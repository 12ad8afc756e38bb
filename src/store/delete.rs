//! Entry deletion.
//!
//! Deleting an entry that still has children is a caller error; the
//! coordinator never deletes recursively. `child_count` is exposed so the
//! caller can check first.

use tracing::debug;

use crate::error::Result;
use crate::model::{EntryId, ALIAS_OC, ROOT_PARENT_ID};
use crate::store::core::Inner;

impl Inner {
    pub(crate) fn delete(&self, id: EntryId) -> Result<()> {
        let entry = self.require_entry(id)?;
        let parent_id = self.hierarchy.reverse_lookup(id)?;

        if entry.has_object_class(ALIAS_OC) {
            self.alias_drop(id)?;
        }

        self.ndn.drop_id(id)?;
        self.updn.drop_id(id)?;
        self.hierarchy.drop_id(id)?;
        if let Some(parent_id) = parent_id {
            if parent_id != ROOT_PARENT_ID {
                self.hierarchy.drop_pair(&parent_id, id)?;
            }
        }

        for attr in entry.attributes() {
            let oid = self.schema.resolve_oid(&attr.id)?;
            if let Some(index) = self.user_index_for(&oid) {
                for value in &attr.values {
                    index.drop_value(&Self::value_key(value), id)?;
                }
                self.presence.drop_pair(&oid, id)?;
            }
        }

        self.master.delete(id)?;
        self.maybe_sync()?;
        debug!(id, "entry deleted");
        Ok(())
    }

    pub(crate) fn child_count(&self, id: EntryId) -> Result<u64> {
        self.hierarchy.count_key(&id)
    }

    pub(crate) fn children(&self, id: EntryId) -> Result<Vec<EntryId>> {
        self.hierarchy.list(&id)
    }
}
