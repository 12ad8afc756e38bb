//! Debugging snapshot of the index entries touching one id.

use crate::error::Result;
use crate::model::EntryId;
use crate::store::core::{
    Inner, ALIAS_INDEX, HIERARCHY_INDEX, NDN_INDEX, ONE_ALIAS_INDEX, PRESENCE_INDEX,
    SUB_ALIAS_INDEX, UPDN_INDEX,
};

/// One index's view of an entry id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntrySnapshot {
    /// Index name: a system index name or a user-index attribute OID.
    /// `hierarchy.children` lists the forward side of the hierarchy index.
    pub index: String,
    /// Keys (or child ids) associated with the id, rendered as text.
    pub keys: Vec<String>,
}

impl Inner {
    pub(crate) fn index_snapshot(&self, id: EntryId) -> Result<Vec<IndexEntrySnapshot>> {
        let mut out = Vec::new();

        let mut push = |index: &str, keys: Vec<String>| {
            if !keys.is_empty() {
                out.push(IndexEntrySnapshot {
                    index: index.to_string(),
                    keys,
                });
            }
        };

        push(NDN_INDEX, self.ndn.reverse_values(id)?);
        push(UPDN_INDEX, self.updn.reverse_values(id)?);
        push(
            HIERARCHY_INDEX,
            self.hierarchy
                .reverse_values(id)?
                .iter()
                .map(u64::to_string)
                .collect(),
        );
        push(
            "hierarchy.children",
            self.hierarchy
                .list(&id)?
                .iter()
                .map(u64::to_string)
                .collect(),
        );
        push(PRESENCE_INDEX, self.presence.reverse_values(id)?);
        push(ALIAS_INDEX, self.alias.reverse_values(id)?);
        push(
            ONE_ALIAS_INDEX,
            self.one_alias
                .reverse_values(id)?
                .iter()
                .map(u64::to_string)
                .collect(),
        );
        push(
            SUB_ALIAS_INDEX,
            self.sub_alias
                .reverse_values(id)?
                .iter()
                .map(u64::to_string)
                .collect(),
        );
        for (oid, index) in &self.user_indices {
            push(oid, index.reverse_values(id)?);
        }

        Ok(out)
    }
}
