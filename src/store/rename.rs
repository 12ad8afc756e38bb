//! RDN change, subtree move, and the recursive DN rewrite they share.

use tracing::debug;

use crate::error::{DirError, Result};
use crate::model::{AttrValue, EntryId};
use crate::name::{Dn, Rdn};
use crate::store::core::Inner;

impl Inner {
    /// Change the entry's RDN in place, optionally retiring the old RDN
    /// value from the entry and its indices.
    pub(crate) fn rename(&self, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        let (_updn, norm) = self.parse_dn(dn)?;
        let id = self.require_entry_id(&norm)?;
        self.rename_internal(id, new_rdn, delete_old_rdn)?;
        self.maybe_sync()?;
        Ok(())
    }

    /// Re-parent an entry, keeping its RDN.
    pub(crate) fn move_entry(&self, dn: &str, new_parent: &str) -> Result<()> {
        let (_updn, norm) = self.parse_dn(dn)?;
        let id = self.require_entry_id(&norm)?;
        self.move_internal(id, new_parent)?;
        self.maybe_sync()?;
        Ok(())
    }

    /// Re-parent an entry under a new RDN.
    pub(crate) fn move_and_rename(
        &self,
        dn: &str,
        new_parent: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let (_updn, norm) = self.parse_dn(dn)?;
        let id = self.require_entry_id(&norm)?;
        self.rename_internal(id, new_rdn, delete_old_rdn)?;
        self.move_internal(id, new_parent)?;
        self.maybe_sync()?;
        Ok(())
    }

    fn rename_internal(&self, id: EntryId, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        let current_updn = self.current_updn(id)?;
        let new_rdn = parse_rdn(new_rdn)?;
        let old_rdn = current_updn.rdn().clone();

        let new_type = self.schema.attribute_type(&new_rdn.attr)?;
        let old_type = self.schema.attribute_type(&old_rdn.attr)?;
        let unchanged = new_type.oid == old_type.oid
            && new_type.equality.apply(&new_rdn.value) == old_type.equality.apply(&old_rdn.value);

        if !unchanged {
            let mut entry = self.require_entry(id)?;
            let new_value = AttrValue::Text(new_rdn.value.clone());
            let already_present = entry
                .get(&new_rdn.attr)
                .map(|attr| {
                    attr.values
                        .iter()
                        .any(|v| Inner::values_eq(&new_type, v, &new_value))
                })
                .unwrap_or(false);
            if !already_present {
                entry.add_value(&new_rdn.attr, new_value);
            }
            if let Some(index) = self.user_index_for(&new_type.oid) {
                index.add_value(&new_rdn.value, id)?;
                if !self.presence.has_value(&new_type.oid, id)? {
                    self.presence.add(&new_type.oid, id)?;
                }
            }

            if delete_old_rdn {
                let old_value = AttrValue::Text(old_rdn.value.clone());
                entry.remove_value_by(&old_rdn.attr, |v| Inner::values_eq(&old_type, v, &old_value));
                if let Some(index) = self.user_index_for(&old_type.oid) {
                    index.drop_value(&old_rdn.value, id)?;
                    if index.reverse_values(id)?.is_empty() {
                        self.presence.drop_pair(&old_type.oid, id)?;
                    }
                }
            }
            self.master.put(id, &entry)?;
        }

        let parent = current_updn
            .parent()
            .ok_or_else(|| DirError::InvalidArgument("cannot rename the suffix entry".into()))?;
        let new_updn = parent.child(new_rdn);
        debug!(id, new_dn = %new_updn, "renaming entry");
        self.modify_dn(id, &new_updn, false)
    }

    fn move_internal(&self, child_id: EntryId, new_parent: &str) -> Result<()> {
        let child_norm = self.current_norm_dn(child_id)?;
        let (_parent_updn, parent_norm) = self.parse_dn(new_parent)?;
        let new_parent_id = self.require_entry_id(&parent_norm)?;
        if parent_norm.starts_with(&child_norm) {
            return Err(DirError::InvalidArgument(format!(
                "cannot move {child_norm} below itself"
            )));
        }
        let old_parent_id = self.hierarchy.reverse_lookup(child_id)?.ok_or_else(|| {
            DirError::Corruption(format!("entry {child_id} has no hierarchy parent"))
        })?;

        let displaced_aliases = self.drop_moved_alias_indices(&child_norm)?;

        self.hierarchy.drop_pair(&old_parent_id, child_id)?;
        self.hierarchy.add(&new_parent_id, child_id)?;

        let parent_updn = self.current_updn(new_parent_id)?;
        let child_rdn = self.current_updn(child_id)?.rdn().clone();
        let new_updn = parent_updn.child(child_rdn);
        debug!(child_id, new_parent_id, new_dn = %new_updn, "moving entry");
        self.modify_dn(child_id, &new_updn, true)?;

        // Aliases whose target moved get fresh records against the target's
        // new DN.
        for (alias_id, target_id) in displaced_aliases {
            let alias_dn = self.current_norm_dn(alias_id)?;
            let new_target = self.ndn.reverse_lookup(target_id)?.ok_or_else(|| {
                DirError::Corruption(format!("moved alias target {target_id} lost its DN"))
            })?;
            self.alias_add(alias_id, &alias_dn, &new_target)?;
        }
        Ok(())
    }

    /// Rewrite the entry's DNs and recurse over the child-id list captured
    /// before any mutation; a live hierarchy cursor must not be held while
    /// ndn/updn entries are rewritten mid-walk.
    pub(crate) fn modify_dn(&self, id: EntryId, new_updn: &Dn, is_move: bool) -> Result<()> {
        let new_norm = new_updn.normalize(self.schema.as_ref())?;

        self.ndn.drop_id(id)?;
        self.ndn.add(&new_norm.to_string(), id)?;
        self.updn.drop_id(id)?;
        self.updn.add(&new_updn.to_string(), id)?;

        if is_move {
            if let Some(target) = self.alias.reverse_lookup(id)? {
                self.alias_add(id, &new_norm, &target)?;
            }
        }

        let children = self.hierarchy.list(&id)?;
        for child_id in children {
            let child_rdn = self.current_updn(child_id)?.rdn().clone();
            let child_new_updn = new_updn.child(child_rdn);
            self.modify_dn(child_id, &child_new_updn, is_move)?;
        }
        Ok(())
    }
}

fn parse_rdn(text: &str) -> Result<Rdn> {
    let dn = Dn::parse(text)?;
    if dn.size() != 1 {
        return Err(DirError::InvalidArgument(format!(
            "expected a single RDN, got: {text}"
        )));
    }
    Ok(dn.rdn().clone())
}
