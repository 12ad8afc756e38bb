//! Attribute modification.

use crate::error::Result;
use crate::model::{Attribute, Entry, EntryId, ModOp, Modification};
use crate::name::Dn;
use crate::store::core::Inner;

impl Inner {
    /// Apply one operation to a set of attributes.
    pub(crate) fn modify(&self, dn: &str, op: ModOp, mods: &[Attribute]) -> Result<()> {
        let items: Vec<Modification> = mods
            .iter()
            .map(|attr| Modification::new(op, attr.id.clone(), attr.values.clone()))
            .collect();
        self.modify_items(dn, &items)
    }

    /// Apply a sequence of modification items in order.
    pub(crate) fn modify_items(&self, dn: &str, mods: &[Modification]) -> Result<()> {
        let (_updn, norm) = self.parse_dn(dn)?;
        let id = self.require_entry_id(&norm)?;
        let mut entry = self.require_entry(id)?;

        for item in mods {
            match item.op {
                ModOp::Add => self.apply_add(&mut entry, id, &norm, item)?,
                ModOp::Remove => self.apply_remove(&mut entry, id, item)?,
                ModOp::Replace => self.apply_replace(&mut entry, id, &norm, item)?,
            }
        }

        self.master.put(id, &entry)?;
        self.maybe_sync()?;
        Ok(())
    }

    fn apply_add(
        &self,
        entry: &mut Entry,
        id: EntryId,
        norm_dn: &Dn,
        item: &Modification,
    ) -> Result<()> {
        let oid = self.schema.resolve_oid(&item.attr_id)?;
        if let Some(index) = self.user_index_for(&oid) {
            for value in &item.values {
                index.add_value(&Self::value_key(value), id)?;
            }
            if !item.values.is_empty() && !self.presence.has_value(&oid, id)? {
                self.presence.add(&oid, id)?;
            }
        }
        for value in &item.values {
            entry.add_value(&item.attr_id, value.clone());
        }
        if oid == self.alias_oid {
            if let Some(target) = item.values.first().and_then(|v| v.as_text()) {
                self.alias_add(id, norm_dn, target)?;
            }
        }
        Ok(())
    }

    fn apply_remove(&self, entry: &mut Entry, id: EntryId, item: &Modification) -> Result<()> {
        let oid = self.schema.resolve_oid(&item.attr_id)?;
        let attr_type = self.schema.attribute_type(&item.attr_id)?;
        let index = self.user_index_for(&oid);

        if item.values.is_empty() {
            // Remove the whole attribute. A missing attribute is not an
            // error; the operation silently proceeds.
            if let Some(attr) = entry.remove(&item.attr_id) {
                if let Some(index) = &index {
                    for value in &attr.values {
                        index.drop_value(&Self::value_key(value), id)?;
                    }
                    if index.reverse_values(id)?.is_empty() {
                        self.presence.drop_pair(&oid, id)?;
                    }
                }
            }
        } else {
            for value in &item.values {
                let removed =
                    entry.remove_value_by(&item.attr_id, |v| Inner::values_eq(&attr_type, v, value));
                if removed {
                    if let Some(index) = &index {
                        index.drop_value(&Self::value_key(value), id)?;
                    }
                }
            }
            if let Some(index) = &index {
                if index.reverse_values(id)?.is_empty() {
                    self.presence.drop_pair(&oid, id)?;
                }
            }
        }

        if oid == self.alias_oid {
            self.alias_drop(id)?;
        }
        Ok(())
    }

    fn apply_replace(
        &self,
        entry: &mut Entry,
        id: EntryId,
        norm_dn: &Dn,
        item: &Modification,
    ) -> Result<()> {
        let oid = self.schema.resolve_oid(&item.attr_id)?;
        if let Some(index) = self.user_index_for(&oid) {
            index.drop_id(id)?;
            for value in &item.values {
                index.add_value(&Self::value_key(value), id)?;
            }
            if item.values.is_empty() {
                if index.reverse_values(id)?.is_empty() {
                    self.presence.drop_pair(&oid, id)?;
                }
            } else if !self.presence.has_value(&oid, id)? {
                self.presence.add(&oid, id)?;
            }
        }

        if item.values.is_empty() {
            entry.remove(&item.attr_id);
        } else {
            entry.put(Attribute::new(item.attr_id.clone(), item.values.clone()));
        }

        if oid == self.alias_oid {
            self.alias_drop(id)?;
            if let Some(target) = item.values.first().and_then(|v| v.as_text()) {
                self.alias_add(id, norm_dn, target)?;
            }
        }
        Ok(())
    }
}
