//! Alias index maintenance.
//!
//! An alias entry owns one record in the alias index (normalized target DN
//! keyed to the alias id) plus scope tuples: `oneAlias` for its parent when
//! the target is not a sibling, and `subAlias` for every ancestor strictly
//! below the suffix whose subtree does not already contain the target.

use tracing::debug;

use crate::error::{DirError, Result};
use crate::model::EntryId;
use crate::name::Dn;
use crate::store::core::Inner;

impl Inner {
    /// Validate and index an alias. Every validation runs before the first
    /// index write, so failures leave the store untouched.
    pub(crate) fn alias_add(
        &self,
        alias_id: EntryId,
        alias_dn: &Dn,
        target_str: &str,
    ) -> Result<()> {
        let target = Dn::parse(target_str)?.normalize(self.schema.as_ref())?;
        let target_text = target.to_string();

        if *alias_dn == target {
            return Err(DirError::AliasToSelf(alias_dn.to_string()));
        }
        if alias_dn.starts_with(&target) {
            return Err(DirError::AliasCycle {
                alias: alias_dn.to_string(),
                target: target_text,
            });
        }
        if !target.starts_with(&self.suffix) {
            return Err(DirError::AliasExternal {
                target: target_text,
                suffix: self.suffix.to_string(),
            });
        }
        let target_id = self
            .ndn
            .forward_lookup(&target_text)?
            .ok_or_else(|| DirError::AliasTargetMissing(target_text.clone()))?;
        if self.alias.reverse_lookup(target_id)?.is_some() {
            return Err(DirError::AliasChain(target_text));
        }

        self.alias.add(&target_text, alias_id)?;

        let Some(parent) = alias_dn.parent() else {
            return Ok(());
        };
        let Some(parent_id) = self.entry_id_norm(&parent)? else {
            return Ok(());
        };

        if !target.is_sibling_of(alias_dn) {
            self.one_alias.add(&parent_id, target_id)?;
        }

        let mut ancestor = parent;
        let mut ancestor_id = Some(parent_id);
        while ancestor != self.suffix {
            let Some(aid) = ancestor_id else { break };
            if !target.starts_with(&ancestor) {
                self.sub_alias.add(&aid, target_id)?;
            }
            match ancestor.parent() {
                Some(up) => {
                    ancestor_id = self.entry_id_norm(&up)?;
                    ancestor = up;
                }
                None => break,
            }
        }
        debug!(alias_id, target = %target_text, "alias indexed");
        Ok(())
    }

    /// Remove an alias's record and every scope tuple derived from it.
    pub(crate) fn alias_drop(&self, alias_id: EntryId) -> Result<()> {
        let Some(target_text) = self.alias.reverse_lookup(alias_id)? else {
            return Ok(());
        };
        let target_id = self.ndn.forward_lookup(&target_text)?;

        if let Some(target_id) = target_id {
            if let Some(alias_text) = self.ndn.reverse_lookup(alias_id)? {
                let alias_dn = Dn::parse(&alias_text)?;
                if let Some(parent) = alias_dn.parent() {
                    if let Some(parent_id) = self.entry_id_norm(&parent)? {
                        self.one_alias.drop_pair(&parent_id, target_id)?;
                    }
                    let mut ancestor = Some(parent);
                    while let Some(a) = ancestor {
                        if a == self.suffix {
                            break;
                        }
                        if let Some(aid) = self.entry_id_norm(&a)? {
                            self.sub_alias.drop_pair(&aid, target_id)?;
                        }
                        ancestor = a.parent();
                    }
                }
            }
        }

        self.alias.drop_id(alias_id)?;
        debug!(alias_id, "alias dropped");
        Ok(())
    }

    /// Clear alias state invalidated by moving the subtree at `moved_base`.
    ///
    /// Aliases living inside the moved subtree lose their scope tuples above
    /// the moved base (tuples within the subtree stay valid and are
    /// re-added idempotently after the move). Aliases whose *target* lives
    /// inside the subtree are dropped entirely and returned as
    /// `(alias_id, target_id)` pairs so the caller can re-index them against
    /// the target's post-move DN.
    pub(crate) fn drop_moved_alias_indices(
        &self,
        moved_base: &Dn,
    ) -> Result<Vec<(EntryId, EntryId)>> {
        let mut pairs = Vec::new();
        {
            let mut cursor = self.alias.cursor()?;
            while let Some((target_text, alias_id)) = cursor.next()? {
                pairs.push((target_text, alias_id));
            }
        }

        let mut displaced = Vec::new();
        for (target_text, alias_id) in pairs {
            let target_dn = Dn::parse(&target_text)?;
            if target_dn.starts_with(moved_base) {
                let target_id = self.ndn.forward_lookup(&target_text)?.ok_or_else(|| {
                    DirError::Corruption(format!("alias target {target_text} has no id"))
                })?;
                self.alias_drop(alias_id)?;
                displaced.push((alias_id, target_id));
                continue;
            }
            let Some(alias_text) = self.ndn.reverse_lookup(alias_id)? else {
                continue;
            };
            let alias_dn = Dn::parse(&alias_text)?;
            if alias_dn.starts_with(moved_base) {
                self.drop_alias_scope_above(&alias_dn, moved_base, &target_text)?;
            }
        }
        Ok(displaced)
    }

    /// Drop the scope tuples an alias holds for ancestors strictly above
    /// `moved_base`. The one-level tuple goes only when the alias *is* the
    /// moved base; for deeper aliases it references a parent that moves
    /// along with them.
    fn drop_alias_scope_above(
        &self,
        alias_dn: &Dn,
        moved_base: &Dn,
        target_text: &str,
    ) -> Result<()> {
        let Some(target_id) = self.ndn.lookup_value(target_text)? else {
            return Ok(());
        };
        let Some(parent) = moved_base.parent() else {
            return Ok(());
        };
        if alias_dn == moved_base {
            if let Some(parent_id) = self.entry_id_norm(&parent)? {
                self.one_alias.drop_pair(&parent_id, target_id)?;
            }
        }
        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            if a == self.suffix {
                break;
            }
            if let Some(aid) = self.entry_id_norm(&a)? {
                self.sub_alias.drop_pair(&aid, target_id)?;
            }
            ancestor = a.parent();
        }
        Ok(())
    }
}
