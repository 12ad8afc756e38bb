//! Data model for directory entries.
//!
//! This module defines the structures persisted by the master table and
//! manipulated by the store coordinator.
//!
//! # Key Types
//!
//! - [`Entry`] - an ordered bag of attributes keyed case-insensitively
//! - [`Attribute`] - an attribute id with its ordered, non-empty values
//! - [`AttrValue`] - a textual or binary attribute value
//! - [`Modification`] / [`ModOp`] - one step of a modify operation
//! - [`EntryId`] - the opaque 64-bit identifier assigned at insert

use std::fmt;

/// Unique identifier for entries within one partition.
pub type EntryId = u64;

/// Sentinel parent id of the partition suffix.
pub const ROOT_PARENT_ID: EntryId = 0;

/// Attribute id of the object class attribute every entry must carry.
pub const OBJECT_CLASS_AT: &str = "objectClass";

/// Object class value marking an alias entry.
pub const ALIAS_OC: &str = "alias";

/// Attribute id carrying an alias entry's target DN.
pub const ALIASED_OBJECT_NAME_AT: &str = "aliasedObjectName";

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// UTF-8 string value.
    Text(String),
    /// Arbitrary byte value.
    Binary(Vec<u8>),
}

impl AttrValue {
    /// Bytes used when the value becomes an index key.
    pub fn as_key_bytes(&self) -> &[u8] {
        match self {
            AttrValue::Text(s) => s.as_bytes(),
            AttrValue::Binary(b) => b,
        }
    }

    /// Textual form, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Binary(_) => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Binary(b) => write!(f, "#{}-bytes", b.len()),
        }
    }
}

/// An attribute: the id as the user supplied it plus its ordered values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute id, original casing preserved.
    pub id: String,
    /// Ordered values; never empty while the attribute is present.
    pub values: Vec<AttrValue>,
}

impl Attribute {
    /// Create an attribute with the given values.
    pub fn new(id: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    /// Create a single-valued text attribute.
    pub fn text(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: vec![AttrValue::Text(value.into())],
        }
    }
}

/// An ordered, case-insensitively keyed bag of attributes.
///
/// Attribute and value order is preserved exactly as supplied; lookups match
/// ids without regard to case. Every entry persisted by the store carries an
/// `objectClass` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    attrs: Vec<Attribute>,
}

impl Entry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Number of attributes present.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// True when no attributes are present.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Case-insensitive attribute lookup.
    pub fn get(&self, id: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.id.eq_ignore_ascii_case(id))
    }

    /// Case-insensitive mutable attribute lookup.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Attribute> {
        self.attrs
            .iter_mut()
            .find(|a| a.id.eq_ignore_ascii_case(id))
    }

    /// True when the attribute is present with at least one value.
    pub fn has(&self, id: &str) -> bool {
        self.get(id).map(|a| !a.values.is_empty()).unwrap_or(false)
    }

    /// True when the attribute carries the given text value,
    /// compared case-insensitively.
    pub fn has_text_value(&self, id: &str, value: &str) -> bool {
        self.get(id)
            .map(|a| {
                a.values.iter().any(|v| match v {
                    AttrValue::Text(s) => s.eq_ignore_ascii_case(value),
                    AttrValue::Binary(_) => false,
                })
            })
            .unwrap_or(false)
    }

    /// Append a whole attribute, replacing any existing one with the same id.
    pub fn put(&mut self, attr: Attribute) {
        match self.get_mut(&attr.id) {
            Some(existing) => *existing = attr,
            None => self.attrs.push(attr),
        }
    }

    /// Append a value to an attribute, creating the attribute if absent.
    pub fn add_value(&mut self, id: &str, value: AttrValue) {
        match self.get_mut(id) {
            Some(attr) => attr.values.push(value),
            None => self.attrs.push(Attribute::new(id, vec![value])),
        }
    }

    /// Remove one value from an attribute using the supplied equality test;
    /// drops the attribute entirely once its last value is gone. Returns
    /// whether a value was removed.
    pub fn remove_value_by<F>(&mut self, id: &str, mut eq: F) -> bool
    where
        F: FnMut(&AttrValue) -> bool,
    {
        let Some(pos) = self
            .attrs
            .iter()
            .position(|a| a.id.eq_ignore_ascii_case(id))
        else {
            return false;
        };
        let attr = &mut self.attrs[pos];
        let Some(vpos) = attr.values.iter().position(|v| eq(v)) else {
            return false;
        };
        attr.values.remove(vpos);
        if attr.values.is_empty() {
            self.attrs.remove(pos);
        }
        true
    }

    /// Remove a whole attribute; returns it when present.
    pub fn remove(&mut self, id: &str) -> Option<Attribute> {
        let pos = self
            .attrs
            .iter()
            .position(|a| a.id.eq_ignore_ascii_case(id))?;
        Some(self.attrs.remove(pos))
    }

    /// True when `objectClass` contains the given class value.
    pub fn has_object_class(&self, oc: &str) -> bool {
        self.has_text_value(OBJECT_CLASS_AT, oc)
    }
}

/// Modification operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    /// Add values to an attribute, creating it if absent.
    Add,
    /// Remove listed values, or the whole attribute when none are listed.
    Remove,
    /// Replace the attribute's values wholesale.
    Replace,
}

impl ModOp {
    /// Decode from the wire byte used by directory protocols.
    pub fn from_byte(byte: u8) -> crate::error::Result<Self> {
        match byte {
            0 => Ok(Self::Add),
            1 => Ok(Self::Remove),
            2 => Ok(Self::Replace),
            other => Err(crate::error::DirError::UnknownModificationOp(other)),
        }
    }
}

/// One step of a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation applied to the attribute.
    pub op: ModOp,
    /// Attribute id the operation targets.
    pub attr_id: String,
    /// Values added, removed, or substituted. May be empty for `Remove`
    /// (drop the whole attribute) and `Replace` (drop and leave absent).
    pub values: Vec<AttrValue>,
}

impl Modification {
    /// Build a modification step.
    pub fn new(op: ModOp, attr_id: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Self {
            op,
            attr_id: attr_id.into(),
            values,
        }
    }
}
