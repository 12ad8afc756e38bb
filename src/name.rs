//! Distinguished names.
//!
//! A [`Dn`] is a leaf-first sequence of [`Rdn`] components. DNs exist in two
//! forms: the user-provided form preserves original casing and spacing, the
//! normalized form carries OID attribute types and values canonicalized by
//! the schema's equality rules. Ancestry, sibling, and equality tests are
//! only meaningful on normalized DNs.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{DirError, Result};
use crate::schema::SchemaResolver;

/// One `attr=value` DN component. The stored attribute id and value are in
/// unescaped form; escaping is applied when rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rdn {
    /// Attribute id (name in a user DN, OID in a normalized DN).
    pub attr: String,
    /// Attribute value, unescaped.
    pub value: String,
}

impl Rdn {
    /// Build an RDN from an id and unescaped value.
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, escape_value(&self.value))
    }
}

/// A distinguished name; component 0 is the leftmost (leaf) RDN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dn {
    rdns: SmallVec<[Rdn; 4]>,
}

impl Dn {
    /// Parse a DN string. Components are comma-separated `attr=value`
    /// pairs; backslash escapes the next character. Multi-valued RDNs
    /// (`+`) are not supported.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DirError::InvalidArgument("empty DN".into()));
        }
        let mut rdns = SmallVec::new();
        for component in split_unescaped(trimmed, ',') {
            rdns.push(parse_rdn(&component)?);
        }
        Ok(Self { rdns })
    }

    /// Build a DN from leaf-first components.
    pub fn from_rdns(rdns: Vec<Rdn>) -> Result<Self> {
        if rdns.is_empty() {
            return Err(DirError::InvalidArgument("empty DN".into()));
        }
        Ok(Self {
            rdns: rdns.into(),
        })
    }

    /// Number of RDN components.
    pub fn size(&self) -> usize {
        self.rdns.len()
    }

    /// Component by position counted from the suffix end: `get(0)` is the
    /// component closest to the partition root.
    pub fn get(&self, i: usize) -> Option<&Rdn> {
        self.rdns.get(self.rdns.len().checked_sub(i + 1)?)
    }

    /// The leaf (leftmost) RDN.
    pub fn rdn(&self) -> &Rdn {
        &self.rdns[0]
    }

    /// Leaf-first view of the components.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The `n` suffix-most components as a DN; `None` when `n` is zero or
    /// exceeds the size.
    pub fn prefix(&self, n: usize) -> Option<Dn> {
        if n == 0 || n > self.rdns.len() {
            return None;
        }
        Some(Dn {
            rdns: self.rdns[self.rdns.len() - n..].iter().cloned().collect(),
        })
    }

    /// The immediate parent, or `None` for a single-component DN.
    pub fn parent(&self) -> Option<Dn> {
        self.prefix(self.rdns.len().checked_sub(1)?)
    }

    /// True when `other` is this DN or an ancestor of it.
    pub fn starts_with(&self, other: &Dn) -> bool {
        if other.rdns.len() > self.rdns.len() {
            return false;
        }
        let skip = self.rdns.len() - other.rdns.len();
        self.rdns[skip..] == other.rdns[..]
    }

    /// True when this DN lies strictly below `other`.
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        self.rdns.len() > other.rdns.len() && self.starts_with(other)
    }

    /// True when both DNs share the same parent.
    pub fn is_sibling_of(&self, other: &Dn) -> bool {
        match (self.parent(), other.parent()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }

    /// The DN one level below this one, with `rdn` as the new leaf.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = SmallVec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// Replace the leaf RDN, keeping the parent portion.
    pub fn with_rdn(&self, rdn: Rdn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns[0] = rdn;
        Dn { rdns }
    }

    /// Normalize every component through the schema: attribute ids become
    /// OIDs, values pass through the type's equality normalizer.
    pub fn normalize(&self, schema: &dyn SchemaResolver) -> Result<Dn> {
        let mut rdns = SmallVec::with_capacity(self.rdns.len());
        for rdn in &self.rdns {
            let at = schema.attribute_type(&rdn.attr)?;
            rdns.push(Rdn {
                attr: at.oid.clone(),
                value: at.equality.apply(&rdn.value),
            });
        }
        Ok(Dn { rdns })
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

fn parse_rdn(component: &str) -> Result<Rdn> {
    let component = component.trim();
    let mut parts = split_unescaped(component, '=');
    let attr = parts.next().ok_or_else(|| {
        DirError::InvalidArgument(format!("malformed RDN: {component}"))
    })?;
    let value = parts.next().ok_or_else(|| {
        DirError::InvalidArgument(format!("RDN missing '=': {component}"))
    })?;
    if parts.next().is_some() {
        return Err(DirError::InvalidArgument(format!(
            "RDN has more than one '=': {component}"
        )));
    }
    let attr = attr.trim();
    let value = value.trim();
    if attr.is_empty() || value.is_empty() {
        return Err(DirError::InvalidArgument(format!(
            "empty attribute or value in RDN: {component}"
        )));
    }
    if contains_unescaped(value, '+') || contains_unescaped(attr, '+') {
        return Err(DirError::InvalidArgument(format!(
            "multi-valued RDNs are not supported: {component}"
        )));
    }
    Ok(Rdn {
        attr: unescape(attr),
        value: unescape(value),
    })
}

fn split_unescaped(input: &str, sep: char) -> impl Iterator<Item = String> + '_ {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts.into_iter()
}

fn contains_unescaped(input: &str, needle: char) -> bool {
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == needle {
            return true;
        }
    }
    false
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, ',' | '=' | '+' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
