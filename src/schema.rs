//! Schema collaborator interface.
//!
//! The partition consumes a narrow slice of the directory schema: attribute
//! id to OID resolution and the equality matching rule used to normalize
//! index keys and DN values. [`CoreSchema`] ships the handful of standard
//! attribute types the engine and its tests rely on; a server embeds the
//! store with its own [`SchemaResolver`] backed by the full registry.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{DirError, Result};

/// Equality matching rule applied when normalizing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    /// Case-insensitive match with insignificant-space handling
    /// (caseIgnoreMatch and friends).
    CaseIgnore,
    /// Byte-for-byte match (caseExactMatch, octetStringMatch).
    Exact,
    /// Distinguished name match; values are DNs normalized by the caller.
    DnMatch,
}

impl Normalizer {
    /// Canonicalize a textual value under this rule.
    ///
    /// `CaseIgnore` lowercases ASCII, trims, and squeezes interior runs of
    /// spaces to one, which is the behavior directory equality rules demand
    /// for the attribute types seeded here.
    pub fn apply(&self, value: &str) -> String {
        match self {
            Normalizer::Exact => value.to_string(),
            Normalizer::CaseIgnore | Normalizer::DnMatch => {
                let mut out = String::with_capacity(value.len());
                let mut pending_space = false;
                for ch in value.trim().chars() {
                    if ch == ' ' {
                        pending_space = true;
                        continue;
                    }
                    if pending_space {
                        out.push(' ');
                        pending_space = false;
                    }
                    out.extend(ch.to_lowercase());
                }
                out
            }
        }
    }
}

/// The slice of an attribute type definition the store needs.
#[derive(Debug, Clone)]
pub struct AttributeType {
    /// Canonical OID.
    pub oid: String,
    /// Names the attribute answers to, primary name first.
    pub names: Vec<String>,
    /// Equality matching rule.
    pub equality: Normalizer,
    /// Whether the attribute holds DN-syntax values.
    pub dn_syntax: bool,
}

impl AttributeType {
    fn new(oid: &str, names: &[&str], equality: Normalizer) -> Self {
        Self {
            oid: oid.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            equality,
            dn_syntax: equality == Normalizer::DnMatch,
        }
    }

    /// Primary (first registered) name.
    pub fn primary_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }
}

/// Schema resolution contract consumed by the store.
pub trait SchemaResolver: Send + Sync {
    /// Resolve an attribute id (name or OID, any casing) to its OID.
    fn resolve_oid(&self, attr_id: &str) -> Result<String>;

    /// Look up the attribute type for an OID or name.
    fn attribute_type(&self, attr_id: &str) -> Result<Arc<AttributeType>>;
}

/// Shared schema handle.
pub type SchemaRef = Arc<dyn SchemaResolver>;

/// Seeded resolver covering the standard attribute types.
///
/// Unknown ids fail with [`DirError::SchemaViolation`], which is the same
/// surface a full registry presents for undefined attributes.
pub struct CoreSchema {
    by_key: FxHashMap<String, Arc<AttributeType>>,
}

impl CoreSchema {
    /// Build the seeded schema.
    pub fn new() -> Self {
        let mut schema = Self {
            by_key: FxHashMap::default(),
        };
        for at in Self::seed() {
            schema.register(at);
        }
        schema
    }

    /// Register an attribute type under its OID and all of its names.
    pub fn register(&mut self, at: AttributeType) {
        let at = Arc::new(at);
        self.by_key.insert(at.oid.clone(), Arc::clone(&at));
        for name in &at.names {
            self.by_key.insert(name.to_ascii_lowercase(), Arc::clone(&at));
        }
    }

    fn seed() -> Vec<AttributeType> {
        use Normalizer::{CaseIgnore, DnMatch};
        vec![
            AttributeType::new("2.5.4.0", &["objectClass"], CaseIgnore),
            AttributeType::new("2.5.4.1", &["aliasedObjectName"], DnMatch),
            AttributeType::new("2.5.4.3", &["cn", "commonName"], CaseIgnore),
            AttributeType::new("2.5.4.4", &["sn", "surname"], CaseIgnore),
            AttributeType::new("2.5.4.7", &["l", "localityName"], CaseIgnore),
            AttributeType::new("2.5.4.10", &["o", "organizationName"], CaseIgnore),
            AttributeType::new(
                "2.5.4.11",
                &["ou", "organizationalUnitName"],
                CaseIgnore,
            ),
            AttributeType::new("2.5.4.12", &["title"], CaseIgnore),
            AttributeType::new("2.5.4.13", &["description"], CaseIgnore),
            AttributeType::new("2.5.4.20", &["telephoneNumber"], CaseIgnore),
            AttributeType::new("2.5.4.35", &["userPassword"], Normalizer::Exact),
            AttributeType::new("2.5.4.41", &["name"], CaseIgnore),
            AttributeType::new("2.5.4.42", &["givenName", "gn"], CaseIgnore),
            AttributeType::new("0.9.2342.19200300.100.1.1", &["uid", "userid"], CaseIgnore),
            AttributeType::new("0.9.2342.19200300.100.1.3", &["mail"], CaseIgnore),
            AttributeType::new(
                "0.9.2342.19200300.100.1.25",
                &["dc", "domainComponent"],
                CaseIgnore,
            ),
            AttributeType::new("2.5.4.34", &["seeAlso"], DnMatch),
        ]
    }

    fn lookup(&self, attr_id: &str) -> Result<&Arc<AttributeType>> {
        let key = attr_id.trim();
        if let Some(at) = self.by_key.get(key) {
            return Ok(at);
        }
        self.by_key
            .get(&key.to_ascii_lowercase())
            .ok_or_else(|| DirError::SchemaViolation(format!("unknown attribute id: {attr_id}")))
    }
}

impl Default for CoreSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaResolver for CoreSchema {
    fn resolve_oid(&self, attr_id: &str) -> Result<String> {
        Ok(self.lookup(attr_id)?.oid.clone())
    }

    fn attribute_type(&self, attr_id: &str) -> Result<Arc<AttributeType>> {
        Ok(Arc::clone(self.lookup(attr_id)?))
    }
}
