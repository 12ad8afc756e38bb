//! # ditstore - Embedded LDAP Partition Store
//!
//! ditstore is an embedded, B+tree-backed storage engine for one LDAP
//! directory partition: entries keyed by an internal 64-bit id plus the
//! family of secondary indices that make hierarchical, attribute-based, and
//! alias-aware lookups efficient. Every mutation keeps the whole index
//! family consistent.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ditstore::{Attribute, CoreSchema, Entry, IndexConfig, Store};
//!
//! let store = Store::new(Arc::new(CoreSchema::new()));
//! store.set_working_directory("/var/lib/partition")?;
//! store.set_suffix_dn("ou=system")?;
//! store.add_indexed_attribute(IndexConfig::new("cn"))?;
//! store.init()?;
//!
//! let mut entry = Entry::new();
//! entry.put(Attribute::new(
//!     "objectClass",
//!     vec!["top".into(), "person".into()],
//! ));
//! entry.put(Attribute::text("cn", "Alice"));
//! entry.put(Attribute::text("sn", "A"));
//! let id = store.add("cn=Alice,ou=system", entry)?;
//!
//! assert_eq!(store.entry_id("CN=alice, OU=system")?, Some(id));
//! store.destroy()?;
//! # Ok::<(), ditstore::DirError>(())
//! ```
//!
//! ## Architecture
//!
//! Layered, leaves first:
//! - **Pager**: checksummed 8 KiB pages behind an LRU cache
//! - **Record manager**: slotted records with overflow chains, named roots,
//!   and a property sidecar
//! - **B+tree tables**: ordered multimaps with threshold-switched duplicate
//!   handling and chained-leaf cursors
//! - **Master + indices**: the canonical entry table and the
//!   forward/reverse index pairs
//! - **Store**: the coordinator enforcing the referential invariants on
//!   add/delete/modify/rename/move
//!
//! Durability is explicit: `sync` commits every record file, or configure
//! sync-on-write to commit after each mutation.

pub mod btree;
pub mod error;
pub mod index;
pub mod master;
pub mod model;
pub mod name;
pub mod pager;
pub mod schema;
pub mod storage;
pub mod store;

// Re-export the main public API
pub use crate::error::{DirError, Result};
pub use crate::index::Index;
pub use crate::model::{
    AttrValue, Attribute, Entry, EntryId, ModOp, Modification, ALIASED_OBJECT_NAME_AT, ALIAS_OC,
    OBJECT_CLASS_AT, ROOT_PARENT_ID,
};
pub use crate::name::{Dn, Rdn};
pub use crate::schema::{AttributeType, CoreSchema, Normalizer, SchemaRef, SchemaResolver};
pub use crate::store::{
    IndexConfig, IndexEntrySnapshot, Store, StoreConfig, SystemIndexHandle,
};
