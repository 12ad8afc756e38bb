//! Persistent storage substrate.
//!
//! The pager serves checksummed pages, [`page`] lays slotted records onto
//! them, and [`recman`] exposes the record-level store the B+tree tables
//! are built on. [`ser`] is the byte codec for entries held by the master
//! table.

pub mod page;
pub mod recman;
pub mod ser;

pub use recman::{RecordId, RecordManager};
pub use ser::{deserialize_entry, serialize_entry};
