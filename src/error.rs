//! Error types shared across the partition engine.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DirError>;

/// Errors surfaced by the partition store and its storage layers.
///
/// Validation failures (`NoSuchObject`, the alias family, `SchemaViolation`)
/// are raised before any index mutation so the store is left unchanged.
/// `Corruption` and `IndexInconsistent` are fatal: once raised mid-mutation
/// the store refuses further writes until it is re-initialized.
#[derive(Debug, Error)]
pub enum DirError {
    /// I/O failure in the record file or working directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Operation invoked before `init` or after `destroy`.
    #[error("store is not initialized")]
    NotInitialized,
    /// Configuration setter invoked after `init`.
    #[error("store is already initialized")]
    AlreadyInitialized,
    /// A DN did not resolve to an entry id.
    #[error("no such object: {0}")]
    NoSuchObject(String),
    /// Add of a non-suffix DN whose parent is unknown.
    #[error("parent entry does not exist for: {0}")]
    NoSuchParent(String),
    /// Missing `objectClass` or an unresolvable attribute id.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    /// Alias entry is a descendant of its own target, or vice versa.
    #[error("alias cycle: {alias} and target {target} overlap")]
    AliasCycle {
        /// Normalized alias DN.
        alias: String,
        /// Normalized target DN.
        target: String,
    },
    /// Alias target is itself an alias.
    #[error("alias chain: target {0} is itself an alias")]
    AliasChain(String),
    /// Alias points at its own DN.
    #[error("alias dereferencing problem: {0} points at itself")]
    AliasToSelf(String),
    /// Alias target lies outside the partition suffix.
    #[error("alias target {target} is outside suffix {suffix}")]
    AliasExternal {
        /// Normalized target DN.
        target: String,
        /// Normalized partition suffix.
        suffix: String,
    },
    /// Alias target DN does not resolve to an entry.
    #[error("alias problem: target {0} does not exist")]
    AliasTargetMissing(String),
    /// Caller asked for an index that is not configured.
    #[error("no index configured for {0}")]
    IndexNotFound(String),
    /// Forward/reverse index mismatch; the store is tainted.
    #[error("index inconsistency: {0}")]
    IndexInconsistent(String),
    /// `modify` invoked with an operation outside ADD/REMOVE/REPLACE.
    #[error("unknown modification operation: {0}")]
    UnknownModificationOp(u8),
    /// On-disk state failed a structural or checksum check.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Entry or key codec failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Caller-supplied argument rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Cursor used after the underlying table was mutated or closed.
    #[error("cursor invalidated by concurrent mutation")]
    CursorInvalidated,
}
