//! B+tree tables over the record manager.
//!
//! A [`Table`] is an ordered multimap with a caller-supplied key order
//! (via [`KeyCodec`]) and value order (via [`ValCodec`]). Tree nodes are
//! records; leaves form a doubly linked chain serviced by [`TableCursor`].

mod cursor;
mod node;
mod table;

use std::cmp::Ordering;

use crate::error::{DirError, Result};

pub use cursor::TableCursor;
pub use table::{Table, DEFAULT_DUPLICATE_LIMIT};

/// Key types storable in a table: order-preserving encoding plus a total
/// order over the encoded form.
pub trait KeyCodec: Sized {
    /// Encode `key` into `out` using the order-preserving representation.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Compare two encoded keys.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering;

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Value types storable in a table. Values of one key are kept sorted by
/// their encoded order, which makes duplicate handling deterministic.
pub trait ValCodec: Sized {
    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Compare two encoded values.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering;

    /// Decode a value from `bytes`.
    fn decode_val(bytes: &[u8]) -> Result<Self>;
}

impl KeyCodec for u64 {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| DirError::Serialization("u64 key must be eight bytes".into()))?;
        Ok(u64::from_be_bytes(arr))
    }
}

impl ValCodec for u64 {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_val(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| DirError::Serialization("u64 value must be eight bytes".into()))?;
        Ok(u64::from_be_bytes(arr))
    }
}

impl KeyCodec for String {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key.as_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DirError::Serialization("string key holds invalid UTF-8".into()))
    }
}

impl ValCodec for String {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_val(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DirError::Serialization("string value holds invalid UTF-8".into()))
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_val(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}
