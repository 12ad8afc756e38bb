//! Byte codec for entries stored in the master table.

use std::convert::TryInto;

use crate::error::{DirError, Result};
use crate::model::{AttrValue, Attribute, Entry};

const TAG_TEXT: u8 = 0x01;
const TAG_BINARY: u8 = 0x02;

/// Serialize an entry into its master-table blob.
pub fn serialize_entry(entry: &Entry) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let attr_count: u32 = entry
        .attributes()
        .len()
        .try_into()
        .map_err(|_| DirError::Serialization("too many attributes to serialize".into()))?;
    buf.extend_from_slice(&attr_count.to_le_bytes());

    for attr in entry.attributes() {
        if attr.id.is_empty() {
            return Err(DirError::Serialization(
                "attribute ids must be non-empty".into(),
            ));
        }
        if attr.values.is_empty() {
            return Err(DirError::Serialization(format!(
                "attribute {} has no values",
                attr.id
            )));
        }
        let id_bytes = attr.id.as_bytes();
        let id_len: u16 = id_bytes
            .len()
            .try_into()
            .map_err(|_| DirError::Serialization("attribute id exceeds u16::MAX".into()))?;
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(id_bytes);

        let value_count: u32 = attr
            .values
            .len()
            .try_into()
            .map_err(|_| DirError::Serialization("too many values to serialize".into()))?;
        buf.extend_from_slice(&value_count.to_le_bytes());
        for value in &attr.values {
            write_value(&mut buf, value)?;
        }
    }
    Ok(buf)
}

/// Decode a master-table blob back into an entry.
pub fn deserialize_entry(data: &[u8]) -> Result<Entry> {
    let mut cursor = 0usize;
    let attr_count = read_u32(data, &mut cursor)?;
    let mut entry = Entry::new();
    for _ in 0..attr_count {
        let id_len = read_u16(data, &mut cursor)? as usize;
        let id = read_str(data, &mut cursor, id_len)?;
        let value_count = read_u32(data, &mut cursor)?;
        if value_count == 0 {
            return Err(DirError::Corruption(format!(
                "attribute {id} decoded with no values"
            )));
        }
        let mut values = Vec::with_capacity(value_count as usize);
        for _ in 0..value_count {
            values.push(read_value(data, &mut cursor)?);
        }
        entry.put(Attribute::new(id, values));
    }
    if cursor != data.len() {
        return Err(DirError::Corruption(
            "trailing bytes after entry payload".into(),
        ));
    }
    Ok(entry)
}

fn write_value(buf: &mut Vec<u8>, value: &AttrValue) -> Result<()> {
    match value {
        AttrValue::Text(text) => {
            buf.push(TAG_TEXT);
            let len: u32 = text
                .len()
                .try_into()
                .map_err(|_| DirError::Serialization("value length exceeds u32::MAX".into()))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(text.as_bytes());
        }
        AttrValue::Binary(bytes) => {
            buf.push(TAG_BINARY);
            let len: u32 = bytes
                .len()
                .try_into()
                .map_err(|_| DirError::Serialization("value length exceeds u32::MAX".into()))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(bytes);
        }
    }
    Ok(())
}

fn read_value(data: &[u8], cursor: &mut usize) -> Result<AttrValue> {
    let tag = *data
        .get(*cursor)
        .ok_or_else(|| DirError::Corruption("value tag truncated".into()))?;
    *cursor += 1;
    let len = read_u32(data, cursor)? as usize;
    let slice = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| DirError::Corruption("value bytes truncated".into()))?;
    *cursor += len;
    match tag {
        TAG_TEXT => Ok(AttrValue::Text(String::from_utf8(slice.to_vec()).map_err(
            |_| DirError::Corruption("text value holds invalid UTF-8".into()),
        )?)),
        TAG_BINARY => Ok(AttrValue::Binary(slice.to_vec())),
        other => Err(DirError::Corruption(format!(
            "unknown value tag: 0x{other:02X}"
        ))),
    }
}

fn read_u16(data: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = data
        .get(*cursor..*cursor + 2)
        .ok_or_else(|| DirError::Corruption("entry payload truncated".into()))?;
    *cursor += 2;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = data
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| DirError::Corruption("entry payload truncated".into()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_str(data: &[u8], cursor: &mut usize, len: usize) -> Result<String> {
    let slice = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| DirError::Corruption("entry payload truncated".into()))?;
    *cursor += len;
    String::from_utf8(slice.to_vec())
        .map_err(|_| DirError::Corruption("attribute id holds invalid UTF-8".into()))
}
