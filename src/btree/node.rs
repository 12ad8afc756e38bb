//! On-record encoding of B+tree nodes.
//!
//! Every node is one record in the backing record manager. Leaf cells carry
//! their duplicate set either inline (sorted array) or as a pointer to a
//! spilled sorted-set record once the set outgrows the table's duplicate
//! limit.

use crate::error::{DirError, Result};
use crate::storage::{RecordId, RecordManager};

const TAG_INTERNAL: u8 = 0x01;
const TAG_LEAF: u8 = 0x02;
const DUP_INLINE: u8 = 0x00;
const DUP_SPILLED: u8 = 0x01;

/// Recid value standing for "no sibling".
pub(crate) const NO_NODE: RecordId = 0;

/// Duplicate-set representation of one leaf cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DupValues {
    /// Sorted encoded values, at most the table's duplicate limit.
    Inline(Vec<Vec<u8>>),
    /// Sorted set spilled into its own record.
    Spilled {
        /// Record holding the encoded value set.
        recid: RecordId,
        /// Number of values in the set.
        count: u64,
    },
}

impl DupValues {
    pub(crate) fn count(&self) -> u64 {
        match self {
            DupValues::Inline(values) => values.len() as u64,
            DupValues::Spilled { count, .. } => *count,
        }
    }
}

/// One leaf cell: an encoded key and its duplicate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafCell {
    pub key: Vec<u8>,
    pub values: DupValues,
}

/// A decoded tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TreeNode {
    /// Routing node: `children.len() == keys.len() + 1`; subtree
    /// `children[i]` holds keys strictly below `keys[i]`, the last child
    /// holds the rest.
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<RecordId>,
    },
    /// Leaf node in the doubly linked leaf chain.
    Leaf {
        cells: Vec<LeafCell>,
        prev: RecordId,
        next: RecordId,
    },
}

impl TreeNode {
    pub(crate) fn empty_leaf() -> Self {
        TreeNode::Leaf {
            cells: Vec::new(),
            prev: NO_NODE,
            next: NO_NODE,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TreeNode::Internal { keys, children } => {
                out.push(TAG_INTERNAL);
                out.extend_from_slice(&(keys.len() as u32).to_le_bytes());
                for key in keys {
                    write_bytes(&mut out, key);
                }
                for child in children {
                    out.extend_from_slice(&child.to_le_bytes());
                }
            }
            TreeNode::Leaf { cells, prev, next } => {
                out.push(TAG_LEAF);
                out.extend_from_slice(&prev.to_le_bytes());
                out.extend_from_slice(&next.to_le_bytes());
                out.extend_from_slice(&(cells.len() as u32).to_le_bytes());
                for cell in cells {
                    write_bytes(&mut out, &cell.key);
                    match &cell.values {
                        DupValues::Inline(values) => {
                            out.push(DUP_INLINE);
                            out.extend_from_slice(&(values.len() as u32).to_le_bytes());
                            for value in values {
                                write_bytes(&mut out, value);
                            }
                        }
                        DupValues::Spilled { recid, count } => {
                            out.push(DUP_SPILLED);
                            out.extend_from_slice(&recid.to_le_bytes());
                            out.extend_from_slice(&count.to_le_bytes());
                        }
                    }
                }
            }
        }
        out
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let tag = read_u8(bytes, &mut cursor)?;
        match tag {
            TAG_INTERNAL => {
                let key_count = read_u32(bytes, &mut cursor)? as usize;
                let mut keys = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    keys.push(read_bytes(bytes, &mut cursor)?);
                }
                let mut children = Vec::with_capacity(key_count + 1);
                for _ in 0..key_count + 1 {
                    children.push(read_u64(bytes, &mut cursor)?);
                }
                Ok(TreeNode::Internal { keys, children })
            }
            TAG_LEAF => {
                let prev = read_u64(bytes, &mut cursor)?;
                let next = read_u64(bytes, &mut cursor)?;
                let cell_count = read_u32(bytes, &mut cursor)? as usize;
                let mut cells = Vec::with_capacity(cell_count);
                for _ in 0..cell_count {
                    let key = read_bytes(bytes, &mut cursor)?;
                    let dup_tag = read_u8(bytes, &mut cursor)?;
                    let values = match dup_tag {
                        DUP_INLINE => {
                            let count = read_u32(bytes, &mut cursor)? as usize;
                            let mut values = Vec::with_capacity(count);
                            for _ in 0..count {
                                values.push(read_bytes(bytes, &mut cursor)?);
                            }
                            DupValues::Inline(values)
                        }
                        DUP_SPILLED => {
                            let recid = read_u64(bytes, &mut cursor)?;
                            let count = read_u64(bytes, &mut cursor)?;
                            DupValues::Spilled { recid, count }
                        }
                        other => {
                            return Err(DirError::Corruption(format!(
                                "unknown duplicate representation tag: 0x{other:02X}"
                            )));
                        }
                    };
                    cells.push(LeafCell { key, values });
                }
                Ok(TreeNode::Leaf { cells, prev, next })
            }
            other => Err(DirError::Corruption(format!(
                "unknown tree node tag: 0x{other:02X}"
            ))),
        }
    }
}

/// Load and decode the node stored under `recid`.
pub(crate) fn load_node(rm: &mut RecordManager, recid: RecordId) -> Result<TreeNode> {
    TreeNode::decode(&rm.fetch(recid)?)
}

/// Re-encode a node in place.
pub(crate) fn store_node(rm: &mut RecordManager, recid: RecordId, node: &TreeNode) -> Result<()> {
    rm.update(recid, &node.encode())
}

/// Insert a fresh node record.
pub(crate) fn create_node(rm: &mut RecordManager, node: &TreeNode) -> Result<RecordId> {
    rm.insert(&node.encode())
}

/// Encode a spilled duplicate set.
pub(crate) fn encode_spill(values: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        write_bytes(&mut out, value);
    }
    out
}

/// Decode a spilled duplicate set.
pub(crate) fn decode_spill(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_bytes(bytes, &mut cursor)?);
    }
    Ok(values)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    let byte = *bytes
        .get(*cursor)
        .ok_or_else(|| DirError::Corruption("tree node truncated".into()))?;
    *cursor += 1;
    Ok(byte)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| DirError::Corruption("tree node truncated".into()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let slice = bytes
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| DirError::Corruption("tree node truncated".into()))?;
    *cursor += 8;
    let arr: [u8; 8] = slice
        .try_into()
        .map_err(|_| DirError::Corruption("tree node truncated".into()))?;
    Ok(u64::from_le_bytes(arr))
}

fn read_bytes(bytes: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(bytes, cursor)? as usize;
    let slice = bytes
        .get(*cursor..*cursor + len)
        .ok_or_else(|| DirError::Corruption("tree node truncated".into()))?;
    *cursor += len;
    Ok(slice.to_vec())
}
