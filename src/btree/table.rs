//! The B+tree table.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::btree::cursor::TableCursor;
use crate::btree::node::{
    create_node, decode_spill, encode_spill, load_node, store_node, DupValues, LeafCell, TreeNode,
    NO_NODE,
};
use crate::btree::{KeyCodec, ValCodec};
use crate::error::{DirError, Result};
use crate::storage::{RecordId, RecordManager};

/// Default threshold at which a key's duplicate set leaves the leaf.
pub const DEFAULT_DUPLICATE_LIMIT: usize = 512;

/// Split fanout: a node holding more than this many cells or keys splits.
const MAX_NODE_ENTRIES: usize = 16;

pub(crate) struct TableState {
    pub root: RecordId,
    pub count: u64,
    meta: RecordId,
}

/// An ordered multimap persisted as a B+tree of records.
///
/// All methods take `&self`; the table state and backing record manager are
/// internally locked so concurrent readers can share a handle. Mutations
/// bump a stamp that invalidates open cursors.
pub struct Table<K: KeyCodec, V: ValCodec> {
    name: String,
    recman: Arc<Mutex<RecordManager>>,
    state: Arc<Mutex<TableState>>,
    stamp: Arc<AtomicU64>,
    dup_limit: usize,
    _marker: PhantomData<fn(K, V) -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> Table<K, V> {
    /// Open or create the named table inside `recman`.
    pub fn open(
        name: &str,
        recman: Arc<Mutex<RecordManager>>,
        dup_limit: usize,
    ) -> Result<Self> {
        if dup_limit == 0 {
            return Err(DirError::InvalidArgument(
                "duplicate limit must be greater than zero".into(),
            ));
        }
        let root_name = format!("table:{name}");
        let state = {
            let mut rm = recman.lock();
            match rm.root(&root_name) {
                Some(meta) => {
                    let bytes = rm.fetch(meta)?;
                    let (root, count) = decode_meta(&bytes)?;
                    TableState { root, count, meta }
                }
                None => {
                    let root = create_node(&mut rm, &TreeNode::empty_leaf())?;
                    let meta = rm.insert(&encode_meta(root, 0))?;
                    rm.set_root(&root_name, Some(meta))?;
                    TableState {
                        root,
                        count: 0,
                        meta,
                    }
                }
            }
        };
        Ok(Self {
            name: name.to_string(),
            recman,
            state: Arc::new(Mutex::new(state)),
            stamp: Arc::new(AtomicU64::new(0)),
            dup_limit,
            _marker: PhantomData,
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of `(key, value)` pairs.
    pub fn len(&self) -> u64 {
        self.state.lock().count
    }

    /// True when the table holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a pair. Returns false when the exact pair already exists.
    pub fn put(&self, key: &K, value: &V) -> Result<bool> {
        let key_b = encode_key::<K>(key);
        let val_b = encode_val::<V>(value);
        let mut state = self.state.lock();
        let mut rm = self.recman.lock();
        let inserted = self.insert_locked(&mut rm, &mut state, &key_b, &val_b)?;
        if inserted {
            self.bump();
        }
        Ok(inserted)
    }

    /// Upsert a single value under `key`, replacing any existing values.
    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        let key_b = encode_key::<K>(key);
        let val_b = encode_val::<V>(value);
        let mut state = self.state.lock();
        let mut rm = self.recman.lock();
        self.remove_key_locked(&mut rm, &mut state, &key_b)?;
        self.insert_locked(&mut rm, &mut state, &key_b, &val_b)?;
        self.bump();
        Ok(())
    }

    /// Remove one pair. Returns false when the pair was absent.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let key_b = encode_key::<K>(key);
        let val_b = encode_val::<V>(value);
        let mut state = self.state.lock();
        let mut rm = self.recman.lock();
        let removed = self.remove_locked(&mut rm, &mut state, &key_b, Some(&val_b))?;
        if removed > 0 {
            self.bump();
        }
        Ok(removed > 0)
    }

    /// Remove every pair under `key`. Returns how many were removed.
    pub fn remove_key(&self, key: &K) -> Result<u64> {
        let key_b = encode_key::<K>(key);
        let mut state = self.state.lock();
        let mut rm = self.recman.lock();
        let removed = self.remove_key_locked(&mut rm, &mut state, &key_b)?;
        if removed > 0 {
            self.bump();
        }
        Ok(removed)
    }

    /// The least value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key_b = encode_key::<K>(key);
        let state = self.state.lock();
        let mut rm = self.recman.lock();
        match find_cell::<K>(&mut rm, state.root, &key_b)? {
            None => Ok(None),
            Some(cell) => {
                let first = match &cell.values {
                    DupValues::Inline(values) => values.first().cloned(),
                    DupValues::Spilled { recid, .. } => {
                        decode_spill(&rm.fetch(*recid)?)?.into_iter().next()
                    }
                };
                first.map(|bytes| V::decode_val(&bytes)).transpose()
            }
        }
    }

    /// Every value stored under `key`, in value order.
    pub fn values(&self, key: &K) -> Result<Vec<V>> {
        let key_b = encode_key::<K>(key);
        let state = self.state.lock();
        let mut rm = self.recman.lock();
        let Some(cell) = find_cell::<K>(&mut rm, state.root, &key_b)? else {
            return Ok(Vec::new());
        };
        let raw = match cell.values {
            DupValues::Inline(values) => values,
            DupValues::Spilled { recid, .. } => decode_spill(&rm.fetch(recid)?)?,
        };
        raw.iter().map(|bytes| V::decode_val(bytes)).collect()
    }

    /// True when the exact pair is present.
    pub fn has(&self, key: &K, value: &V) -> Result<bool> {
        let key_b = encode_key::<K>(key);
        let val_b = encode_val::<V>(value);
        let state = self.state.lock();
        let mut rm = self.recman.lock();
        let Some(cell) = find_cell::<K>(&mut rm, state.root, &key_b)? else {
            return Ok(false);
        };
        let found = match cell.values {
            DupValues::Inline(values) => values
                .binary_search_by(|v| V::compare_encoded(v, &val_b))
                .is_ok(),
            DupValues::Spilled { recid, .. } => decode_spill(&rm.fetch(recid)?)?
                .binary_search_by(|v| V::compare_encoded(v, &val_b))
                .is_ok(),
        };
        Ok(found)
    }

    /// True when `key` has at least one value.
    pub fn has_key(&self, key: &K) -> Result<bool> {
        Ok(self.count_key(key)? > 0)
    }

    /// Number of values stored under `key`.
    pub fn count_key(&self, key: &K) -> Result<u64> {
        let key_b = encode_key::<K>(key);
        let state = self.state.lock();
        let mut rm = self.recman.lock();
        Ok(find_cell::<K>(&mut rm, state.root, &key_b)?
            .map(|cell| cell.values.count())
            .unwrap_or(0))
    }

    /// Open a cursor positioned before the first pair.
    pub fn cursor(&self) -> Result<TableCursor<K, V>> {
        TableCursor::new(
            Arc::clone(&self.recman),
            Arc::clone(&self.state),
            Arc::clone(&self.stamp),
        )
    }

    fn bump(&self) {
        self.stamp.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn write_meta(&self, rm: &mut RecordManager, state: &TableState) -> Result<()> {
        rm.update(state.meta, &encode_meta(state.root, state.count))
    }

    fn insert_locked(
        &self,
        rm: &mut RecordManager,
        state: &mut TableState,
        key: &[u8],
        val: &[u8],
    ) -> Result<bool> {
        let outcome = insert_rec::<K, V>(rm, state.root, key, val, self.dup_limit)?;
        if let Some((sep, right)) = outcome.split {
            let new_root = create_node(
                rm,
                &TreeNode::Internal {
                    keys: vec![sep],
                    children: vec![state.root, right],
                },
            )?;
            state.root = new_root;
        }
        if outcome.inserted {
            state.count += 1;
            self.write_meta(rm, state)?;
        }
        Ok(outcome.inserted)
    }

    fn remove_locked(
        &self,
        rm: &mut RecordManager,
        state: &mut TableState,
        key: &[u8],
        val: Option<&[u8]>,
    ) -> Result<u64> {
        let outcome = remove_rec::<K, V>(rm, state.root, key, val, self.dup_limit)?;
        if outcome.now_empty {
            let root_node = load_node(rm, state.root)?;
            if matches!(root_node, TreeNode::Internal { .. }) {
                rm.delete(state.root)?;
                state.root = create_node(rm, &TreeNode::empty_leaf())?;
            }
        }
        // Collapse single-child internal roots left behind by deletions.
        loop {
            let root_node = load_node(rm, state.root)?;
            match root_node {
                TreeNode::Internal { ref children, .. } if children.len() == 1 => {
                    let child = children[0];
                    rm.delete(state.root)?;
                    state.root = child;
                }
                _ => break,
            }
        }
        if outcome.removed > 0 {
            state.count = state.count.saturating_sub(outcome.removed);
            self.write_meta(rm, state)?;
        }
        Ok(outcome.removed)
    }

    fn remove_key_locked(
        &self,
        rm: &mut RecordManager,
        state: &mut TableState,
        key: &[u8],
    ) -> Result<u64> {
        self.remove_locked(rm, state, key, None)
    }
}

fn encode_key<K: KeyCodec>(key: &K) -> Vec<u8> {
    let mut out = Vec::new();
    K::encode_key(key, &mut out);
    out
}

fn encode_val<V: ValCodec>(value: &V) -> Vec<u8> {
    let mut out = Vec::new();
    V::encode_val(value, &mut out);
    out
}

fn encode_meta(root: RecordId, count: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&root.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}

fn decode_meta(bytes: &[u8]) -> Result<(RecordId, u64)> {
    if bytes.len() != 16 {
        return Err(DirError::Corruption("table metadata truncated".into()));
    }
    let root = u64::from_le_bytes(bytes[..8].try_into().expect("slice has eight bytes"));
    let count = u64::from_le_bytes(bytes[8..].try_into().expect("slice has eight bytes"));
    Ok((root, count))
}

/// Index of the child subtree that may hold `key`.
fn child_index<K: KeyCodec>(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|sep| K::compare_encoded(sep, key) != std::cmp::Ordering::Greater)
}

pub(crate) fn find_leaf<K: KeyCodec>(
    rm: &mut RecordManager,
    mut recid: RecordId,
    key: &[u8],
) -> Result<(RecordId, Vec<LeafCell>, RecordId, RecordId)> {
    loop {
        match load_node(rm, recid)? {
            TreeNode::Internal { keys, children } => {
                recid = children[child_index::<K>(&keys, key)];
            }
            TreeNode::Leaf { cells, prev, next } => return Ok((recid, cells, prev, next)),
        }
    }
}

fn find_cell<K: KeyCodec>(
    rm: &mut RecordManager,
    root: RecordId,
    key: &[u8],
) -> Result<Option<LeafCell>> {
    let (_, cells, _, _) = find_leaf::<K>(rm, root, key)?;
    match cells.binary_search_by(|cell| K::compare_encoded(&cell.key, key)) {
        Ok(i) => Ok(Some(cells.into_iter().nth(i).expect("index in range"))),
        Err(_) => Ok(None),
    }
}

struct InsertOutcome {
    inserted: bool,
    split: Option<(Vec<u8>, RecordId)>,
}

fn insert_rec<K: KeyCodec, V: ValCodec>(
    rm: &mut RecordManager,
    recid: RecordId,
    key: &[u8],
    val: &[u8],
    dup_limit: usize,
) -> Result<InsertOutcome> {
    match load_node(rm, recid)? {
        TreeNode::Internal {
            mut keys,
            mut children,
        } => {
            let idx = child_index::<K>(&keys, key);
            let child = children[idx];
            let outcome = insert_rec::<K, V>(rm, child, key, val, dup_limit)?;
            let Some((sep, right)) = outcome.split else {
                return Ok(InsertOutcome {
                    inserted: outcome.inserted,
                    split: None,
                });
            };
            keys.insert(idx, sep);
            children.insert(idx + 1, right);
            if keys.len() <= MAX_NODE_ENTRIES {
                store_node(rm, recid, &TreeNode::Internal { keys, children })?;
                return Ok(InsertOutcome {
                    inserted: outcome.inserted,
                    split: None,
                });
            }
            let mid = keys.len() / 2;
            let mut right_keys = keys.split_off(mid);
            let sep_up = right_keys.remove(0);
            let right_children = children.split_off(mid + 1);
            let right_recid = create_node(
                rm,
                &TreeNode::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            )?;
            store_node(rm, recid, &TreeNode::Internal { keys, children })?;
            Ok(InsertOutcome {
                inserted: outcome.inserted,
                split: Some((sep_up, right_recid)),
            })
        }
        TreeNode::Leaf {
            mut cells,
            prev,
            next,
        } => {
            match cells.binary_search_by(|cell| K::compare_encoded(&cell.key, key)) {
                Ok(i) => {
                    let inserted = dup_insert::<V>(rm, &mut cells[i].values, val, dup_limit)?;
                    if inserted {
                        store_node(rm, recid, &TreeNode::Leaf { cells, prev, next })?;
                    }
                    Ok(InsertOutcome {
                        inserted,
                        split: None,
                    })
                }
                Err(i) => {
                    cells.insert(
                        i,
                        LeafCell {
                            key: key.to_vec(),
                            values: DupValues::Inline(vec![val.to_vec()]),
                        },
                    );
                    if cells.len() <= MAX_NODE_ENTRIES {
                        store_node(rm, recid, &TreeNode::Leaf { cells, prev, next })?;
                        return Ok(InsertOutcome {
                            inserted: true,
                            split: None,
                        });
                    }
                    let mid = cells.len() / 2;
                    let right_cells = cells.split_off(mid);
                    let sep = right_cells[0].key.clone();
                    let right_recid = create_node(
                        rm,
                        &TreeNode::Leaf {
                            cells: right_cells,
                            prev: recid,
                            next,
                        },
                    )?;
                    if next != NO_NODE {
                        relink_prev(rm, next, right_recid)?;
                    }
                    store_node(
                        rm,
                        recid,
                        &TreeNode::Leaf {
                            cells,
                            prev,
                            next: right_recid,
                        },
                    )?;
                    Ok(InsertOutcome {
                        inserted: true,
                        split: Some((sep, right_recid)),
                    })
                }
            }
        }
    }
}

fn dup_insert<V: ValCodec>(
    rm: &mut RecordManager,
    values: &mut DupValues,
    val: &[u8],
    dup_limit: usize,
) -> Result<bool> {
    match values {
        DupValues::Inline(vals) => {
            match vals.binary_search_by(|v| V::compare_encoded(v, val)) {
                Ok(_) => Ok(false),
                Err(i) => {
                    vals.insert(i, val.to_vec());
                    if vals.len() > dup_limit {
                        let count = vals.len() as u64;
                        let spill = encode_spill(vals);
                        let recid = rm.insert(&spill)?;
                        *values = DupValues::Spilled { recid, count };
                    }
                    Ok(true)
                }
            }
        }
        DupValues::Spilled { recid, count } => {
            let mut vals = decode_spill(&rm.fetch(*recid)?)?;
            match vals.binary_search_by(|v| V::compare_encoded(v, val)) {
                Ok(_) => Ok(false),
                Err(i) => {
                    vals.insert(i, val.to_vec());
                    rm.update(*recid, &encode_spill(&vals))?;
                    *count += 1;
                    Ok(true)
                }
            }
        }
    }
}

struct RemoveOutcome {
    removed: u64,
    now_empty: bool,
}

fn remove_rec<K: KeyCodec, V: ValCodec>(
    rm: &mut RecordManager,
    recid: RecordId,
    key: &[u8],
    val: Option<&[u8]>,
    dup_limit: usize,
) -> Result<RemoveOutcome> {
    match load_node(rm, recid)? {
        TreeNode::Internal {
            mut keys,
            mut children,
        } => {
            let idx = child_index::<K>(&keys, key);
            let child = children[idx];
            let outcome = remove_rec::<K, V>(rm, child, key, val, dup_limit)?;
            if !outcome.now_empty {
                return Ok(RemoveOutcome {
                    removed: outcome.removed,
                    now_empty: false,
                });
            }
            rm.delete(child)?;
            children.remove(idx);
            if !keys.is_empty() {
                keys.remove(idx.saturating_sub(1));
            }
            let now_empty = children.is_empty();
            if !now_empty {
                store_node(rm, recid, &TreeNode::Internal { keys, children })?;
            }
            Ok(RemoveOutcome {
                removed: outcome.removed,
                now_empty,
            })
        }
        TreeNode::Leaf {
            mut cells,
            prev,
            next,
        } => {
            let Ok(i) = cells.binary_search_by(|cell| K::compare_encoded(&cell.key, key)) else {
                return Ok(RemoveOutcome {
                    removed: 0,
                    now_empty: false,
                });
            };
            let removed = match val {
                Some(val) => {
                    if dup_remove::<V>(rm, &mut cells[i].values, val, dup_limit)? {
                        1
                    } else {
                        0
                    }
                }
                None => {
                    let count = cells[i].values.count();
                    if let DupValues::Spilled { recid, .. } = cells[i].values {
                        rm.delete(recid)?;
                    }
                    // The whole cell goes below.
                    cells[i].values = DupValues::Inline(Vec::new());
                    count
                }
            };
            if removed == 0 {
                return Ok(RemoveOutcome {
                    removed: 0,
                    now_empty: false,
                });
            }
            if cells[i].values.count() == 0 {
                cells.remove(i);
            }
            if cells.is_empty() {
                unlink_leaf(rm, prev, next)?;
                store_node(
                    rm,
                    recid,
                    &TreeNode::Leaf {
                        cells,
                        prev: NO_NODE,
                        next: NO_NODE,
                    },
                )?;
                return Ok(RemoveOutcome {
                    removed,
                    now_empty: true,
                });
            }
            store_node(rm, recid, &TreeNode::Leaf { cells, prev, next })?;
            Ok(RemoveOutcome {
                removed,
                now_empty: false,
            })
        }
    }
}

fn dup_remove<V: ValCodec>(
    rm: &mut RecordManager,
    values: &mut DupValues,
    val: &[u8],
    dup_limit: usize,
) -> Result<bool> {
    match values {
        DupValues::Inline(vals) => match vals.binary_search_by(|v| V::compare_encoded(v, val)) {
            Ok(i) => {
                vals.remove(i);
                Ok(true)
            }
            Err(_) => Ok(false),
        },
        DupValues::Spilled { recid, count } => {
            let mut vals = decode_spill(&rm.fetch(*recid)?)?;
            let Ok(i) = vals.binary_search_by(|v| V::compare_encoded(v, val)) else {
                return Ok(false);
            };
            vals.remove(i);
            if vals.len() <= dup_limit {
                let spill_recid = *recid;
                rm.delete(spill_recid)?;
                *values = DupValues::Inline(vals);
            } else {
                rm.update(*recid, &encode_spill(&vals))?;
                *count -= 1;
            }
            Ok(true)
        }
    }
}

fn relink_prev(rm: &mut RecordManager, leaf: RecordId, new_prev: RecordId) -> Result<()> {
    let mut node = load_node(rm, leaf)?;
    match &mut node {
        TreeNode::Leaf { prev, .. } => *prev = new_prev,
        TreeNode::Internal { .. } => {
            return Err(DirError::Corruption(
                "leaf sibling link points at an internal node".into(),
            ));
        }
    }
    store_node(rm, leaf, &node)
}

fn relink_next(rm: &mut RecordManager, leaf: RecordId, new_next: RecordId) -> Result<()> {
    let mut node = load_node(rm, leaf)?;
    match &mut node {
        TreeNode::Leaf { next, .. } => *next = new_next,
        TreeNode::Internal { .. } => {
            return Err(DirError::Corruption(
                "leaf sibling link points at an internal node".into(),
            ));
        }
    }
    store_node(rm, leaf, &node)
}

fn unlink_leaf(rm: &mut RecordManager, prev: RecordId, next: RecordId) -> Result<()> {
    if prev != NO_NODE {
        relink_next(rm, prev, next)?;
    }
    if next != NO_NODE {
        relink_prev(rm, next, prev)?;
    }
    Ok(())
}
