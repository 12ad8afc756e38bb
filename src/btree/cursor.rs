//! Streaming cursor over a table's leaf chain.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::btree::node::{decode_spill, load_node, DupValues, LeafCell, TreeNode, NO_NODE};
use crate::btree::table::{find_leaf, TableState};
use crate::btree::{KeyCodec, ValCodec};
use crate::error::{DirError, Result};
use crate::storage::{RecordId, RecordManager};

/// Forward/backward cursor over `(key, value)` pairs.
///
/// The cursor materializes one leaf at a time and sits between pairs:
/// [`TableCursor::next`] returns the pair after the position,
/// [`TableCursor::previous`] the pair before it. Any mutation of the table
/// invalidates the cursor; subsequent calls fail with
/// [`DirError::CursorInvalidated`].
pub struct TableCursor<K: KeyCodec, V: ValCodec> {
    recman: Arc<Mutex<RecordManager>>,
    state: Arc<Mutex<TableState>>,
    stamp_ref: Arc<AtomicU64>,
    stamp: u64,
    prev: RecordId,
    next: RecordId,
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    idx: usize,
    _marker: PhantomData<fn(K, V) -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> TableCursor<K, V> {
    pub(crate) fn new(
        recman: Arc<Mutex<RecordManager>>,
        state: Arc<Mutex<TableState>>,
        stamp_ref: Arc<AtomicU64>,
    ) -> Result<Self> {
        let stamp = stamp_ref.load(AtomicOrdering::SeqCst);
        let mut cursor = Self {
            recman,
            state,
            stamp_ref,
            stamp,
            prev: NO_NODE,
            next: NO_NODE,
            pairs: Vec::new(),
            idx: 0,
            _marker: PhantomData,
        };
        cursor.position_at_first()?;
        Ok(cursor)
    }

    fn position_at_first(&mut self) -> Result<()> {
        let root = self.state.lock().root;
        let mut rm = self.recman.lock();
        let mut recid = root;
        loop {
            match load_node(&mut rm, recid)? {
                TreeNode::Internal { children, .. } => {
                    recid = children[0];
                }
                TreeNode::Leaf { cells, prev, next } => {
                    self.pairs = materialize(&mut rm, &cells)?;
                    self.prev = prev;
                    self.next = next;
                    self.idx = 0;
                    return Ok(());
                }
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.stamp_ref.load(AtomicOrdering::SeqCst) != self.stamp {
            return Err(DirError::CursorInvalidated);
        }
        Ok(())
    }

    /// Position the cursor so that [`TableCursor::next`] returns the first
    /// pair with key greater than or equal to `key`.
    pub fn seek(&mut self, key: &K) -> Result<()> {
        self.check()?;
        let mut key_b = Vec::new();
        K::encode_key(key, &mut key_b);
        let root = self.state.lock().root;
        let mut rm = self.recman.lock();
        let (_, cells, prev, next) = find_leaf::<K>(&mut rm, root, &key_b)?;
        self.pairs = materialize(&mut rm, &cells)?;
        self.prev = prev;
        self.next = next;
        self.idx = self
            .pairs
            .partition_point(|(k, _)| K::compare_encoded(k, &key_b) == std::cmp::Ordering::Less);
        Ok(())
    }

    /// Advance and return the next pair, or `None` past the last.
    pub fn next(&mut self) -> Result<Option<(K, V)>> {
        self.check()?;
        loop {
            if self.idx < self.pairs.len() {
                let (key_b, val_b) = &self.pairs[self.idx];
                let pair = (K::decode_key(key_b)?, V::decode_val(val_b)?);
                self.idx += 1;
                return Ok(Some(pair));
            }
            if self.next == NO_NODE {
                return Ok(None);
            }
            let mut rm = self.recman.lock();
            let leaf = self.next;
            match load_node(&mut rm, leaf)? {
                TreeNode::Leaf { cells, prev, next } => {
                    self.pairs = materialize(&mut rm, &cells)?;
                    self.prev = prev;
                    self.next = next;
                    self.idx = 0;
                }
                TreeNode::Internal { .. } => {
                    return Err(DirError::Corruption(
                        "leaf chain points at an internal node".into(),
                    ));
                }
            }
        }
    }

    /// Step back and return the previous pair, or `None` before the first.
    pub fn previous(&mut self) -> Result<Option<(K, V)>> {
        self.check()?;
        loop {
            if self.idx > 0 {
                self.idx -= 1;
                let (key_b, val_b) = &self.pairs[self.idx];
                return Ok(Some((K::decode_key(key_b)?, V::decode_val(val_b)?)));
            }
            if self.prev == NO_NODE {
                return Ok(None);
            }
            let mut rm = self.recman.lock();
            let leaf = self.prev;
            match load_node(&mut rm, leaf)? {
                TreeNode::Leaf { cells, prev, next } => {
                    self.pairs = materialize(&mut rm, &cells)?;
                    self.prev = prev;
                    self.next = next;
                    self.idx = self.pairs.len();
                }
                TreeNode::Internal { .. } => {
                    return Err(DirError::Corruption(
                        "leaf chain points at an internal node".into(),
                    ));
                }
            }
        }
    }

    /// Release the cursor. Dropping it has the same effect.
    pub fn close(self) {}
}

fn materialize(rm: &mut RecordManager, cells: &[LeafCell]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut pairs = Vec::new();
    for cell in cells {
        match &cell.values {
            DupValues::Inline(values) => {
                for value in values {
                    pairs.push((cell.key.clone(), value.clone()));
                }
            }
            DupValues::Spilled { recid, .. } => {
                for value in decode_spill(&rm.fetch(*recid)?)? {
                    pairs.push((cell.key.clone(), value));
                }
            }
        }
    }
    Ok(pairs)
}
