//! The record manager: a persistent `RecordId -> blob` store.
//!
//! Records live in slotted pages; blobs too large for one slot spill into a
//! chain of overflow pages behind a fixed-size stub. The recid directory is
//! rebuilt by a full page scan on open, so the file carries no translation
//! tables. Durability comes from explicit [`RecordManager::commit`]; there
//! is no transaction log.
//!
//! Besides raw records, the file keeps one reserved directory record
//! holding named roots (table root pointers) and a string property sidecar
//! (counters such as the master table's next id).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::{DirError, Result};
use crate::pager::{PageId, Pager, PAGE_PAYLOAD_SIZE};
use crate::storage::page::{PageKind, RecordPage, MAX_SLOT_RECORD, PAGE_HEADER_SIZE};

/// Stable logical identifier of a record.
pub type RecordId = u64;

/// Recid of the reserved roots/properties directory record.
const NAMES_RECORD_ID: RecordId = 1;

/// File magic written into the header page.
const FILE_MAGIC: &[u8; 8] = b"DITRECF1";

/// Slot record overhead: recid (8) + representation flag (1).
const RECORD_PREFIX: usize = 9;
/// Largest payload stored inline in a slot.
const MAX_INLINE_PAYLOAD: usize = MAX_SLOT_RECORD - RECORD_PREFIX;
/// Overflow page header: kind/pad (4) + next page (4) + chunk length (4).
const OVERFLOW_HEADER: usize = 12;
/// Payload bytes per overflow page.
const OVERFLOW_CHUNK: usize = PAGE_PAYLOAD_SIZE - OVERFLOW_HEADER;
/// Minimum leftover space for a page to stay on the candidate list.
const MIN_PAGE_SPACE: usize = 64;

const FLAG_INLINE: u8 = 0;
const FLAG_OVERFLOW: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordPointer {
    page_id: PageId,
    slot: u16,
}

/// Persistent key→blob store over one page file.
pub struct RecordManager {
    pager: Pager,
    directory: FxHashMap<RecordId, RecordPointer>,
    pages_with_space: BTreeSet<PageId>,
    free_pages: Vec<PageId>,
    next_recid: RecordId,
    roots: BTreeMap<String, RecordId>,
    props: BTreeMap<String, String>,
}

impl RecordManager {
    /// Open or create a record file.
    pub fn open(path: &Path, cache_size: usize) -> Result<Self> {
        let pager = Pager::open(path, cache_size)?;
        let mut rm = Self {
            pager,
            directory: FxHashMap::default(),
            pages_with_space: BTreeSet::new(),
            free_pages: Vec::new(),
            next_recid: NAMES_RECORD_ID,
            roots: BTreeMap::new(),
            props: BTreeMap::new(),
        };
        if rm.pager.page_count() == 0 {
            rm.create(path)?;
        } else {
            rm.load(path)?;
        }
        Ok(rm)
    }

    fn create(&mut self, path: &Path) -> Result<()> {
        let header = self.pager.allocate_page()?;
        self.pager.with_page_mut(header, |data| {
            data[0] = PageKind::Header as u8;
            data[1..1 + FILE_MAGIC.len()].copy_from_slice(FILE_MAGIC);
            Ok(())
        })?;
        let blob = encode_names(&self.roots, &self.props);
        let names = self.insert(&blob)?;
        if names != NAMES_RECORD_ID {
            return Err(DirError::Corruption(
                "directory record did not receive the reserved recid".into(),
            ));
        }
        self.commit()?;
        debug!(path = ?path, "record file created");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.pager.with_page(0, |data| {
            if data[0] != PageKind::Header as u8 || &data[1..1 + FILE_MAGIC.len()] != FILE_MAGIC {
                return Err(DirError::Corruption(format!(
                    "not a record file: {}",
                    path.display()
                )));
            }
            Ok(())
        })?;

        let page_count = self.pager.page_count();
        let mut max_recid = NAMES_RECORD_ID;
        for page_index in 1..page_count {
            let page_id = page_index as PageId;
            let kind = {
                let page = self.pager.fetch_page(page_id)?;
                PageKind::from_byte(page.data[0])?
            };
            match kind {
                PageKind::Free => self.free_pages.push(page_id),
                PageKind::Overflow => {}
                PageKind::Header => {
                    return Err(DirError::Corruption(format!(
                        "unexpected header page at {page_id}"
                    )));
                }
                PageKind::Slotted => {
                    let mut found: Vec<(RecordId, u16)> = Vec::new();
                    let (live, space) = {
                        let page = self.pager.fetch_page(page_id)?;
                        let record_page = RecordPage::from_bytes(&mut page.data)?;
                        record_page.for_each_record(|slot, record| {
                            if record.len() < RECORD_PREFIX {
                                return Err(DirError::Corruption(format!(
                                    "record shorter than prefix on page {page_id}"
                                )));
                            }
                            let recid = u64::from_le_bytes(
                                record[..8].try_into().map_err(|_| {
                                    DirError::Corruption("recid bytes truncated".into())
                                })?,
                            );
                            found.push((recid, slot));
                            Ok(())
                        })?;
                        (record_page.live_count(), record_page.free_space())
                    };
                    for (recid, slot) in found {
                        if self
                            .directory
                            .insert(recid, RecordPointer { page_id, slot })
                            .is_some()
                        {
                            return Err(DirError::Corruption(format!(
                                "duplicate recid {recid} found during scan"
                            )));
                        }
                        max_recid = max_recid.max(recid);
                    }
                    if live == 0 {
                        self.free_pages.push(page_id);
                    } else if space >= MIN_PAGE_SPACE {
                        self.pages_with_space.insert(page_id);
                    }
                }
            }
        }
        self.next_recid = max_recid + 1;

        let names = self.fetch(NAMES_RECORD_ID).map_err(|_| {
            DirError::Corruption("record file is missing its directory record".into())
        })?;
        let (roots, props) = decode_names(&names)?;
        self.roots = roots;
        self.props = props;
        debug!(
            path = ?path,
            records = self.directory.len(),
            pages = page_count,
            "record directory rebuilt from page scan"
        );
        Ok(())
    }

    /// Number of live records, the directory record included.
    pub fn record_count(&self) -> usize {
        self.directory.len()
    }

    /// Insert a blob under a fresh recid.
    pub fn insert(&mut self, blob: &[u8]) -> Result<RecordId> {
        let recid = self.next_recid;
        self.next_recid += 1;
        let pointer = self.store_record(recid, blob)?;
        self.directory.insert(recid, pointer);
        Ok(recid)
    }

    /// Fetch a record's blob.
    pub fn fetch(&mut self, recid: RecordId) -> Result<Vec<u8>> {
        let pointer = *self
            .directory
            .get(&recid)
            .ok_or_else(|| DirError::Corruption(format!("record {recid} not found")))?;
        let (flag, body) = self.read_slot(recid, pointer)?;
        match flag {
            FLAG_INLINE => Ok(body),
            FLAG_OVERFLOW => {
                let (head, total_len) = decode_overflow_stub(&body)?;
                self.read_overflow_chain(head, total_len)
            }
            other => Err(DirError::Corruption(format!(
                "record {recid} has unknown representation flag {other}"
            ))),
        }
    }

    /// Replace a record's blob, keeping its recid.
    pub fn update(&mut self, recid: RecordId, blob: &[u8]) -> Result<()> {
        let pointer = *self
            .directory
            .get(&recid)
            .ok_or_else(|| DirError::Corruption(format!("record {recid} not found")))?;
        self.release_storage(recid, pointer)?;
        let pointer = self.store_record(recid, blob)?;
        self.directory.insert(recid, pointer);
        Ok(())
    }

    /// Delete a record and release its storage.
    pub fn delete(&mut self, recid: RecordId) -> Result<()> {
        let pointer = self
            .directory
            .remove(&recid)
            .ok_or_else(|| DirError::Corruption(format!("record {recid} not found")))?;
        self.release_storage(recid, pointer)
    }

    /// Write every dirty page and sync the file.
    pub fn commit(&mut self) -> Result<()> {
        self.pager.flush()
    }

    /// Look up a named root.
    pub fn root(&self, name: &str) -> Option<RecordId> {
        self.roots.get(name).copied()
    }

    /// Bind or clear a named root and persist the directory record.
    pub fn set_root(&mut self, name: &str, recid: Option<RecordId>) -> Result<()> {
        match recid {
            Some(recid) => self.roots.insert(name.to_string(), recid),
            None => self.roots.remove(name),
        };
        self.persist_names()
    }

    /// Look up a sidecar property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Set a sidecar property and persist the directory record.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        self.props.insert(key.to_string(), value.to_string());
        self.persist_names()
    }

    fn persist_names(&mut self) -> Result<()> {
        let blob = encode_names(&self.roots, &self.props);
        self.update(NAMES_RECORD_ID, &blob)
    }

    fn store_record(&mut self, recid: RecordId, blob: &[u8]) -> Result<RecordPointer> {
        if blob.len() <= MAX_INLINE_PAYLOAD {
            let mut record = Vec::with_capacity(RECORD_PREFIX + blob.len());
            record.extend_from_slice(&recid.to_le_bytes());
            record.push(FLAG_INLINE);
            record.extend_from_slice(blob);
            self.place_slot_record(&record)
        } else {
            let head = self.write_overflow_chain(blob)?;
            let mut stub = Vec::with_capacity(RECORD_PREFIX + 12);
            stub.extend_from_slice(&recid.to_le_bytes());
            stub.push(FLAG_OVERFLOW);
            stub.extend_from_slice(&head.to_le_bytes());
            stub.extend_from_slice(&(blob.len() as u64).to_le_bytes());
            self.place_slot_record(&stub)
        }
    }

    fn place_slot_record(&mut self, record: &[u8]) -> Result<RecordPointer> {
        let candidates: Vec<PageId> = self.pages_with_space.iter().copied().collect();
        for page_id in candidates {
            let page = self.pager.fetch_page(page_id)?;
            let mut record_page = RecordPage::from_bytes(&mut page.data)?;
            let mut slot = record_page.append_record(record)?;
            if slot.is_none() {
                record_page.compact()?;
                slot = record_page.append_record(record)?;
            }
            if let Some(slot) = slot {
                let space = record_page.free_space();
                page.dirty = true;
                if space < MIN_PAGE_SPACE {
                    self.pages_with_space.remove(&page_id);
                }
                return Ok(RecordPointer { page_id, slot });
            }
        }

        let page_id = self.take_data_page()?;
        let page = self.pager.fetch_page(page_id)?;
        let mut record_page = RecordPage::from_bytes(&mut page.data)?;
        record_page.initialize();
        let slot = record_page.append_record(record)?.ok_or_else(|| {
            DirError::InvalidArgument("record larger than available page space".into())
        })?;
        let space = record_page.free_space();
        page.dirty = true;
        if space >= MIN_PAGE_SPACE {
            self.pages_with_space.insert(page_id);
        }
        Ok(RecordPointer { page_id, slot })
    }

    fn take_data_page(&mut self) -> Result<PageId> {
        match self.free_pages.pop() {
            Some(page_id) => Ok(page_id),
            None => self.pager.allocate_page(),
        }
    }

    fn read_slot(&mut self, recid: RecordId, pointer: RecordPointer) -> Result<(u8, Vec<u8>)> {
        let page = self.pager.fetch_page(pointer.page_id)?;
        let record_page = RecordPage::from_bytes(&mut page.data)?;
        let record = record_page.record_slice(pointer.slot)?;
        if record.len() < RECORD_PREFIX {
            return Err(DirError::Corruption(format!(
                "record {recid} shorter than its prefix"
            )));
        }
        let stored = u64::from_le_bytes(
            record[..8]
                .try_into()
                .map_err(|_| DirError::Corruption("recid bytes truncated".into()))?,
        );
        if stored != recid {
            return Err(DirError::Corruption(format!(
                "record slot holds recid {stored}, expected {recid}"
            )));
        }
        Ok((record[8], record[RECORD_PREFIX..].to_vec()))
    }

    fn release_storage(&mut self, recid: RecordId, pointer: RecordPointer) -> Result<()> {
        let (flag, body) = self.read_slot(recid, pointer)?;
        if flag == FLAG_OVERFLOW {
            let (head, _) = decode_overflow_stub(&body)?;
            self.release_overflow_chain(head)?;
        }
        let became_empty = {
            let page = self.pager.fetch_page(pointer.page_id)?;
            let mut record_page = RecordPage::from_bytes(&mut page.data)?;
            let empty = record_page.free_record(pointer.slot)?;
            page.dirty = true;
            empty
        };
        if became_empty {
            self.pages_with_space.remove(&pointer.page_id);
            self.pager.with_page_mut(pointer.page_id, |data| {
                data[0] = PageKind::Free as u8;
                Ok(())
            })?;
            self.free_pages.push(pointer.page_id);
        } else {
            self.pages_with_space.insert(pointer.page_id);
        }
        Ok(())
    }

    fn write_overflow_chain(&mut self, blob: &[u8]) -> Result<PageId> {
        let chunk_count = blob.len().div_ceil(OVERFLOW_CHUNK).max(1);
        let mut pages = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            pages.push(self.take_data_page()?);
        }
        for (i, chunk) in blob.chunks(OVERFLOW_CHUNK).enumerate() {
            let next: PageId = if i + 1 < pages.len() { pages[i + 1] } else { 0 };
            self.pager.with_page_mut(pages[i], |data| {
                let header_len = PAGE_HEADER_SIZE.min(data.len());
                data[..header_len].fill(0);
                data[0] = PageKind::Overflow as u8;
                data[4..8].copy_from_slice(&next.to_le_bytes());
                data[8..12].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
                data[OVERFLOW_HEADER..OVERFLOW_HEADER + chunk.len()].copy_from_slice(chunk);
                Ok(())
            })?;
        }
        Ok(pages[0])
    }

    fn read_overflow_chain(&mut self, head: PageId, total_len: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(total_len as usize);
        let mut current = head;
        while current != 0 {
            let (next, chunk) = self.pager.with_page(current, |data| {
                if data[0] != PageKind::Overflow as u8 {
                    return Err(DirError::Corruption(format!(
                        "page {current} is not an overflow page"
                    )));
                }
                let next = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                let len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
                if len == 0 || OVERFLOW_HEADER + len > PAGE_PAYLOAD_SIZE {
                    return Err(DirError::Corruption(format!(
                        "overflow chunk on page {current} has invalid length"
                    )));
                }
                Ok((next, data[OVERFLOW_HEADER..OVERFLOW_HEADER + len].to_vec()))
            })?;
            out.extend_from_slice(&chunk);
            if out.len() as u64 > total_len {
                return Err(DirError::Corruption(
                    "overflow chain longer than recorded length".into(),
                ));
            }
            current = next;
        }
        if out.len() as u64 != total_len {
            warn!(
                expected = total_len,
                actual = out.len(),
                "overflow chain shorter than recorded length"
            );
            return Err(DirError::Corruption(
                "overflow chain truncated".into(),
            ));
        }
        Ok(out)
    }

    fn release_overflow_chain(&mut self, head: PageId) -> Result<()> {
        let mut current = head;
        while current != 0 {
            let next = self.pager.with_page_mut(current, |data| {
                if data[0] != PageKind::Overflow as u8 {
                    return Err(DirError::Corruption(format!(
                        "page {current} is not an overflow page"
                    )));
                }
                let next = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                data[0] = PageKind::Free as u8;
                Ok(next)
            })?;
            self.free_pages.push(current);
            current = next;
        }
        Ok(())
    }
}

fn decode_overflow_stub(body: &[u8]) -> Result<(PageId, u64)> {
    if body.len() < 12 {
        return Err(DirError::Corruption("overflow stub truncated".into()));
    }
    let head = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let total_len = u64::from_le_bytes(
        body[4..12]
            .try_into()
            .map_err(|_| DirError::Corruption("overflow stub length truncated".into()))?,
    );
    Ok((head, total_len))
}

fn encode_names(roots: &BTreeMap<String, RecordId>, props: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(roots.len() as u32).to_le_bytes());
    for (name, recid) in roots {
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&recid.to_le_bytes());
    }
    out.extend_from_slice(&(props.len() as u32).to_le_bytes());
    for (key, value) in props {
        out.extend_from_slice(&(key.len() as u16).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

fn decode_names(bytes: &[u8]) -> Result<(BTreeMap<String, RecordId>, BTreeMap<String, String>)> {
    let mut cursor = 0usize;
    let root_count = read_u32(bytes, &mut cursor)?;
    let mut roots = BTreeMap::new();
    for _ in 0..root_count {
        let name_len = read_u16(bytes, &mut cursor)? as usize;
        let name = read_string(bytes, &mut cursor, name_len)?;
        let recid = read_u64(bytes, &mut cursor)?;
        roots.insert(name, recid);
    }
    let prop_count = read_u32(bytes, &mut cursor)?;
    let mut props = BTreeMap::new();
    for _ in 0..prop_count {
        let key_len = read_u16(bytes, &mut cursor)? as usize;
        let key = read_string(bytes, &mut cursor, key_len)?;
        let value_len = read_u32(bytes, &mut cursor)? as usize;
        let value = read_string(bytes, &mut cursor, value_len)?;
        props.insert(key, value);
    }
    Ok((roots, props))
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = bytes
        .get(*cursor..*cursor + 2)
        .ok_or_else(|| DirError::Corruption("directory record truncated".into()))?;
    *cursor += 2;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| DirError::Corruption("directory record truncated".into()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let slice = bytes
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| DirError::Corruption("directory record truncated".into()))?;
    *cursor += 8;
    let arr: [u8; 8] = slice
        .try_into()
        .map_err(|_| DirError::Corruption("directory record truncated".into()))?;
    Ok(u64::from_le_bytes(arr))
}

fn read_string(bytes: &[u8], cursor: &mut usize, len: usize) -> Result<String> {
    let slice = bytes
        .get(*cursor..*cursor + len)
        .ok_or_else(|| DirError::Corruption("directory record truncated".into()))?;
    *cursor += len;
    String::from_utf8(slice.to_vec())
        .map_err(|_| DirError::Corruption("directory record holds invalid UTF-8".into()))
}
