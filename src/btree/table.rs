//! The ordered key→value table: one block file, two bases, copy-on-write.
//!
//! A writable handle accumulates changed nodes in memory and publishes
//! them with `commit(revision)`: dirty blocks are written into free (or
//! fresh) slots of the data file, the file is fsynced, then the inactive
//! base descriptor is written. Readers opening the table pick the newest
//! intact base, or a pinned revision when a snapshot set must stay
//! consistent across tables.
//!
//! Blocks dropped while building revision R stay out of the allocation
//! pool until R+1 is being built, so neither on-disk base ever references
//! a block the writer is scribbling on. Readers further behind detect
//! recycled blocks by the revision stamped in every block header.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::base::Base;
use super::block::{overflow_capacity, parse_overflow, serialize_overflow, LeafItem, Node, Tag};
use super::cursor::Cursor;
use crate::error::{NautexError, Result};

/// Longest key the table accepts.
pub const MAX_KEY_LEN: usize = 252;

/// Tags below this length are never worth compressing.
const COMPRESS_MIN: usize = 4;

/// Sentinel for "written by the revision currently being built"; replaced
/// by the real revision number when the block is serialized at commit.
pub(crate) const REV_PENDING: u64 = u64::MAX;

/// Creation-time table parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    /// Block size in bytes: a power of two between 2 KiB and 64 KiB.
    pub block_size: u32,
    /// Transparently zlib-compress tags when that shrinks them.
    pub compress: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            block_size: 8192,
            compress: false,
        }
    }
}

impl TableConfig {
    pub fn validate(&self) -> Result<()> {
        let bs = self.block_size;
        if !(2048..=65536).contains(&bs) || !bs.is_power_of_two() {
            return Err(NautexError::InvalidArgument(format!(
                "block size {} must be a power of 2 between 2K and 64K",
                bs
            )));
        }
        Ok(())
    }
}

pub(crate) enum DirtyBlock {
    Node(Node),
    Overflow { next: u32, data: Vec<u8> },
}

struct InsertOutcome {
    no: u32,
    split: Option<(Vec<u8>, u32)>,
}

struct DeleteOutcome {
    no: u32,
    removed: bool,
    now_empty: bool,
}

/// One B-tree table bound to a snapshot revision.
pub struct Table {
    path: PathBuf,
    file: File,
    writable: bool,
    block_size: usize,
    compress_tags: bool,
    base: Base,
    base_letter: char,

    // Working state; equal to the base until the writer changes something.
    root: Option<u32>,
    levels: u32,
    entry_count: u64,
    next_block: u32,
    free: Vec<u32>,
    freed: Vec<u32>,
    dirty: HashMap<u32, DirtyBlock>,
    allocated_this_build: HashSet<u32>,
}

impl Table {
    /// Create a new empty table and leave it open for writing.
    ///
    /// Writes an empty revision-1 base so that a reader can open the
    /// table before anything is committed into it.
    pub fn create(path: &Path, config: TableConfig) -> Result<Table> {
        config.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(table_file(path))?;
        let base = Base::new_empty(config.block_size, config.compress);
        base.write(path, 'A')?;
        // A stale baseB from an earlier incarnation must not win later.
        let _ = std::fs::remove_file(Base::path_for(path, 'B'));
        Self::from_parts(path.to_path_buf(), file, base, 'A', true)
    }

    /// Open an existing table for writing, at its newest revision or at a
    /// pinned one (used to fall back to the last revision every table of
    /// a database reached, after a crash mid-commit).
    pub fn open_writable(path: &Path, pinned: Option<u64>) -> Result<Table> {
        let (base, letter) = Base::choose(path, pinned)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(table_file(path))?;
        Self::from_parts(path.to_path_buf(), file, base, letter, true)
    }

    /// Open a read-only snapshot, at the newest revision or a pinned one.
    pub fn open_readonly(path: &Path, pinned: Option<u64>) -> Result<Table> {
        let (base, letter) = Base::choose(path, pinned)?;
        let file = File::open(table_file(path))?;
        Self::from_parts(path.to_path_buf(), file, base, letter, false)
    }

    fn from_parts(
        path: PathBuf,
        file: File,
        base: Base,
        base_letter: char,
        writable: bool,
    ) -> Result<Table> {
        Ok(Table {
            path,
            file,
            writable,
            block_size: base.block_size as usize,
            compress_tags: base.compress_tags,
            root: base.root,
            levels: base.levels,
            entry_count: base.entry_count,
            next_block: base.next_block,
            free: base.free.clone(),
            freed: Vec::new(),
            dirty: HashMap::new(),
            allocated_this_build: HashSet::new(),
            base,
            base_letter,
        })
    }

    pub fn revision(&self) -> u64 {
        self.base.revision
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn get_entry_count(&self) -> u64 {
        self.entry_count
    }

    /// True when uncommitted changes are pending.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.freed.is_empty()
    }

    /// Look up `key` and return its (decompressed) tag.
    pub fn get_exact(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.find_item(key)? {
            Some(item) => Ok(Some(self.tag_value(&item.tag)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite `key`. Re-adding an unchanged value leaves the
    /// same logical state (plain upsert).
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        check_key(key)?;
        let (compressed, stored) = self.prepare_tag(value);
        self.add_stored(key, compressed, stored)
    }

    /// Insert a tag in already-on-disk form (possibly still compressed),
    /// as handed out by `Cursor::read_tag(raw = true)`. The merger uses
    /// this to move compressed tags without recompressing them.
    pub fn add_raw(&mut self, key: &[u8], compressed: bool, stored: Vec<u8>) -> Result<()> {
        self.check_writable()?;
        check_key(key)?;
        self.add_stored(key, compressed, stored)
    }

    fn add_stored(&mut self, key: &[u8], compressed: bool, stored: Vec<u8>) -> Result<()> {
        let tag = self.store_tag(compressed, stored);
        match self.root {
            None => {
                let no = self.alloc_block();
                let node = Node::Leaf {
                    items: vec![LeafItem {
                        key: key.to_vec(),
                        rev: REV_PENDING,
                        tag,
                    }],
                };
                self.dirty.insert(no, DirtyBlock::Node(node));
                self.root = Some(no);
                self.levels = 1;
                self.entry_count += 1;
            }
            Some(root) => {
                let outcome = self.insert_rec(root, key, tag)?;
                self.root = Some(outcome.no);
                if let Some((sep, right_no)) = outcome.split {
                    let no = self.alloc_block();
                    let node = Node::Branch {
                        separators: vec![sep],
                        children: vec![outcome.no, right_no],
                    };
                    self.dirty.insert(no, DirtyBlock::Node(node));
                    self.root = Some(no);
                    self.levels += 1;
                    trace!(table = %self.path.display(), levels = self.levels, "root split");
                }
            }
        }
        Ok(())
    }

    /// Remove `key`; reports whether anything was removed.
    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        // Probe first so a miss does not copy the whole root path.
        if self.find_item(key)?.is_none() {
            return Ok(false);
        }
        let Some(root) = self.root else {
            return Ok(false);
        };
        let outcome = self.delete_rec(root, key)?;
        self.root = Some(outcome.no);
        debug_assert!(outcome.removed);
        self.entry_count -= 1;
        if outcome.now_empty {
            self.free_block(outcome.no);
            self.root = None;
            self.levels = 0;
            return Ok(true);
        }
        // Collapse trivial root chains left by emptied subtrees.
        while let Some(no) = self.root {
            match self.read_node(no)? {
                Node::Branch { children, .. } if children.len() == 1 => {
                    let only = children[0];
                    self.free_block(no);
                    self.root = Some(only);
                    self.levels -= 1;
                }
                _ => break,
            }
        }
        Ok(true)
    }

    /// Durably publish everything under `revision`.
    ///
    /// `revision` must exceed the table's current one. A base is written
    /// even when no block changed, so that a multi-table database can keep
    /// every table openable at the same revision number.
    pub fn commit(&mut self, revision: u64) -> Result<()> {
        self.check_writable()?;
        if revision <= self.base.revision {
            return Err(NautexError::InvalidArgument(format!(
                "commit revision {} must exceed current {}",
                revision, self.base.revision
            )));
        }
        let dirty_blocks = self.dirty.len();
        for (&no, dirty) in &self.dirty {
            let buf = match dirty {
                DirtyBlock::Node(node) => node.serialize(revision, self.block_size),
                DirtyBlock::Overflow { next, data } => {
                    serialize_overflow(revision, *next, data, self.block_size)
                }
            };
            self.file
                .write_all_at(&buf, no as u64 * self.block_size as u64)?;
        }
        self.file.sync_all()?;

        let mut free = std::mem::take(&mut self.free);
        free.extend_from_slice(&self.base.freed);
        let new_base = Base {
            block_size: self.block_size as u32,
            revision,
            root: self.root,
            levels: self.levels,
            next_block: self.next_block,
            entry_count: self.entry_count,
            free,
            freed: std::mem::take(&mut self.freed),
            compress_tags: self.compress_tags,
        };
        let letter = if self.base_letter == 'A' { 'B' } else { 'A' };
        new_base.write(&self.path, letter)?;
        debug!(
            table = %self.path.display(),
            revision,
            dirty_blocks,
            entries = self.entry_count,
            "committed"
        );

        self.free = new_base.free.clone();
        self.base = new_base;
        self.base_letter = letter;
        self.dirty.clear();
        self.allocated_this_build.clear();
        Ok(())
    }

    /// Discard all uncommitted changes.
    pub fn cancel(&mut self) {
        self.root = self.base.root;
        self.levels = self.base.levels;
        self.entry_count = self.base.entry_count;
        self.next_block = self.base.next_block;
        self.free = self.base.free.clone();
        self.freed.clear();
        self.dirty.clear();
        self.allocated_this_build.clear();
    }

    /// A cursor positioned before the first entry.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }

    // ---- tree internals ----

    fn insert_rec(&mut self, no: u32, key: &[u8], tag: Tag) -> Result<InsertOutcome> {
        let (no, mut node) = self.load_for_update(no)?;
        match &mut node {
            Node::Leaf { items } => {
                match items.binary_search_by(|it| it.key.as_slice().cmp(key)) {
                    Ok(i) => {
                        let old = std::mem::replace(
                            &mut items[i],
                            LeafItem {
                                key: key.to_vec(),
                                rev: REV_PENDING,
                                tag,
                            },
                        );
                        self.release_tag(&old.tag)?;
                    }
                    Err(i) => {
                        items.insert(
                            i,
                            LeafItem {
                                key: key.to_vec(),
                                rev: REV_PENDING,
                                tag,
                            },
                        );
                        self.entry_count += 1;
                    }
                }
            }
            Node::Branch {
                separators,
                children,
            } => {
                let ci = separators.partition_point(|s| s.as_slice() <= key);
                let outcome = self.insert_rec(children[ci], key, tag)?;
                children[ci] = outcome.no;
                if let Some((sep, right_no)) = outcome.split {
                    separators.insert(ci, sep);
                    children.insert(ci + 1, right_no);
                }
            }
        }
        let mut split = None;
        if node.encoded_len() > self.block_size {
            let (sep, right) = node.split();
            let right_no = self.alloc_block();
            self.dirty.insert(right_no, DirtyBlock::Node(right));
            split = Some((sep, right_no));
        }
        self.dirty.insert(no, DirtyBlock::Node(node));
        Ok(InsertOutcome { no, split })
    }

    fn delete_rec(&mut self, no: u32, key: &[u8]) -> Result<DeleteOutcome> {
        let (no, mut node) = self.load_for_update(no)?;
        let (removed, now_empty) = match &mut node {
            Node::Leaf { items } => {
                match items.binary_search_by(|it| it.key.as_slice().cmp(key)) {
                    Ok(i) => {
                        let old = items.remove(i);
                        self.release_tag(&old.tag)?;
                        (true, items.is_empty())
                    }
                    Err(_) => (false, false),
                }
            }
            Node::Branch {
                separators,
                children,
            } => {
                let ci = separators.partition_point(|s| s.as_slice() <= key);
                let outcome = self.delete_rec(children[ci], key)?;
                children[ci] = outcome.no;
                if outcome.now_empty {
                    self.free_block(outcome.no);
                    children.remove(ci);
                    // Dropping child i removes the boundary on its right
                    // (or, for the last child, the one on its left).
                    if ci < separators.len() {
                        separators.remove(ci);
                    } else {
                        separators.pop();
                    }
                }
                (outcome.removed, children.is_empty())
            }
        };
        if now_empty {
            // Caller unlinks and frees this node.
            self.dirty.insert(no, DirtyBlock::Node(node));
            return Ok(DeleteOutcome {
                no,
                removed,
                now_empty,
            });
        }
        self.dirty.insert(no, DirtyBlock::Node(node));
        Ok(DeleteOutcome {
            no,
            removed,
            now_empty,
        })
    }

    /// Descend to the leaf item for `key`, if any.
    pub(crate) fn find_item(&self, key: &[u8]) -> Result<Option<LeafItem>> {
        let mut no = match self.root {
            Some(no) => no,
            None => return Ok(None),
        };
        loop {
            match self.read_node(no)? {
                Node::Leaf { items } => {
                    return Ok(items
                        .binary_search_by(|it| it.key.as_slice().cmp(key))
                        .ok()
                        .map(|i| items[i].clone()));
                }
                Node::Branch {
                    separators,
                    children,
                } => {
                    let ci = separators.partition_point(|s| s.as_slice() <= key);
                    no = children[ci];
                }
            }
        }
    }

    /// Read and parse a node, preferring the in-memory dirty copy.
    pub(crate) fn read_node(&self, no: u32) -> Result<Node> {
        if let Some(dirty) = self.dirty.get(&no) {
            return match dirty {
                DirtyBlock::Node(node) => Ok(node.clone()),
                DirtyBlock::Overflow { .. } => {
                    Err(NautexError::corrupt("node block number names an overflow block"))
                }
            };
        }
        let buf = self.read_block(no)?;
        let (rev, node) = Node::parse(&buf)?;
        self.check_block_rev(rev)?;
        Ok(node)
    }

    fn read_block(&self, no: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size];
        self.file
            .read_exact_at(&mut buf, no as u64 * self.block_size as u64)?;
        Ok(buf)
    }

    fn check_block_rev(&self, rev: u64) -> Result<()> {
        if rev > self.base.revision {
            return Err(NautexError::DatabaseModified {
                revision: self.base.revision,
            });
        }
        Ok(())
    }

    pub(crate) fn root(&self) -> Option<u32> {
        self.root
    }

    // ---- tag storage ----

    fn prepare_tag(&self, value: &[u8]) -> (bool, Vec<u8>) {
        if self.compress_tags && value.len() >= COMPRESS_MIN {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            if enc.write_all(value).is_ok() {
                if let Ok(packed) = enc.finish() {
                    if packed.len() < value.len() {
                        return (true, packed);
                    }
                }
            }
        }
        (false, value.to_vec())
    }

    fn max_inline(&self) -> usize {
        self.block_size / 4
    }

    fn store_tag(&mut self, compressed: bool, stored: Vec<u8>) -> Tag {
        if stored.len() <= self.max_inline() {
            return Tag::Inline {
                compressed,
                data: stored,
            };
        }
        // Chain the spill blocks back-to-front so each knows its successor.
        let cap = overflow_capacity(self.block_size);
        let total_len = stored.len() as u64;
        let mut next = 0u32;
        for chunk in stored.chunks(cap).rev() {
            let no = self.alloc_block();
            self.dirty.insert(
                no,
                DirtyBlock::Overflow {
                    next,
                    data: chunk.to_vec(),
                },
            );
            next = no;
        }
        Tag::Overflow {
            compressed,
            total_len,
            first_block: next,
        }
    }

    /// Free any overflow chain owned by a replaced or deleted tag.
    fn release_tag(&mut self, tag: &Tag) -> Result<()> {
        if let Tag::Overflow { first_block, .. } = tag {
            let mut no = *first_block;
            while no != 0 {
                let next = match self.dirty.get(&no) {
                    Some(DirtyBlock::Overflow { next, .. }) => *next,
                    Some(DirtyBlock::Node(_)) => {
                        return Err(NautexError::corrupt(
                            "overflow chain runs into a node block",
                        ))
                    }
                    None => {
                        let buf = self.read_block(no)?;
                        let (rev, next, _) = parse_overflow(&buf)?;
                        self.check_block_rev(rev)?;
                        next
                    }
                };
                self.free_block(no);
                no = next;
            }
        }
        Ok(())
    }

    /// Decompressed tag bytes.
    pub(crate) fn tag_value(&self, tag: &Tag) -> Result<Vec<u8>> {
        let (compressed, stored) = self.tag_raw(tag)?;
        if !compressed {
            return Ok(stored);
        }
        let mut out = Vec::new();
        let mut dec = ZlibDecoder::new(&stored[..]);
        std::io::Read::read_to_end(&mut dec, &mut out)
            .map_err(|e| NautexError::corrupt(format!("zlib tag: {}", e)))?;
        Ok(out)
    }

    /// Tag bytes exactly as stored, with the compression flag.
    pub(crate) fn tag_raw(&self, tag: &Tag) -> Result<(bool, Vec<u8>)> {
        match tag {
            Tag::Inline { compressed, data } => Ok((*compressed, data.clone())),
            Tag::Overflow {
                compressed,
                total_len,
                first_block,
            } => {
                let mut out = Vec::with_capacity(*total_len as usize);
                let mut no = *first_block;
                while no != 0 {
                    match self.dirty.get(&no) {
                        Some(DirtyBlock::Overflow { next, data }) => {
                            out.extend_from_slice(data);
                            no = *next;
                        }
                        Some(DirtyBlock::Node(_)) => {
                            return Err(NautexError::corrupt(
                                "overflow chain runs into a node block",
                            ))
                        }
                        None => {
                            let buf = self.read_block(no)?;
                            let (rev, next, data) = parse_overflow(&buf)?;
                            self.check_block_rev(rev)?;
                            out.extend_from_slice(data);
                            no = next;
                        }
                    }
                }
                if out.len() as u64 != *total_len {
                    return Err(NautexError::corrupt("overflow chain length mismatch"));
                }
                Ok((*compressed, out))
            }
        }
    }

    // ---- block allocation ----

    fn alloc_block(&mut self) -> u32 {
        let no = match self.free.pop() {
            Some(no) => no,
            None => {
                let no = self.next_block;
                self.next_block += 1;
                no
            }
        };
        self.allocated_this_build.insert(no);
        no
    }

    fn free_block(&mut self, no: u32) {
        if self.allocated_this_build.remove(&no) {
            // Never committed: reusable straight away.
            self.dirty.remove(&no);
            self.free.push(no);
        } else {
            self.freed.push(no);
        }
    }

    /// Copy-on-write load: committed blocks move to a fresh number before
    /// they may be changed; blocks from this build are edited in place.
    fn load_for_update(&mut self, no: u32) -> Result<(u32, Node)> {
        if self.allocated_this_build.contains(&no) {
            match self.dirty.remove(&no) {
                Some(DirtyBlock::Node(node)) => return Ok((no, node)),
                _ => {
                    return Err(NautexError::corrupt(
                        "dirty map lost a node allocated this build",
                    ))
                }
            }
        }
        let node = self.read_node(no)?;
        self.free_block(no);
        let new_no = self.alloc_block();
        Ok((new_no, node))
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(NautexError::InvalidOperation(
                "table opened read-only".into(),
            ));
        }
        Ok(())
    }
}

fn table_file(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".DB");
    path.with_file_name(name)
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(NautexError::InvalidArgument(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_table(dir: &TempDir) -> Table {
        Table::create(
            &dir.path().join("postlist"),
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_add_get_del() {
        let dir = TempDir::new().unwrap();
        let mut t = new_table(&dir);
        t.add(b"fox", b"one").unwrap();
        t.add(b"dog", b"two").unwrap();
        assert_eq!(t.get_exact(b"fox").unwrap().unwrap(), b"one");
        assert_eq!(t.get_exact(b"cat").unwrap(), None);
        assert_eq!(t.get_entry_count(), 2);

        t.add(b"fox", b"three").unwrap();
        assert_eq!(t.get_exact(b"fox").unwrap().unwrap(), b"three");
        assert_eq!(t.get_entry_count(), 2);

        assert!(t.del(b"fox").unwrap());
        assert!(!t.del(b"fox").unwrap());
        assert_eq!(t.get_exact(b"fox").unwrap(), None);
        assert_eq!(t.get_entry_count(), 1);
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record");
        {
            let mut t = Table::create(&path, TableConfig::default()).unwrap();
            for i in 0..500u32 {
                t.add(format!("key{:05}", i).as_bytes(), format!("value{}", i).as_bytes())
                    .unwrap();
            }
            t.commit(2).unwrap();
        }
        let t = Table::open_readonly(&path, None).unwrap();
        assert_eq!(t.revision(), 2);
        assert_eq!(t.get_entry_count(), 500);
        assert_eq!(t.get_exact(b"key00123").unwrap().unwrap(), b"value123");
        assert_eq!(t.get_exact(b"key99999").unwrap(), None);
    }

    #[test]
    fn test_uncommitted_changes_invisible_to_readers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("termlist");
        let mut w = Table::create(&path, TableConfig::default()).unwrap();
        w.add(b"seen", b"1").unwrap();
        w.commit(2).unwrap();
        w.add(b"unseen", b"2").unwrap();

        let r = Table::open_readonly(&path, None).unwrap();
        assert_eq!(r.get_exact(b"seen").unwrap().unwrap(), b"1");
        assert_eq!(r.get_exact(b"unseen").unwrap(), None);

        w.commit(3).unwrap();
        let r = Table::open_readonly(&path, None).unwrap();
        assert_eq!(r.get_exact(b"unseen").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_cancel_discards_pending() {
        let dir = TempDir::new().unwrap();
        let mut t = new_table(&dir);
        t.add(b"keep", b"1").unwrap();
        t.commit(2).unwrap();
        t.add(b"drop", b"2").unwrap();
        t.cancel();
        assert_eq!(t.get_exact(b"drop").unwrap(), None);
        assert_eq!(t.get_exact(b"keep").unwrap().unwrap(), b"1");
        assert!(!t.is_dirty());
    }

    #[test]
    fn test_commit_revision_must_advance() {
        let dir = TempDir::new().unwrap();
        let mut t = new_table(&dir);
        t.add(b"a", b"b").unwrap();
        assert!(t.commit(1).is_err());
        t.commit(2).unwrap();
    }

    #[test]
    fn test_large_tag_overflow_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record");
        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        {
            let mut t = Table::create(
                &path,
                TableConfig {
                    block_size: 2048,
                    compress: false,
                },
            )
            .unwrap();
            t.add(b"big", &big).unwrap();
            // Readable before and after commit.
            assert_eq!(t.get_exact(b"big").unwrap().unwrap(), big);
            t.commit(2).unwrap();
        }
        let t = Table::open_readonly(&path, None).unwrap();
        assert_eq!(t.get_exact(b"big").unwrap().unwrap(), big);
    }

    #[test]
    fn test_compressed_tags_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record");
        let mut t = Table::create(
            &path,
            TableConfig {
                block_size: 2048,
                compress: true,
            },
        )
        .unwrap();
        let compressible = vec![b'x'; 4000];
        t.add(b"doc", &compressible).unwrap();
        t.commit(2).unwrap();
        let r = Table::open_readonly(&path, None).unwrap();
        assert_eq!(r.get_exact(b"doc").unwrap().unwrap(), compressible);
        // The stored form really is smaller.
        let item = r.find_item(b"doc").unwrap().unwrap();
        let (compressed, stored) = r.tag_raw(&item.tag).unwrap();
        assert!(compressed);
        assert!(stored.len() < compressible.len());
    }

    #[test]
    fn test_blocks_recycle_across_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postlist");
        let mut t = Table::create(
            &path,
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap();
        for round in 0..10u64 {
            for i in 0..200u32 {
                t.add(
                    format!("k{:04}", i).as_bytes(),
                    format!("round {} value {}", round, i).as_bytes(),
                )
                .unwrap();
            }
            t.commit(round + 2).unwrap();
        }
        // Rewriting the same keys ten times must not grow the file tenfold:
        // freed blocks come back into use after one revision of deferral.
        let blocks_used = t.next_block as usize;
        let meta = std::fs::metadata(table_file(&path)).unwrap();
        assert_eq!(meta.len(), blocks_used as u64 * 2048);
        assert!(
            blocks_used < 120,
            "file grew to {} blocks; freelist not recycling",
            blocks_used
        );
    }

    #[test]
    fn test_many_keys_multilevel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postlist");
        let mut t = Table::create(
            &path,
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap();
        for i in 0..5000u32 {
            t.add(
                format!("term{:06}", i).as_bytes(),
                format!("{}", i * 7).as_bytes(),
            )
            .unwrap();
        }
        t.commit(2).unwrap();
        assert!(t.levels >= 2, "5000 entries should not fit one leaf");
        for i in (0..5000u32).step_by(617) {
            assert_eq!(
                t.get_exact(format!("term{:06}", i).as_bytes())
                    .unwrap()
                    .unwrap(),
                format!("{}", i * 7).as_bytes()
            );
        }
        // Delete everything; the tree must collapse back to empty.
        for i in 0..5000u32 {
            assert!(t.del(format!("term{:06}", i).as_bytes()).unwrap());
        }
        assert!(t.empty());
        assert_eq!(t.root(), None);
        t.commit(3).unwrap();
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spelling");
        Table::create(&path, TableConfig::default()).unwrap();
        let mut r = Table::open_readonly(&path, None).unwrap();
        assert!(matches!(
            r.add(b"k", b"v"),
            Err(NautexError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_key_length_limit() {
        let dir = TempDir::new().unwrap();
        let mut t = new_table(&dir);
        let long = vec![b'k'; MAX_KEY_LEN + 1];
        assert!(matches!(
            t.add(&long, b"v"),
            Err(NautexError::InvalidArgument(_))
        ));
    }
}
