//! Per-document value slots.
//!
//! Keyed by `sortable_uint(slot) · sortable_uint(did)` so that one slot's
//! values form a contiguous, docid-ordered key range: the VALUE_RANGE
//! operator walks it with a single cursor.

use crate::btree::{Cursor, Table};
use crate::error::{NautexError, Result};
use crate::pack::{pack_uint_preserving_sort, unpack_uint_preserving_sort};

/// Highest value slot number accepted.
pub const MAX_SLOT: u32 = 0x00ff_ffff;

pub fn value_key(slot: u32, did: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    pack_uint_preserving_sort(&mut key, slot as u64);
    pack_uint_preserving_sort(&mut key, did as u64);
    key
}

fn check_slot(slot: u32) -> Result<()> {
    if slot > MAX_SLOT {
        return Err(NautexError::InvalidArgument(format!(
            "value slot {} out of range",
            slot
        )));
    }
    Ok(())
}

pub fn set_value(table: &mut Table, slot: u32, did: u32, value: &[u8]) -> Result<()> {
    check_slot(slot)?;
    table.add(&value_key(slot, did), value)
}

pub fn remove_value(table: &mut Table, slot: u32, did: u32) -> Result<bool> {
    check_slot(slot)?;
    table.del(&value_key(slot, did))
}

pub fn get_value(table: &Table, slot: u32, did: u32) -> Result<Option<Vec<u8>>> {
    check_slot(slot)?;
    table.get_exact(&value_key(slot, did))
}

/// Key of a document's slot directory. The `0xff` lead byte keeps these
/// entries past every slot range (slot keys start with a length byte of
/// at most 4).
pub fn doc_slots_key(did: u32) -> Vec<u8> {
    let mut key = vec![0xff];
    pack_uint_preserving_sort(&mut key, did as u64);
    key
}

/// Record which slots a document uses, so a replace can clear them.
pub fn write_doc_slots(table: &mut Table, did: u32, slots: &[u32]) -> Result<()> {
    if slots.is_empty() {
        table.del(&doc_slots_key(did))?;
        return Ok(());
    }
    let mut tag = Vec::new();
    for &slot in slots {
        crate::pack::pack_uint(&mut tag, slot as u64);
    }
    table.add(&doc_slots_key(did), &tag)
}

pub fn read_doc_slots(table: &Table, did: u32) -> Result<Vec<u32>> {
    let Some(tag) = table.get_exact(&doc_slots_key(did))? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < tag.len() {
        out.push(crate::pack::unpack_uint(&tag, &mut pos)? as u32);
    }
    Ok(out)
}

/// Docid-ordered scan over every (did, value) pair of one slot.
pub struct SlotIterator<'a> {
    cursor: Cursor<'a>,
    slot_prefix: Vec<u8>,
    current: Option<u32>,
    advanced_once: bool,
}

impl<'a> SlotIterator<'a> {
    pub fn new(table: &'a Table, slot: u32) -> Result<SlotIterator<'a>> {
        check_slot(slot)?;
        let mut slot_prefix = Vec::new();
        pack_uint_preserving_sort(&mut slot_prefix, slot as u64);
        let mut cursor = table.cursor();
        cursor.find_entry_ge(&slot_prefix)?;
        Ok(SlotIterator {
            cursor,
            slot_prefix,
            current: None,
            advanced_once: false,
        })
    }

    pub fn at_end(&self) -> bool {
        self.advanced_once && self.current.is_none()
    }

    pub fn docid(&self) -> u32 {
        self.current.expect("SlotIterator not positioned")
    }

    pub fn value(&self) -> Result<Vec<u8>> {
        self.cursor.read_tag()
    }

    pub fn next(&mut self) -> Result<()> {
        if self.advanced_once {
            self.cursor.next()?;
        } else {
            self.advanced_once = true;
        }
        let Some(key) = self.cursor.current_key() else {
            self.current = None;
            return Ok(());
        };
        if !key.starts_with(&self.slot_prefix) {
            self.current = None;
            return Ok(());
        }
        let mut pos = self.slot_prefix.len();
        let did = unpack_uint_preserving_sort(key, &mut pos)? as u32;
        self.current = Some(did);
        Ok(())
    }

    /// Advance to the first entry with docid >= `target`.
    pub fn skip_to(&mut self, target: u32) -> Result<()> {
        if self.advanced_once {
            if let Some(did) = self.current {
                if did >= target {
                    return Ok(());
                }
            } else {
                return Ok(());
            }
        }
        self.advanced_once = true;
        let mut key = self.slot_prefix.clone();
        pack_uint_preserving_sort(&mut key, target as u64);
        self.cursor.find_entry_ge(&key)?;
        let Some(found) = self.cursor.current_key() else {
            self.current = None;
            return Ok(());
        };
        if !found.starts_with(&self.slot_prefix) {
            self.current = None;
            return Ok(());
        }
        let mut pos = self.slot_prefix.len();
        self.current = Some(unpack_uint_preserving_sort(found, &mut pos)? as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::TableConfig;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> Table {
        Table::create(
            &dir.path().join("value"),
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_value_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        set_value(&mut t, 0, 3, b"hello").unwrap();
        set_value(&mut t, 1, 3, b"other slot").unwrap();
        assert_eq!(get_value(&t, 0, 3).unwrap().unwrap(), b"hello");
        assert_eq!(get_value(&t, 0, 4).unwrap(), None);
        assert!(remove_value(&mut t, 0, 3).unwrap());
        assert_eq!(get_value(&t, 0, 3).unwrap(), None);
        assert_eq!(get_value(&t, 1, 3).unwrap().unwrap(), b"other slot");
    }

    #[test]
    fn test_slot_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        assert!(set_value(&mut t, MAX_SLOT + 1, 1, b"x").is_err());
    }

    #[test]
    fn test_slot_scan_is_docid_ordered() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        for did in [300u32, 2, 40_000, 7] {
            set_value(&mut t, 5, did, format!("v{}", did).as_bytes()).unwrap();
        }
        // Noise in a neighbouring slot must not leak into the scan.
        set_value(&mut t, 6, 1, b"noise").unwrap();

        let mut it = SlotIterator::new(&t, 5).unwrap();
        let mut seen = Vec::new();
        it.next().unwrap();
        while !it.at_end() {
            seen.push(it.docid());
            it.next().unwrap();
        }
        assert_eq!(seen, vec![2, 7, 300, 40_000]);
    }

    #[test]
    fn test_slot_skip_to() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        for did in [2u32, 7, 300] {
            set_value(&mut t, 0, did, b"v").unwrap();
        }
        let mut it = SlotIterator::new(&t, 0).unwrap();
        it.skip_to(8).unwrap();
        assert_eq!(it.docid(), 300);
        it.next().unwrap();
        assert!(it.at_end());
    }
}
