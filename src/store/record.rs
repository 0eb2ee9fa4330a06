//! Opaque per-document payloads ("record data").
//!
//! Keyed by `sortable_uint(did)`. The record table is usually created
//! with tag compression on, since payloads tend to be text.

use crate::btree::Table;
use crate::error::Result;
use crate::pack::pack_uint_preserving_sort;

pub fn record_key(did: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did as u64);
    key
}

pub fn set_record(table: &mut Table, did: u32, data: &[u8]) -> Result<()> {
    table.add(&record_key(did), data)
}

pub fn remove_record(table: &mut Table, did: u32) -> Result<bool> {
    table.del(&record_key(did))
}

pub fn get_record(table: &Table, did: u32) -> Result<Option<Vec<u8>>> {
    table.get_exact(&record_key(did))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::TableConfig;
    use tempfile::TempDir;

    #[test]
    fn test_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut t = Table::create(
            &dir.path().join("record"),
            TableConfig {
                block_size: 2048,
                compress: true,
            },
        )
        .unwrap();
        set_record(&mut t, 1, b"the quick brown fox").unwrap();
        assert_eq!(
            get_record(&t, 1).unwrap().unwrap(),
            b"the quick brown fox"
        );
        assert_eq!(get_record(&t, 2).unwrap(), None);
        assert!(remove_record(&mut t, 1).unwrap());
        assert_eq!(get_record(&t, 1).unwrap(), None);
    }
}
