//! Ranked result sets and sort/collapse key construction.

use crate::db::Database;
use crate::error::Result;

/// One ranked match.
#[derive(Clone, Debug)]
pub struct MSetItem {
    pub docid: u32,
    pub weight: f64,
    /// Share of the query this document matched, 0..=100.
    pub percent: u8,
    /// Key the result set was sorted by, when a key maker was set.
    pub sort_key: Option<Vec<u8>>,
    /// Key the result set was collapsed on, when collapsing.
    pub collapse_key: Option<Vec<u8>>,
}

/// A ranked result set.
#[derive(Clone, Debug, Default)]
pub struct MSet {
    /// Items in rank order, already offset by `first`.
    pub items: Vec<MSetItem>,
    pub matches_lower_bound: u32,
    pub matches_estimated: u32,
    pub matches_upper_bound: u32,
    /// Greatest weight any document could have reached.
    pub max_possible: f64,
    /// Greatest weight actually attained.
    pub max_attained: f64,
    /// Rank of the first item (the `first` argument of the match).
    pub first: u32,
}

impl MSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn docids(&self) -> Vec<u32> {
        self.items.iter().map(|i| i.docid).collect()
    }
}

/// Builds a byte-string key from a document, for sorting or collapsing.
/// (The historical "Sorter" interface with the opposite flag sense is
/// subsumed by this one.)
pub trait KeyMaker: Send + Sync {
    fn make_key(&self, db: &Database, did: u32) -> Result<Vec<u8>>;
}

/// Key maker concatenating one or more value slots.
///
/// Each slot can independently be reversed, so "price ascending, date
/// descending" style composite orders work. Values are escaped so that
/// concatenation never confuses field boundaries.
#[derive(Clone, Debug, Default)]
pub struct MultiValueKeyMaker {
    slots: Vec<(u32, bool)>,
}

impl MultiValueKeyMaker {
    pub fn new() -> MultiValueKeyMaker {
        MultiValueKeyMaker::default()
    }

    /// Append a slot; `reverse` flips this field's direction.
    pub fn add_value(&mut self, slot: u32, reverse: bool) -> &mut Self {
        self.slots.push((slot, reverse));
        self
    }
}

impl KeyMaker for MultiValueKeyMaker {
    fn make_key(&self, db: &Database, did: u32) -> Result<Vec<u8>> {
        let mut key = Vec::new();
        for &(slot, reverse) in &self.slots {
            let value = db.get_value(did, slot)?.unwrap_or_default();
            // Escape \0 so the field terminator stays unambiguous, then
            // optionally complement so byte order flips.
            for &b in &value {
                let b = if reverse { !b } else { b };
                if b == 0 {
                    key.push(0);
                    key.push(0xff);
                } else {
                    key.push(b);
                }
            }
            key.push(0);
            key.push(if reverse { 0xfe } else { 0 });
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseSettings, Document, WritableDatabase};
    use tempfile::TempDir;

    fn db_with_values(dir: &TempDir) -> Database {
        let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
        for value in ["beta", "alpha", "gamma"] {
            let mut doc = Document::new();
            doc.add_term(b"x", 1).unwrap();
            doc.set_value(0, value.as_bytes()).unwrap();
            w.add_document(&doc).unwrap();
        }
        w.commit().unwrap();
        w.close();
        Database::open(dir.path()).unwrap()
    }

    #[test]
    fn test_keymaker_orders_by_value() {
        let dir = TempDir::new().unwrap();
        let db = db_with_values(&dir);
        let mut maker = MultiValueKeyMaker::new();
        maker.add_value(0, false);
        let keys: Vec<Vec<u8>> = (1..=3)
            .map(|did| maker.make_key(&db, did).unwrap())
            .collect();
        // Values: beta, alpha, gamma -> alpha < beta < gamma.
        assert!(keys[1] < keys[0]);
        assert!(keys[0] < keys[2]);
    }

    #[test]
    fn test_keymaker_reverse_flips_order() {
        let dir = TempDir::new().unwrap();
        let db = db_with_values(&dir);
        let mut maker = MultiValueKeyMaker::new();
        maker.add_value(0, true);
        let keys: Vec<Vec<u8>> = (1..=3)
            .map(|did| maker.make_key(&db, did).unwrap())
            .collect();
        assert!(keys[1] > keys[0]);
        assert!(keys[0] > keys[2]);
    }
}
