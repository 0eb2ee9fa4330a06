//! VALUE_RANGE: documents whose value in a slot lies in [lo, hi].
//!
//! Backed by a single cursor scan over the slot's contiguous key range
//! in the value table, comparing bytes lexicographically. A pure filter:
//! contributes no weight.

use super::PostList;
use crate::db::TableSet;
use crate::error::Result;
use crate::store::postlist::PostlistIterator;
use crate::store::values::SlotIterator;

pub struct ValueRangePostList<'a> {
    it: SlotIterator<'a>,
    lo: Vec<u8>,
    hi: Vec<u8>,
    dbsize: u32,
    /// Reader over the all-docs list for doclength queries.
    doclen_it: Option<PostlistIterator<'a>>,
    tables: &'a TableSet,
    started: bool,
}

impl<'a> ValueRangePostList<'a> {
    pub fn open(
        tables: &'a TableSet,
        slot: u32,
        lo: Vec<u8>,
        hi: Vec<u8>,
        dbsize: u32,
    ) -> Result<ValueRangePostList<'a>> {
        Ok(ValueRangePostList {
            it: SlotIterator::new(&tables.value, slot)?,
            lo,
            hi,
            dbsize,
            doclen_it: None,
            tables,
            started: false,
        })
    }

    fn in_range(&self) -> Result<bool> {
        let value = self.it.value()?;
        Ok(value.as_slice() >= self.lo.as_slice() && value.as_slice() <= self.hi.as_slice())
    }

    fn settle(&mut self) -> Result<()> {
        while !self.it.at_end() {
            if self.in_range()? {
                return Ok(());
            }
            self.it.next()?;
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<Option<Box<PostList<'a>>>> {
        self.started = true;
        self.it.next()?;
        self.settle()?;
        Ok(None)
    }

    pub fn skip_to(&mut self, did: u32) -> Result<Option<Box<PostList<'a>>>> {
        self.started = true;
        self.it.skip_to(did)?;
        self.settle()?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        self.it.docid()
    }

    pub fn at_end(&self) -> bool {
        self.started && self.it.at_end()
    }

    pub fn get_termfreq_min(&self) -> u32 {
        0
    }

    pub fn get_termfreq_est(&self) -> u32 {
        self.dbsize / 2
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.dbsize
    }

    pub fn get_maxweight(&self) -> f64 {
        0.0
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        let did = self.it.docid();
        if self.doclen_it.is_none() {
            self.doclen_it = PostlistIterator::open(&self.tables.postlist, b"")?;
        }
        if let Some(doclen_it) = self.doclen_it.as_mut() {
            doclen_it.skip_to(did)?;
            if !doclen_it.at_end() && doclen_it.docid() == did {
                return Ok(doclen_it.wdf() as u64);
            }
        }
        Ok(0)
    }
}
