//! In-memory document representation used for ingest.
//!
//! The indexing side accepts pre-tokenized terms: callers add (term, wdf)
//! pairs, optionally with positions, plus value slots and an opaque
//! payload. The writer turns this into termlist/postlist/position/value
//! table changes at commit.

use std::collections::BTreeMap;

use crate::error::{NautexError, Result};
use crate::store::termlist::MAX_TERM_LEN;
use crate::store::values::MAX_SLOT;

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TermEntry {
    pub wdf: u32,
    /// Strictly increasing; length matches wdf when positions are used at
    /// all for this term, but positionless terms are fine.
    pub positions: Vec<u32>,
}

/// A document being built for `add_document` / `replace_document`.
#[derive(Clone, Debug, Default)]
pub struct Document {
    data: Vec<u8>,
    terms: BTreeMap<Vec<u8>, TermEntry>,
    values: BTreeMap<u32, Vec<u8>>,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    /// Opaque record data stored alongside the index entries.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Add `wdf_inc` occurrences of `term` with no position.
    pub fn add_term(&mut self, term: &[u8], wdf_inc: u32) -> Result<()> {
        check_term(term)?;
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.wdf += wdf_inc;
        Ok(())
    }

    /// Add a term for pure filtering: indexed, but contributing no length.
    pub fn add_boolean_term(&mut self, term: &[u8]) -> Result<()> {
        check_term(term)?;
        self.terms.entry(term.to_vec()).or_default();
        Ok(())
    }

    /// Add one positioned occurrence of `term`.
    pub fn add_posting(&mut self, term: &[u8], position: u32, wdf_inc: u32) -> Result<()> {
        check_term(term)?;
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.wdf += wdf_inc;
        if let Err(at) = entry.positions.binary_search(&position) {
            entry.positions.insert(at, position);
        }
        Ok(())
    }

    /// Remove a term entirely, with its positions.
    pub fn remove_term(&mut self, term: &[u8]) -> bool {
        self.terms.remove(term).is_some()
    }

    pub fn set_value(&mut self, slot: u32, value: &[u8]) -> Result<()> {
        if slot > MAX_SLOT {
            return Err(NautexError::InvalidArgument(format!(
                "value slot {} out of range",
                slot
            )));
        }
        if value.is_empty() {
            self.values.remove(&slot);
        } else {
            self.values.insert(slot, value.to_vec());
        }
        Ok(())
    }

    pub fn value(&self, slot: u32) -> Option<&[u8]> {
        self.values.get(&slot).map(|v| v.as_slice())
    }

    /// Sum of wdfs: the document length.
    pub fn length(&self) -> u64 {
        self.terms.values().map(|e| e.wdf as u64).sum()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn wdf(&self, term: &[u8]) -> Option<u32> {
        self.terms.get(term).map(|e| e.wdf)
    }

    pub fn positions(&self, term: &[u8]) -> Option<&[u32]> {
        self.terms.get(term).map(|e| e.positions.as_slice())
    }

    /// Terms in sorted order with wdfs, ready for the termlist encoder.
    pub fn termlist_entries(&self) -> Vec<(Vec<u8>, u32)> {
        self.terms
            .iter()
            .map(|(t, e)| (t.clone(), e.wdf))
            .collect()
    }

    pub(crate) fn terms(&self) -> &BTreeMap<Vec<u8>, TermEntry> {
        &self.terms
    }

    pub(crate) fn values_map(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.values
    }
}

fn check_term(term: &[u8]) -> Result<()> {
    if term.is_empty() {
        return Err(NautexError::InvalidArgument("empty term".into()));
    }
    if term.len() > MAX_TERM_LEN {
        return Err(NautexError::InvalidArgument(format!(
            "term of {} bytes exceeds the {} byte limit",
            term.len(),
            MAX_TERM_LEN
        )));
    }
    Ok(())
}
