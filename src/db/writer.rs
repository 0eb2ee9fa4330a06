//! The writable database handle.
//!
//! Document mutations land in an in-memory inverter first: per-term
//! posting deltas, replacement termlists, position and value changes.
//! Nothing touches the tables until `commit`, which flushes the buffer,
//! rewrites the affected posting chunks, updates the global meta entry
//! and commits every table under the next revision number. Readers see
//! the old revision until the last base is on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::document::Document;
use super::lock::WriterLock;
use super::reader::{TableSet, TABLE_NAMES};
use super::version;
use crate::btree::{Table, TableConfig};
use crate::error::{NautexError, Result};
use crate::store::{position, postlist, record, spelling, synonym, termlist, values};

/// Creation-time database settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Block size shared by all tables.
    pub block_size: u32,
    /// Compress record payloads.
    pub compress_records: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            block_size: 8192,
            compress_records: true,
        }
    }
}

#[derive(Default)]
struct Inverter {
    /// term -> did -> new wdf (None removes the posting).
    postlist_changes: BTreeMap<Vec<u8>, BTreeMap<u32, Option<u32>>>,
    /// did -> new doc length (None removes from the all-docs list).
    doclen_changes: BTreeMap<u32, Option<u32>>,
    /// did -> replacement termlist (None deletes it).
    termlist_changes: BTreeMap<u32, Option<(u64, Vec<(Vec<u8>, u32)>)>>,
    /// (did, term) -> replacement position list (None deletes it).
    position_changes: BTreeMap<(u32, Vec<u8>), Option<Vec<u32>>>,
    /// (did, slot) -> replacement value (None deletes it).
    value_changes: BTreeMap<(u32, u32), Option<Vec<u8>>>,
    /// did -> slots now used (None clears the directory entry).
    doc_slots_changes: BTreeMap<u32, Option<Vec<u32>>>,
    /// did -> replacement record payload (None deletes it).
    record_changes: BTreeMap<u32, Option<Vec<u8>>>,
}

impl Inverter {
    fn is_empty(&self) -> bool {
        self.postlist_changes.is_empty()
            && self.doclen_changes.is_empty()
            && self.termlist_changes.is_empty()
            && self.position_changes.is_empty()
            && self.value_changes.is_empty()
            && self.doc_slots_changes.is_empty()
            && self.record_changes.is_empty()
    }

    fn clear(&mut self) {
        *self = Inverter::default();
    }
}

struct WriterState {
    tables: TableSet,
    revision: u64,
    last_docid: u32,
    doc_count: u32,
    total_doclen: u64,
    inverter: Inverter,
}

/// The one writable handle a database directory allows.
pub struct WritableDatabase {
    path: PathBuf,
    lock: WriterLock,
    state: Option<WriterState>,
}

impl WritableDatabase {
    /// Create a fresh database directory.
    pub fn create(path: impl AsRef<Path>, settings: DatabaseSettings) -> Result<WritableDatabase> {
        let path = path.as_ref().to_path_buf();
        TableConfig {
            block_size: settings.block_size,
            compress: false,
        }
        .validate()?;
        if path.join(version::MARKER_FILE).exists() {
            return Err(NautexError::DatabaseCreate(format!(
                "{} already holds a database",
                path.display()
            )));
        }
        std::fs::create_dir_all(&path)
            .map_err(|e| NautexError::DatabaseCreate(format!("{}: {}", path.display(), e)))?;
        let lock = WriterLock::acquire(&path)?;
        version::write_marker(&path)?;
        version::write_fresh_uuid(&path)?;

        let mut tables = Vec::with_capacity(TABLE_NAMES.len());
        for name in TABLE_NAMES {
            let config = TableConfig {
                block_size: settings.block_size,
                compress: name == "record" && settings.compress_records,
            };
            tables.push(Table::create(&path.join(name), config)?);
        }
        let state = WriterState {
            tables: TableSet::from_vec(tables),
            revision: 1,
            last_docid: 0,
            doc_count: 0,
            total_doclen: 0,
            inverter: Inverter::default(),
        };
        info!(db = %path.display(), "created database");
        Ok(WritableDatabase {
            path,
            lock,
            state: Some(state),
        })
    }

    /// Open an existing database for writing.
    pub fn open(path: impl AsRef<Path>) -> Result<WritableDatabase> {
        let path = path.as_ref().to_path_buf();
        version::check_marker(&path)?;
        let lock = WriterLock::acquire(&path)?;

        let mut tables = Vec::with_capacity(TABLE_NAMES.len());
        for name in TABLE_NAMES {
            tables.push(Table::open_writable(&path.join(name), None)?);
        }
        // After a crash mid-commit some tables may sit one revision ahead;
        // fall back to the revision every table reached.
        let revision = tables.iter().map(Table::revision).min().unwrap_or(1);
        for (table, name) in tables.iter_mut().zip(TABLE_NAMES) {
            if table.revision() != revision {
                *table = Table::open_writable(&path.join(name), Some(revision))?;
            }
        }
        let tables = TableSet::from_vec(tables);
        let (last_docid, total_doclen) = postlist::read_meta(&tables.postlist)?;
        let doc_count = postlist::term_stats(&tables.postlist, b"")?
            .map(|s| s.term_freq)
            .unwrap_or(0);
        Ok(WritableDatabase {
            path,
            lock,
            state: Some(WriterState {
                tables,
                revision,
                last_docid,
                doc_count,
                total_doclen,
                inverter: Inverter::default(),
            }),
        })
    }

    /// Open, creating when the directory is not yet a database.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        settings: DatabaseSettings,
    ) -> Result<WritableDatabase> {
        if path.as_ref().join(version::MARKER_FILE).exists() {
            Self::open(path)
        } else {
            Self::create(path, settings)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> Result<&WriterState> {
        self.state.as_ref().ok_or(NautexError::DatabaseClosed)
    }

    fn state_mut(&mut self) -> Result<&mut WriterState> {
        self.state.as_mut().ok_or(NautexError::DatabaseClosed)
    }

    pub fn last_docid(&self) -> Result<u32> {
        Ok(self.state()?.last_docid)
    }

    pub fn doc_count(&self) -> Result<u32> {
        Ok(self.state()?.doc_count)
    }

    pub fn total_length(&self) -> Result<u64> {
        Ok(self.state()?.total_doclen)
    }

    pub fn revision(&self) -> Result<u64> {
        Ok(self.state()?.revision)
    }

    /// Add a document under the next docid; returns the docid.
    pub fn add_document(&mut self, doc: &Document) -> Result<u32> {
        let did = self
            .state()?
            .last_docid
            .checked_add(1)
            .ok_or_else(|| NautexError::Range("docid space exhausted".into()))?;
        self.replace_document(did, doc)?;
        Ok(did)
    }

    /// Insert or replace the document with docid `did`.
    ///
    /// Replacing a document with an identical one (same termlist,
    /// positions, values and payload) adds nothing to the flush buffer.
    pub fn replace_document(&mut self, did: u32, doc: &Document) -> Result<()> {
        if did == 0 {
            return Err(NautexError::InvalidArgument("docid 0 is not valid".into()));
        }
        let old = self.current_termlist(did)?;
        if let Some((old_doclen, old_entries)) = &old {
            if self.doc_unchanged(did, doc, *old_doclen, old_entries)? {
                debug!(did, "replace with identical document skipped");
                return Ok(());
            }
        }
        let state = self.state_mut()?;
        let new_entries = doc.termlist_entries();
        let new_len = doc.length();

        // Retract the old document's contributions first; re-adding a
        // surviving term simply overwrites its slot in the delta map.
        if let Some((old_doclen, old_entries)) = &old {
            for (term, _) in old_entries {
                state
                    .inverter
                    .postlist_changes
                    .entry(term.clone())
                    .or_default()
                    .insert(did, None);
                state
                    .inverter
                    .position_changes
                    .insert((did, term.clone()), None);
            }
            state.total_doclen -= old_doclen;
        } else {
            state.doc_count += 1;
        }
        for (term, entry) in doc.terms() {
            state
                .inverter
                .postlist_changes
                .entry(term.clone())
                .or_default()
                .insert(did, Some(entry.wdf));
            if !entry.positions.is_empty() {
                state
                    .inverter
                    .position_changes
                    .insert((did, term.clone()), Some(entry.positions.clone()));
            }
        }
        state.total_doclen += new_len;
        state
            .inverter
            .doclen_changes
            .insert(did, Some(new_len as u32));
        state
            .inverter
            .termlist_changes
            .insert(did, Some((new_len, new_entries)));
        state
            .inverter
            .record_changes
            .insert(did, Some(doc.data().to_vec()));

        // Values: clear whatever slots the old incarnation used, then set
        // the new ones.
        let old_slots = self.current_doc_slots(did)?;
        let state = self.state_mut()?;
        for slot in old_slots {
            state.inverter.value_changes.insert((did, slot), None);
        }
        let mut new_slots = Vec::new();
        for (&slot, value) in doc.values_map() {
            state
                .inverter
                .value_changes
                .insert((did, slot), Some(value.clone()));
            new_slots.push(slot);
        }
        state.inverter.doc_slots_changes.insert(
            did,
            if new_slots.is_empty() {
                None
            } else {
                Some(new_slots)
            },
        );

        if did > state.last_docid {
            state.last_docid = did;
        }
        Ok(())
    }

    /// Remove document `did` entirely.
    pub fn delete_document(&mut self, did: u32) -> Result<()> {
        let Some((old_doclen, old_entries)) = self.current_termlist(did)? else {
            return Err(NautexError::DocNotFound(did));
        };
        let old_slots = self.current_doc_slots(did)?;
        let state = self.state_mut()?;
        for (term, _) in &old_entries {
            state
                .inverter
                .postlist_changes
                .entry(term.clone())
                .or_default()
                .insert(did, None);
            state
                .inverter
                .position_changes
                .insert((did, term.clone()), None);
        }
        for slot in old_slots {
            state.inverter.value_changes.insert((did, slot), None);
        }
        state.inverter.doc_slots_changes.insert(did, None);
        state.inverter.doclen_changes.insert(did, None);
        state.inverter.termlist_changes.insert(did, None);
        state.inverter.record_changes.insert(did, None);
        state.total_doclen -= old_doclen;
        state.doc_count -= 1;
        Ok(())
    }

    /// Set (or with an empty value, clear) a user metadata entry.
    pub fn set_metadata(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        let state = self.state_mut()?;
        let key = postlist::user_metadata_key(name);
        if value.is_empty() {
            state.tables.postlist.del(&key)?;
        } else {
            state.tables.postlist.add(&key, value)?;
        }
        Ok(())
    }

    pub fn add_spelling(&mut self, word: &[u8], freq_inc: u64) -> Result<()> {
        let state = self.state_mut()?;
        spelling::add_word(&mut state.tables.spelling, word, freq_inc)
    }

    pub fn remove_spelling(&mut self, word: &[u8], freq_dec: u64) -> Result<()> {
        let state = self.state_mut()?;
        spelling::remove_word(&mut state.tables.spelling, word, freq_dec)
    }

    pub fn add_synonym(&mut self, term: &[u8], syn: &[u8]) -> Result<()> {
        let state = self.state_mut()?;
        synonym::add_synonym(&mut state.tables.synonym, term, syn)
    }

    pub fn remove_synonym(&mut self, term: &[u8], syn: &[u8]) -> Result<()> {
        let state = self.state_mut()?;
        synonym::remove_synonym(&mut state.tables.synonym, term, syn)
    }

    /// Durably publish all pending changes. With nothing pending this is
    /// a no-op and no new revision is written.
    pub fn commit(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        let tables_dirty = [
            &state.tables.postlist,
            &state.tables.record,
            &state.tables.termlist,
            &state.tables.position,
            &state.tables.value,
            &state.tables.spelling,
            &state.tables.synonym,
        ]
        .iter()
        .any(|t| t.is_dirty());
        if state.inverter.is_empty() && !tables_dirty {
            debug!("commit with no pending changes: nothing to do");
            return Ok(());
        }
        let revision = state.revision + 1;
        Self::flush_inverter(state)?;
        postlist::write_meta(
            &mut state.tables.postlist,
            state.last_docid,
            state.total_doclen,
        )?;

        state.tables.record.commit(revision)?;
        state.tables.termlist.commit(revision)?;
        state.tables.position.commit(revision)?;
        state.tables.value.commit(revision)?;
        state.tables.spelling.commit(revision)?;
        state.tables.synonym.commit(revision)?;
        state.tables.postlist.commit(revision)?;
        state.revision = revision;
        let docs = state.doc_count;
        info!(db = %self.path.display(), revision, docs, "commit");
        Ok(())
    }

    fn flush_inverter(state: &mut WriterState) -> Result<()> {
        let inverter = std::mem::take(&mut state.inverter);

        for (did, change) in inverter.record_changes {
            match change {
                Some(data) => record::set_record(&mut state.tables.record, did, &data)?,
                None => {
                    record::remove_record(&mut state.tables.record, did)?;
                }
            }
        }
        for (did, change) in inverter.termlist_changes {
            match change {
                Some((doclen, entries)) => {
                    termlist::set_termlist(&mut state.tables.termlist, did, doclen, &entries)?
                }
                None => {
                    termlist::remove_termlist(&mut state.tables.termlist, did)?;
                }
            }
        }
        for ((did, term), change) in inverter.position_changes {
            match change {
                Some(positions) => {
                    position::set_positions(&mut state.tables.position, did, &term, &positions)?
                }
                None => position::remove_positions(&mut state.tables.position, did, &term)?,
            }
        }
        for ((did, slot), change) in inverter.value_changes {
            match change {
                Some(value) => values::set_value(&mut state.tables.value, slot, did, &value)?,
                None => {
                    values::remove_value(&mut state.tables.value, slot, did)?;
                }
            }
        }
        for (did, change) in inverter.doc_slots_changes {
            match change {
                Some(slots) => values::write_doc_slots(&mut state.tables.value, did, &slots)?,
                None => values::write_doc_slots(&mut state.tables.value, did, &[])?,
            }
        }
        for (term, deltas) in inverter.postlist_changes {
            apply_postlist_deltas(&mut state.tables.postlist, &term, &deltas)?;
        }
        // The all-documents list: wdf carries the doc length.
        if !inverter.doclen_changes.is_empty() {
            apply_postlist_deltas(
                &mut state.tables.postlist,
                b"",
                &inverter.doclen_changes,
            )?;
        }
        Ok(())
    }

    /// Discard every pending change, restoring the committed state.
    pub fn cancel(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        state.inverter.clear();
        state.tables.postlist.cancel();
        state.tables.record.cancel();
        state.tables.termlist.cancel();
        state.tables.position.cancel();
        state.tables.value.cancel();
        state.tables.spelling.cancel();
        state.tables.synonym.cancel();
        let (last_docid, total_doclen) = postlist::read_meta(&state.tables.postlist)?;
        state.last_docid = last_docid;
        state.total_doclen = total_doclen;
        state.doc_count = postlist::term_stats(&state.tables.postlist, b"")?
            .map(|s| s.term_freq)
            .unwrap_or(0);
        Ok(())
    }

    /// Drop the tables and the writer lock. Uncommitted changes are
    /// discarded; call `commit` first to keep them. Closing twice is
    /// harmless.
    pub fn close(&mut self) {
        self.state = None;
        self.lock.release();
    }

    /// Direct table access for the compactor, which streams merged
    /// entries straight into a fresh destination database.
    pub(crate) fn tables_mut(&mut self) -> Result<&mut TableSet> {
        Ok(&mut self.state_mut()?.tables)
    }

    /// Install externally computed document statistics (compactor only;
    /// normal ingest maintains these incrementally).
    pub(crate) fn set_doc_stats(
        &mut self,
        last_docid: u32,
        doc_count: u32,
        total_doclen: u64,
    ) -> Result<()> {
        let state = self.state_mut()?;
        state.last_docid = last_docid;
        state.doc_count = doc_count;
        state.total_doclen = total_doclen;
        Ok(())
    }

    /// Whether uncommitted changes are pending (used by tests to pin the
    /// identical-replace behaviour).
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let state = self.state()?;
        Ok(!state.inverter.is_empty()
            || state.tables.postlist.is_dirty()
            || state.tables.record.is_dirty()
            || state.tables.termlist.is_dirty()
            || state.tables.position.is_dirty()
            || state.tables.value.is_dirty()
            || state.tables.spelling.is_dirty()
            || state.tables.synonym.is_dirty())
    }

    // ---- current (committed + buffered) views ----

    fn current_termlist(&self, did: u32) -> Result<Option<(u64, Vec<(Vec<u8>, u32)>)>> {
        let state = self.state()?;
        if let Some(change) = state.inverter.termlist_changes.get(&did) {
            return Ok(change.clone());
        }
        match termlist::TermListIterator::open(&state.tables.termlist, did)? {
            Some(it) => {
                let doclen = it.doc_length();
                Ok(Some((doclen, it.collect_entries()?)))
            }
            None => Ok(None),
        }
    }

    fn current_doc_slots(&self, did: u32) -> Result<Vec<u32>> {
        let state = self.state()?;
        if let Some(change) = state.inverter.doc_slots_changes.get(&did) {
            return Ok(change.clone().unwrap_or_default());
        }
        values::read_doc_slots(&state.tables.value, did)
    }

    fn current_positions(&self, did: u32, term: &[u8]) -> Result<Vec<u32>> {
        let state = self.state()?;
        if let Some(change) = state
            .inverter
            .position_changes
            .get(&(did, term.to_vec()))
        {
            return Ok(change.clone().unwrap_or_default());
        }
        position::read_positions(&state.tables.position, did, term)
    }

    fn current_record(&self, did: u32) -> Result<Option<Vec<u8>>> {
        let state = self.state()?;
        if let Some(change) = state.inverter.record_changes.get(&did) {
            return Ok(change.clone());
        }
        record::get_record(&state.tables.record, did)
    }

    fn current_value(&self, did: u32, slot: u32) -> Result<Option<Vec<u8>>> {
        let state = self.state()?;
        if let Some(change) = state.inverter.value_changes.get(&(did, slot)) {
            return Ok(change.clone());
        }
        values::get_value(&state.tables.value, slot, did)
    }

    /// Byte-exact equality of the stored document against `doc`.
    fn doc_unchanged(
        &self,
        did: u32,
        doc: &Document,
        old_doclen: u64,
        old_entries: &[(Vec<u8>, u32)],
    ) -> Result<bool> {
        if doc.length() != old_doclen || doc.termlist_entries() != old_entries {
            return Ok(false);
        }
        if self.current_record(did)?.as_deref().unwrap_or(b"") != doc.data() {
            return Ok(false);
        }
        let old_slots = self.current_doc_slots(did)?;
        let new_slots: Vec<u32> = doc.values_map().keys().copied().collect();
        if old_slots != new_slots {
            return Ok(false);
        }
        for (&slot, value) in doc.values_map() {
            if self.current_value(did, slot)?.as_deref() != Some(value.as_slice()) {
                return Ok(false);
            }
        }
        for (term, entry) in doc.terms() {
            if self.current_positions(did, term)? != entry.positions {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Drop for WritableDatabase {
    fn drop(&mut self) {
        self.close();
    }
}

/// Merge a delta map into a stored posting list and write it back.
fn apply_postlist_deltas(
    table: &mut Table,
    term: &[u8],
    deltas: &BTreeMap<u32, Option<u32>>,
) -> Result<()> {
    let mut merged: BTreeMap<u32, u32> =
        postlist::read_postlist(table, term)?.into_iter().collect();
    for (&did, change) in deltas {
        match change {
            Some(wdf) => {
                merged.insert(did, *wdf);
            }
            None => {
                merged.remove(&did);
            }
        }
    }
    let postings: Vec<(u32, u32)> = merged.into_iter().collect();
    let collection_freq: u64 = postings.iter().map(|(_, wdf)| *wdf as u64).sum();
    postlist::set_postlist(table, term, &postings, collection_freq)
}

