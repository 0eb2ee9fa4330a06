//! Read-only database handle pinned to one revision.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::document::Document;
use super::version;
use crate::btree::Table;
use crate::error::{NautexError, Result};
use crate::store::{position, postlist, record, spelling, synonym, termlist, values};

/// The seven tables of a database directory.
pub(crate) struct TableSet {
    pub postlist: Table,
    pub record: Table,
    pub termlist: Table,
    pub position: Table,
    pub value: Table,
    pub spelling: Table,
    pub synonym: Table,
}

pub(crate) const TABLE_NAMES: [&str; 7] = [
    "postlist", "record", "termlist", "position", "value", "spelling", "synonym",
];

/// Open every table read-only at one consistent revision.
///
/// A crash mid-commit can leave some tables one revision ahead; every
/// table keeps its previous base, so the set is opened at the lowest
/// newest-revision, which all of them can still serve.
pub(crate) fn open_tables_readonly(dir: &Path) -> Result<(TableSet, u64)> {
    let mut tables = Vec::with_capacity(TABLE_NAMES.len());
    for name in TABLE_NAMES {
        tables.push(Table::open_readonly(&dir.join(name), None)?);
    }
    let revision = tables.iter().map(Table::revision).min().unwrap_or(1);
    for (table, name) in tables.iter_mut().zip(TABLE_NAMES) {
        if table.revision() != revision {
            debug!(table = name, pinned = revision, "re-pinning table behind the set");
            *table = Table::open_readonly(&dir.join(name), Some(revision))?;
        }
    }
    Ok((TableSet::from_vec(tables), revision))
}

impl TableSet {
    /// Build from tables opened in `TABLE_NAMES` order.
    pub(crate) fn from_vec(tables: Vec<Table>) -> TableSet {
        debug_assert_eq!(tables.len(), TABLE_NAMES.len());
        let mut it = tables.into_iter();
        let mut take = || it.next().expect("one table per TABLE_NAMES entry");
        TableSet {
            postlist: take(),
            record: take(),
            termlist: take(),
            position: take(),
            value: take(),
            spelling: take(),
            synonym: take(),
        }
    }
}

struct Inner {
    tables: TableSet,
    revision: u64,
    uuid: [u8; 16],
    doc_count: u32,
    last_docid: u32,
    total_doclen: u64,
}

/// A reader: a snapshot of the database at the revision current when it
/// was opened (or last reopened).
pub struct Database {
    path: PathBuf,
    inner: Option<Inner>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        version::check_marker(&path)?;
        let inner = Self::load(&path)?;
        Ok(Database {
            path,
            inner: Some(inner),
        })
    }

    fn load(path: &Path) -> Result<Inner> {
        let (tables, revision) = open_tables_readonly(path)?;
        let uuid = version::read_uuid(path)?;
        let (last_docid, total_doclen) = postlist::read_meta(&tables.postlist)?;
        let doc_count = postlist::term_stats(&tables.postlist, b"")?
            .map(|s| s.term_freq)
            .unwrap_or(0);
        Ok(Inner {
            tables,
            revision,
            uuid,
            doc_count,
            last_docid,
            total_doclen,
        })
    }

    fn inner(&self) -> Result<&Inner> {
        self.inner.as_ref().ok_or(NautexError::DatabaseClosed)
    }

    pub(crate) fn tables(&self) -> Result<&TableSet> {
        Ok(&self.inner()?.tables)
    }

    /// Advance to the newest committed revision.
    pub fn reopen(&mut self) -> Result<()> {
        self.inner()?;
        self.inner = Some(Self::load(&self.path)?);
        Ok(())
    }

    /// Release file descriptors; any further use reports `DatabaseClosed`.
    /// Closing twice is harmless.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn revision(&self) -> Result<u64> {
        Ok(self.inner()?.revision)
    }

    pub fn uuid(&self) -> Result<[u8; 16]> {
        Ok(self.inner()?.uuid)
    }

    pub fn doc_count(&self) -> Result<u32> {
        Ok(self.inner()?.doc_count)
    }

    pub fn last_docid(&self) -> Result<u32> {
        Ok(self.inner()?.last_docid)
    }

    pub fn total_length(&self) -> Result<u64> {
        Ok(self.inner()?.total_doclen)
    }

    /// Exact average document length; zero for an empty database.
    pub fn avg_length(&self) -> Result<f64> {
        let inner = self.inner()?;
        if inner.doc_count == 0 {
            return Ok(0.0);
        }
        Ok(inner.total_doclen as f64 / inner.doc_count as f64)
    }

    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(postlist::term_stats(&self.inner()?.tables.postlist, term)?.is_some())
    }

    /// Number of documents containing `term`.
    pub fn term_freq(&self, term: &[u8]) -> Result<u32> {
        Ok(postlist::term_stats(&self.inner()?.tables.postlist, term)?
            .map(|s| s.term_freq)
            .unwrap_or(0))
    }

    /// Total wdf of `term` over the whole collection.
    pub fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        Ok(postlist::term_stats(&self.inner()?.tables.postlist, term)?
            .map(|s| s.collection_freq)
            .unwrap_or(0))
    }

    /// Length of document `did`, from the all-documents list.
    pub fn doc_length(&self, did: u32) -> Result<u64> {
        let tables = self.tables()?;
        if let Some(mut it) = postlist::PostlistIterator::open(&tables.postlist, b"")? {
            it.skip_to(did)?;
            if !it.at_end() && it.docid() == did {
                return Ok(it.wdf() as u64);
            }
        }
        Err(NautexError::DocNotFound(did))
    }

    /// Rebuild a [`Document`] from the stored termlist, record data and
    /// (on demand via [`Database::positions`]) position lists.
    pub fn get_document(&self, did: u32) -> Result<Document> {
        if did == 0 {
            return Err(NautexError::InvalidArgument("docid 0 is not valid".into()));
        }
        let tables = self.tables()?;
        let Some(tl) = termlist::TermListIterator::open(&tables.termlist, did)? else {
            return Err(NautexError::DocNotFound(did));
        };
        let mut doc = Document::new();
        for (term, wdf) in tl.collect_entries()? {
            if wdf == 0 {
                doc.add_boolean_term(&term)?;
            } else {
                doc.add_term(&term, wdf)?;
            }
        }
        if let Some(data) = record::get_record(&tables.record, did)? {
            doc.set_data(data);
        }
        Ok(doc)
    }

    /// The (term, wdf) list of a document.
    pub fn termlist(&self, did: u32) -> Result<Vec<(Vec<u8>, u32)>> {
        let tables = self.tables()?;
        match termlist::TermListIterator::open(&tables.termlist, did)? {
            Some(tl) => tl.collect_entries(),
            None => Err(NautexError::DocNotFound(did)),
        }
    }

    pub fn positions(&self, did: u32, term: &[u8]) -> Result<Vec<u32>> {
        position::read_positions(&self.tables()?.position, did, term)
    }

    pub fn get_value(&self, did: u32, slot: u32) -> Result<Option<Vec<u8>>> {
        values::get_value(&self.tables()?.value, slot, did)
    }

    /// Full posting list of a term (convenience; matching uses the lazy
    /// iterator instead).
    pub fn postings(&self, term: &[u8]) -> Result<Vec<(u32, u32)>> {
        postlist::read_postlist(&self.tables()?.postlist, term)
    }

    /// All terms starting with `prefix`, in sorted order.
    pub fn allterms_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let tables = self.tables()?;
        let mut out = Vec::new();
        let mut it = postlist::AllTermsIterator::new(&tables.postlist, prefix)?;
        it.next()?;
        while !it.at_end() {
            if let Some((term, _)) = it.current() {
                out.push(term.to_vec());
            }
            it.next()?;
        }
        Ok(out)
    }

    pub fn get_metadata(&self, name: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tables()?
            .postlist
            .get_exact(&postlist::user_metadata_key(name))
    }

    pub fn get_spelling_suggestion(&self, word: &[u8]) -> Result<Option<Vec<u8>>> {
        spelling::suggest(
            &self.tables()?.spelling,
            word,
            spelling::MAX_EDIT_DISTANCE,
        )
    }

    pub fn synonyms(&self, term: &[u8]) -> Result<Vec<Vec<u8>>> {
        synonym::get_synonyms(&self.tables()?.synonym, term)
    }

    /// Terms with synonyms, starting with `prefix`.
    pub fn synonym_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let tables = self.tables()?;
        let mut out = Vec::new();
        let mut it = synonym::SynonymKeysIterator::new(&tables.synonym, prefix)?;
        it.next()?;
        while !it.at_end() {
            if let Some(term) = it.term() {
                out.push(term.to_vec());
            }
            it.next()?;
        }
        Ok(out)
    }
}
