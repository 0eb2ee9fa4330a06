//! Compaction: merge one or more databases into a fresh, dense one.
//!
//! Per table the merge is one of:
//!
//! - postlist: an N-way merge keyed by term; same-term postings from
//!   different sources concatenate in docid order (sources are offset or
//!   checked disjoint first) and the header statistics are re-summed.
//! - spelling: word frequencies sum, trigram word lists union.
//! - synonym: expansion lists union, deduplicated.
//! - termlist / record / position / value: docid-keyed direct copy, keys
//!   rewritten by each source's offset, tags moved raw (still
//!   compressed).
//!
//! The destination is created from scratch, so it gets a fresh UUID and
//! marker file; its revision history starts over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::btree::Table;
use crate::db::{Database, DatabaseSettings, WritableDatabase};
use crate::error::{NautexError, Result};
use crate::pack::{pack_uint_preserving_sort, unpack_uint_preserving_sort};
use crate::store::values::doc_slots_key;
use crate::store::{postlist, spelling, synonym};

/// How densely the output is packed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CompactionLevel {
    /// Copy without extra packing effort.
    Standard,
    /// Re-chunk posting lists densely (the default).
    Full,
    /// Maximal density; not recommended if the output will be updated
    /// in place afterwards.
    Fuller,
}

/// Options for a compaction run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CompactOptions {
    /// Output block size (2 KiB to 64 KiB, power of two).
    pub block_size: u32,
    pub level: CompactionLevel,
    /// Merge the postlists in multiple passes when there are more than
    /// three sources.
    pub multipass: bool,
    /// Renumber docids contiguously; turn off to preserve docids, which
    /// requires the sources to use disjoint ranges.
    pub renumber: bool,
}

impl Default for CompactOptions {
    fn default() -> Self {
        CompactOptions {
            block_size: 8192,
            level: CompactionLevel::Full,
            multipass: false,
            renumber: true,
        }
    }
}

impl CompactOptions {
    fn chunk_cap(&self) -> usize {
        match self.level {
            CompactionLevel::Standard | CompactionLevel::Full => 2000,
            CompactionLevel::Fuller => 4000,
        }
    }
}

/// Merges several source databases into one destination directory.
pub struct Compactor {
    options: CompactOptions,
}

impl Compactor {
    pub fn new(options: CompactOptions) -> Compactor {
        Compactor { options }
    }

    /// Run the compaction. Sources must be distinct from the
    /// destination; the destination must not already hold a database.
    pub fn compact(&self, source_paths: &[PathBuf], dest: &Path) -> Result<()> {
        if source_paths.is_empty() {
            return Err(NautexError::InvalidArgument(
                "no source databases given".into(),
            ));
        }
        for src in source_paths {
            if src == dest {
                return Err(NautexError::InvalidArgument(
                    "destination may not be the same as any source database".into(),
                ));
            }
        }

        let mut sources = Vec::with_capacity(source_paths.len());
        for path in source_paths {
            sources.push(Database::open(path)?);
        }

        // Establish docid offsets (or check ranges are disjoint).
        let mut order: Vec<usize> = (0..sources.len()).collect();
        let mut offsets = vec![0u32; sources.len()];
        if self.options.renumber {
            let mut total = 0u32;
            for (i, src) in sources.iter().enumerate() {
                offsets[i] = total;
                total = total
                    .checked_add(src.last_docid()?)
                    .ok_or_else(|| NautexError::Range("merged docids overflow".into()))?;
            }
        } else {
            let mut ranges = Vec::with_capacity(sources.len());
            for src in sources.iter() {
                ranges.push(used_range(src)?);
            }
            order.sort_by_key(|&i| ranges[i].0);
            for pair in order.windows(2) {
                let (_, prev_last) = ranges[pair[0]];
                let (next_first, _) = ranges[pair[1]];
                if next_first != 0 && prev_last >= next_first {
                    return Err(NautexError::InvalidOperation(
                        "preserving docids requires sources with disjoint docid ranges".into(),
                    ));
                }
            }
        }
        let ordered: Vec<(&Database, u32)> =
            order.iter().map(|&i| (&sources[i], offsets[i])).collect();

        if self.options.multipass && sources.len() > 3 {
            return self.multipass_merge(&ordered, dest);
        }
        self.merge(&ordered, dest)
    }

    /// Halve the input set per pass, writing intermediate databases next
    /// to the destination.
    fn multipass_merge(&self, sources: &[(&Database, u32)], dest: &Path) -> Result<()> {
        info!(inputs = sources.len(), "multipass merge");
        let mid = sources.len() / 2;
        let tmp_a = tmp_path(dest, "a");
        let tmp_b = tmp_path(dest, "b");
        let _ = std::fs::remove_dir_all(&tmp_a);
        let _ = std::fs::remove_dir_all(&tmp_b);

        let result = (|| {
            self.merge(&sources[..mid], &tmp_a)?;
            self.merge(&sources[mid..], &tmp_b)?;
            let a = Database::open(&tmp_a)?;
            let b = Database::open(&tmp_b)?;
            // Offsets were applied in the first pass.
            self.merge(&[(&a, 0), (&b, 0)], dest)
        })();
        let _ = std::fs::remove_dir_all(&tmp_a);
        let _ = std::fs::remove_dir_all(&tmp_b);
        result
    }

    /// One merge pass into a fresh destination.
    fn merge(&self, sources: &[(&Database, u32)], dest: &Path) -> Result<()> {
        let mut out = WritableDatabase::create(
            dest,
            DatabaseSettings {
                block_size: self.options.block_size,
                compress_records: true,
            },
        )?;

        let mut last_docid = 0u32;
        let mut total_doclen = 0u64;
        let mut doc_count = 0u32;
        for (src, offset) in sources {
            last_docid = last_docid.max(src.last_docid()?.saturating_add(*offset));
            total_doclen += src.total_length()?;
            doc_count += src.doc_count()?;
        }

        self.merge_postlists(sources, &mut out)?;
        self.merge_docid_keyed(sources, &mut out)?;
        self.merge_spelling(sources, &mut out)?;
        self.merge_synonyms(sources, &mut out)?;

        out.set_doc_stats(last_docid, doc_count, total_doclen)?;
        out.commit()?;
        out.close();
        info!(dest = %dest.display(), docs = doc_count, "compaction pass complete");
        Ok(())
    }

    fn merge_postlists(
        &self,
        sources: &[(&Database, u32)],
        out: &mut WritableDatabase,
    ) -> Result<()> {
        // Gather the merged term space first (sources are immutable, the
        // term dictionary is typically far smaller than the postings).
        let mut terms: BTreeMap<Vec<u8>, ()> = BTreeMap::new();
        for (src, _) in sources {
            for term in src.allterms_with_prefix(b"")? {
                terms.insert(term, ());
            }
        }

        let chunk_cap = self.options.chunk_cap();
        for (term, _) in terms {
            let mut postings: Vec<(u32, u32)> = Vec::new();
            let mut collection_freq = 0u64;
            for (src, offset) in sources {
                collection_freq += src.collection_freq(&term)?;
                for (did, wdf) in src.postings(&term)? {
                    postings.push((did + offset, wdf));
                }
            }
            // Sources are ordered by docid range, so concatenation is
            // already sorted; the header is rewritten with the sums.
            postlist::set_postlist_chunked(
                &mut out.tables_mut()?.postlist,
                &term,
                &postings,
                collection_freq,
                chunk_cap,
            )?;
        }

        // The all-documents list merges the same way.
        let mut alldocs: Vec<(u32, u32)> = Vec::new();
        let mut total_len = 0u64;
        for (src, offset) in sources {
            for (did, len) in src.postings(b"")? {
                alldocs.push((did + offset, len));
                total_len += len as u64;
            }
        }
        postlist::set_postlist_chunked(
            &mut out.tables_mut()?.postlist,
            b"",
            &alldocs,
            total_len,
            chunk_cap,
        )?;

        // User metadata: first writer wins on key collisions.
        for (src, _) in sources {
            let src_tables = src.tables()?;
            let mut cursor = src_tables.postlist.cursor();
            cursor.find_entry_ge(postlist::USER_META_PREFIX)?;
            while !cursor.after_end() {
                let Some(key) = cursor.current_key() else { break };
                if !key.starts_with(postlist::USER_META_PREFIX) {
                    break;
                }
                let key = key.to_vec();
                let (compressed, tag) = cursor.read_tag_raw()?;
                let dest_table = &mut out.tables_mut()?.postlist;
                if dest_table.get_exact(&key)?.is_none() {
                    dest_table.add_raw(&key, compressed, tag)?;
                } else {
                    debug!("duplicate user metadata key; keeping the first");
                }
                cursor.next()?;
            }
        }
        Ok(())
    }

    /// Docid-keyed tables: rewrite the key's docid, move the tag raw.
    fn merge_docid_keyed(
        &self,
        sources: &[(&Database, u32)],
        out: &mut WritableDatabase,
    ) -> Result<()> {
        for (src, offset) in sources {
            let src_tables = src.tables()?;

            copy_rewritten(&src_tables.termlist, *offset, |key, off| {
                rewrite_leading_docid(key, off)
            }, |key, compressed, tag| {
                out.tables_mut()?.termlist.add_raw(key, compressed, tag)
            })?;

            copy_rewritten(&src_tables.record, *offset, |key, off| {
                rewrite_leading_docid(key, off)
            }, |key, compressed, tag| {
                out.tables_mut()?.record.add_raw(key, compressed, tag)
            })?;

            copy_rewritten(&src_tables.position, *offset, |key, off| {
                rewrite_leading_docid(key, off)
            }, |key, compressed, tag| {
                out.tables_mut()?.position.add_raw(key, compressed, tag)
            })?;

            copy_rewritten(&src_tables.value, *offset, rewrite_value_key, |key, compressed, tag| {
                out.tables_mut()?.value.add_raw(key, compressed, tag)
            })?;
        }
        Ok(())
    }

    fn merge_spelling(
        &self,
        sources: &[(&Database, u32)],
        out: &mut WritableDatabase,
    ) -> Result<()> {
        for (src, _) in sources {
            let src_tables = src.tables()?;
            let mut cursor = src_tables.spelling.cursor();
            cursor.next()?;
            while !cursor.after_end() {
                let Some(key) = cursor.current_key() else { break };
                if key.first() == Some(&spelling::WORD_PREFIX) {
                    let word = key[1..].to_vec();
                    let tag = cursor.read_tag()?;
                    let mut pos = 0;
                    let freq = crate::pack::unpack_uint(&tag, &mut pos)?;
                    // add_word sums frequencies and unions the trigram
                    // word lists as it goes.
                    spelling::add_word(&mut out.tables_mut()?.spelling, &word, freq)?;
                }
                cursor.next()?;
            }
        }
        Ok(())
    }

    fn merge_synonyms(
        &self,
        sources: &[(&Database, u32)],
        out: &mut WritableDatabase,
    ) -> Result<()> {
        for (src, _) in sources {
            let src_tables = src.tables()?;
            let mut cursor = src_tables.synonym.cursor();
            cursor.next()?;
            while !cursor.after_end() {
                let Some(term) = cursor.current_key().map(|k| k.to_vec()) else {
                    break;
                };
                let tag = cursor.read_tag()?;
                for syn in synonym::decode_synonyms(&tag)? {
                    synonym::add_synonym(&mut out.tables_mut()?.synonym, &term, &syn)?;
                }
                cursor.next()?;
            }
        }
        Ok(())
    }
}

/// First and last docid a database actually uses (0, 0 when empty).
fn used_range(db: &Database) -> Result<(u32, u32)> {
    let alldocs = db.postings(b"")?;
    match (alldocs.first(), alldocs.last()) {
        (Some(&(first, _)), Some(&(last, _))) => Ok((first, last)),
        _ => Ok((0, 0)),
    }
}

fn tmp_path(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", suffix));
    dest.with_file_name(name)
}

/// Rewrite `sortable_uint(did) · rest` by adding `offset` to the docid.
fn rewrite_leading_docid(key: &[u8], offset: u32) -> Result<Vec<u8>> {
    let mut pos = 0;
    let did = unpack_uint_preserving_sort(key, &mut pos)? as u32;
    let mut out = Vec::with_capacity(key.len() + 1);
    pack_uint_preserving_sort(&mut out, (did + offset) as u64);
    out.extend_from_slice(&key[pos..]);
    Ok(out)
}

/// Value table keys: either a slot entry `sortable(slot) ·
/// sortable(did)` or a doc-slots directory entry `0xff · sortable(did)`.
fn rewrite_value_key(key: &[u8], offset: u32) -> Result<Vec<u8>> {
    if key.first() == Some(&0xff) {
        let mut pos = 1;
        let did = unpack_uint_preserving_sort(key, &mut pos)? as u32;
        return Ok(doc_slots_key(did + offset));
    }
    let mut pos = 0;
    let slot = unpack_uint_preserving_sort(key, &mut pos)?;
    let did = unpack_uint_preserving_sort(key, &mut pos)? as u32;
    let mut out = Vec::with_capacity(key.len() + 1);
    pack_uint_preserving_sort(&mut out, slot);
    pack_uint_preserving_sort(&mut out, (did + offset) as u64);
    Ok(out)
}

/// Walk a whole source table, rewriting keys and forwarding raw tags.
fn copy_rewritten(
    src: &Table,
    offset: u32,
    rewrite: impl Fn(&[u8], u32) -> Result<Vec<u8>>,
    mut write: impl FnMut(&[u8], bool, Vec<u8>) -> Result<()>,
) -> Result<()> {
    let mut cursor = src.cursor();
    cursor.next()?;
    while !cursor.after_end() {
        let Some(key) = cursor.current_key().map(|k| k.to_vec()) else {
            break;
        };
        let new_key = rewrite(&key, offset)?;
        let (compressed, tag) = cursor.read_tag_raw()?;
        write(&new_key, compressed, tag)?;
        cursor.next()?;
    }
    Ok(())
}
