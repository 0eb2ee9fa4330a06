//! Chunked posting lists.
//!
//! Each term's postings are spread over one *initial* entry and any
//! number of *continuation* entries:
//!
//! ```text
//! initial key:      sortable(term)
//! initial tag:      uint(term_freq) uint(collection_freq)
//!                   uint(first_did - 1) flag_byte chunk_body
//! continuation key: sortable(term) sortable_uint(first_did)
//! continuation tag: flag_byte chunk_body
//! ```
//!
//! The flag byte is `b'0'` when further chunks follow and `b'1'` on the
//! final chunk. Within a chunk the first posting's docid is the chunk's
//! `first_did` and only its wdf is encoded; later postings encode
//! `uint(did_delta - 1) uint(wdf)`.
//!
//! The all-documents list is the empty term's list, with wdf carrying the
//! document length. The single-byte key `\x00` holds the global meta tag
//! `uint(last_docid) uint_last(total_doclen)`, and keys beginning
//! `\x00\xc0` hold user metadata.

use crate::btree::{Cursor, Table};
use crate::error::{NautexError, Result};
use crate::pack::{
    pack_string_preserving_sort, pack_uint, pack_uint_last, pack_uint_preserving_sort,
    unpack_string_preserving_sort, unpack_uint, unpack_uint_last, unpack_uint_preserving_sort,
};

/// Key of the global metadata entry.
pub const META_KEY: &[u8] = b"\x00";

/// Prefix namespacing user metadata keys.
pub const USER_META_PREFIX: &[u8] = b"\x00\xc0";

const CHUNK_MORE: u8 = b'0';
const CHUNK_LAST: u8 = b'1';

/// Soft cap on an encoded chunk body; chunks split past this size.
const MAX_CHUNK_BYTES: usize = 2000;

pub fn initial_key(term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    pack_string_preserving_sort(&mut key, term);
    key
}

pub fn continuation_key(term: &[u8], first_did: u32) -> Vec<u8> {
    let mut key = initial_key(term);
    pack_uint_preserving_sort(&mut key, first_did as u64);
    key
}

pub fn user_metadata_key(name: &[u8]) -> Vec<u8> {
    let mut key = USER_META_PREFIX.to_vec();
    key.extend_from_slice(name);
    key
}

/// Write the global meta entry.
pub fn write_meta(table: &mut Table, last_docid: u32, total_doclen: u64) -> Result<()> {
    let mut tag = Vec::new();
    pack_uint(&mut tag, last_docid as u64);
    pack_uint_last(&mut tag, total_doclen);
    table.add(META_KEY, &tag)
}

/// Read the global meta entry; a fresh table reports zeroes.
pub fn read_meta(table: &Table) -> Result<(u32, u64)> {
    match table.get_exact(META_KEY)? {
        None => Ok((0, 0)),
        Some(tag) => {
            let mut pos = 0;
            let last_docid = unpack_uint(&tag, &mut pos)?;
            let total_doclen = unpack_uint_last(&tag, &mut pos)?;
            Ok((last_docid as u32, total_doclen))
        }
    }
}

/// Summary statistics held in a term's initial chunk header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TermStats {
    pub term_freq: u32,
    pub collection_freq: u64,
}

/// Read a term's statistics without touching its chunk bodies.
pub fn term_stats(table: &Table, term: &[u8]) -> Result<Option<TermStats>> {
    match table.get_exact(&initial_key(term))? {
        None => Ok(None),
        Some(tag) => {
            let mut pos = 0;
            let term_freq = unpack_uint(&tag, &mut pos)? as u32;
            let collection_freq = unpack_uint(&tag, &mut pos)?;
            Ok(Some(TermStats {
                term_freq,
                collection_freq,
            }))
        }
    }
}

/// Replace a term's whole posting list.
///
/// `postings` must be sorted by docid with every wdf meaningful for the
/// term (for the all-docs list the wdf slot carries the doc length). An
/// empty slice removes the term entirely.
pub fn set_postlist(
    table: &mut Table,
    term: &[u8],
    postings: &[(u32, u32)],
    collection_freq: u64,
) -> Result<()> {
    set_postlist_chunked(table, term, postings, collection_freq, MAX_CHUNK_BYTES)
}

/// As [`set_postlist`] with an explicit chunk-size cap; the compactor
/// uses a larger cap for maximally dense output.
pub fn set_postlist_chunked(
    table: &mut Table,
    term: &[u8],
    postings: &[(u32, u32)],
    collection_freq: u64,
    chunk_cap: usize,
) -> Result<()> {
    remove_postlist(table, term)?;
    if postings.is_empty() {
        return Ok(());
    }
    if postings[0].0 == 0 {
        return Err(NautexError::InvalidArgument(
            "docid 0 is not valid in a posting list".into(),
        ));
    }

    // Cut the list into chunk bodies first so the final chunk is known.
    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut body = Vec::new();
    let mut chunk_first = postings[0].0;
    let mut prev_did = postings[0].0;
    for (i, &(did, wdf)) in postings.iter().enumerate() {
        if i > 0 && did <= prev_did {
            return Err(NautexError::InvalidArgument(
                "postings not in strictly ascending docid order".into(),
            ));
        }
        if body.len() >= chunk_cap {
            chunks.push((chunk_first, std::mem::take(&mut body)));
            chunk_first = did;
        }
        if body.is_empty() {
            // First posting of a chunk: docid is implicit.
            pack_uint(&mut body, wdf as u64);
        } else {
            pack_uint(&mut body, (did - prev_did - 1) as u64);
            pack_uint(&mut body, wdf as u64);
        }
        prev_did = did;
    }
    chunks.push((chunk_first, body));

    let term_freq = postings.len() as u32;
    let last_index = chunks.len() - 1;
    for (i, (first_did, body)) in chunks.into_iter().enumerate() {
        let flag = if i == last_index { CHUNK_LAST } else { CHUNK_MORE };
        if i == 0 {
            let mut tag = Vec::new();
            pack_uint(&mut tag, term_freq as u64);
            pack_uint(&mut tag, collection_freq);
            pack_uint(&mut tag, (first_did - 1) as u64);
            tag.push(flag);
            tag.extend_from_slice(&body);
            table.add(&initial_key(term), &tag)?;
        } else {
            let mut tag = Vec::with_capacity(body.len() + 1);
            tag.push(flag);
            tag.extend_from_slice(&body);
            table.add(&continuation_key(term, first_did), &tag)?;
        }
    }
    Ok(())
}

/// Remove every chunk of a term's posting list.
pub fn remove_postlist(table: &mut Table, term: &[u8]) -> Result<()> {
    let prefix = initial_key(term);
    let mut keys = Vec::new();
    {
        let mut cursor = table.cursor();
        cursor.find_entry_ge(&prefix)?;
        while !cursor.after_end() {
            match cursor.current_key() {
                Some(key) if key.starts_with(&prefix) => keys.push(key.to_vec()),
                _ => break,
            }
            cursor.next()?;
        }
    }
    for key in keys {
        table.del(&key)?;
    }
    Ok(())
}

/// Collect a term's full posting list. Convenience for the flush path and
/// tests; query evaluation uses [`PostlistIterator`] instead.
pub fn read_postlist(table: &Table, term: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut out = Vec::new();
    if let Some(mut it) = PostlistIterator::open(table, term)? {
        it.next()?;
        while !it.at_end() {
            out.push((it.docid(), it.wdf()));
            it.next()?;
        }
    }
    Ok(out)
}

struct Chunk {
    first_did: u32,
    body: Vec<u8>,
    is_last: bool,
}

/// Lazy decoder over one term's chunks.
///
/// Call `next` (or `skip_to`) before the first read; the iterator is not
/// restartable, open a fresh one to rewind.
pub struct PostlistIterator<'a> {
    cursor: Cursor<'a>,
    prefix: Vec<u8>,
    stats: TermStats,
    chunk: Chunk,
    pos: usize,
    did: u32,
    wdf: u32,
    started: bool,
    at_end: bool,
}

impl<'a> PostlistIterator<'a> {
    /// Open the iterator, or report `None` for a term with no postings.
    pub fn open(table: &'a Table, term: &[u8]) -> Result<Option<PostlistIterator<'a>>> {
        let prefix = initial_key(term);
        let mut cursor = table.cursor();
        if !cursor.find_entry_ge(&prefix)? {
            return Ok(None);
        }
        let tag = cursor.read_tag()?;
        let mut pos = 0;
        let term_freq = unpack_uint(&tag, &mut pos)? as u32;
        let collection_freq = unpack_uint(&tag, &mut pos)?;
        let first_did = unpack_uint(&tag, &mut pos)? as u32 + 1;
        let (is_last, body) = split_flag_body(&tag[pos..])?;
        Ok(Some(PostlistIterator {
            cursor,
            prefix,
            stats: TermStats {
                term_freq,
                collection_freq,
            },
            chunk: Chunk {
                first_did,
                body,
                is_last,
            },
            pos: 0,
            did: 0,
            wdf: 0,
            started: false,
            at_end: false,
        }))
    }

    pub fn term_freq(&self) -> u32 {
        self.stats.term_freq
    }

    pub fn collection_freq(&self) -> u64 {
        self.stats.collection_freq
    }

    pub fn at_end(&self) -> bool {
        self.at_end
    }

    /// Current docid; only valid after the first `next`/`skip_to`.
    pub fn docid(&self) -> u32 {
        debug_assert!(self.started && !self.at_end);
        self.did
    }

    pub fn wdf(&self) -> u32 {
        debug_assert!(self.started && !self.at_end);
        self.wdf
    }

    /// Advance to the next posting.
    pub fn next(&mut self) -> Result<()> {
        if self.at_end {
            return Ok(());
        }
        if self.pos >= self.chunk.body.len() {
            if !self.load_next_chunk()? {
                return Ok(());
            }
        }
        if !self.started || self.pos == 0 {
            // Head of a chunk: implicit docid.
            self.did = self.chunk.first_did;
            self.wdf = unpack_uint(&self.chunk.body, &mut self.pos)? as u32;
            self.started = true;
            return Ok(());
        }
        let delta = unpack_uint(&self.chunk.body, &mut self.pos)? as u32;
        self.did = self
            .did
            .checked_add(delta + 1)
            .ok_or_else(|| NautexError::corrupt("docid delta overflow in chunk"))?;
        self.wdf = unpack_uint(&self.chunk.body, &mut self.pos)? as u32;
        Ok(())
    }

    /// Advance to the first posting with docid >= `target`.
    pub fn skip_to(&mut self, target: u32) -> Result<()> {
        if self.at_end {
            return Ok(());
        }
        if self.started && self.did >= target {
            return Ok(());
        }
        // Jump chunks via the key space when the target lies beyond this one.
        if target > self.chunk.first_did && self.chunk_might_end_before(target) {
            if !self.seek_chunk_containing(target)? {
                return Ok(());
            }
        }
        loop {
            self.next()?;
            if self.at_end || self.did >= target {
                return Ok(());
            }
        }
    }

    fn chunk_might_end_before(&self, _target: u32) -> bool {
        // Continuation keys are cheap to probe, so always try the seek
        // unless this is already the final chunk.
        !self.chunk.is_last
    }

    /// Re-seat the cursor on the chunk whose range contains `target`.
    fn seek_chunk_containing(&mut self, target: u32) -> Result<bool> {
        let mut key = self.prefix.clone();
        pack_uint_preserving_sort(&mut key, target as u64);
        let exact = self.cursor.find_entry_ge(&key)?;
        if !exact {
            // Between chunk heads: the covering chunk starts earlier.
            self.cursor.prev()?;
        }
        let Some(current) = self.cursor.current_key() else {
            self.at_end = true;
            return Ok(false);
        };
        if !current.starts_with(&self.prefix) {
            self.at_end = true;
            return Ok(false);
        }
        let current = current.to_vec();
        self.load_chunk_at_key(&current)?;
        Ok(true)
    }

    fn load_chunk_at_key(&mut self, key: &[u8]) -> Result<()> {
        let tag = self.cursor.read_tag()?;
        if key == self.prefix.as_slice() {
            // Back on the initial chunk.
            let mut pos = 0;
            let _tf = unpack_uint(&tag, &mut pos)?;
            let _cf = unpack_uint(&tag, &mut pos)?;
            let first_did = unpack_uint(&tag, &mut pos)? as u32 + 1;
            let (is_last, body) = split_flag_body(&tag[pos..])?;
            self.chunk = Chunk {
                first_did,
                body,
                is_last,
            };
        } else {
            let mut pos = self.prefix.len();
            let first_did = unpack_uint_preserving_sort(key, &mut pos)? as u32;
            if pos != key.len() {
                return Err(NautexError::corrupt("trailing bytes in continuation key"));
            }
            let (is_last, body) = split_flag_body(&tag)?;
            self.chunk = Chunk {
                first_did,
                body,
                is_last,
            };
        }
        self.pos = 0;
        Ok(())
    }

    fn load_next_chunk(&mut self) -> Result<bool> {
        if self.chunk.is_last {
            self.at_end = true;
            return Ok(false);
        }
        self.cursor.next()?;
        let Some(key) = self.cursor.current_key() else {
            return Err(NautexError::corrupt("posting list missing continuation"));
        };
        if !key.starts_with(&self.prefix) {
            return Err(NautexError::corrupt("posting list missing continuation"));
        }
        let key = key.to_vec();
        self.load_chunk_at_key(&key)?;
        Ok(true)
    }
}

fn split_flag_body(rest: &[u8]) -> Result<(bool, Vec<u8>)> {
    match rest.first() {
        Some(&CHUNK_LAST) => Ok((true, rest[1..].to_vec())),
        Some(&CHUNK_MORE) => Ok((false, rest[1..].to_vec())),
        _ => Err(NautexError::corrupt("bad chunk flag byte")),
    }
}

/// Iterate the terms of the database in sorted order, optionally only
/// those starting with `term_prefix`. Yields each term with its stats.
pub struct AllTermsIterator<'a> {
    cursor: Cursor<'a>,
    term_prefix: Vec<u8>,
    current: Option<(Vec<u8>, TermStats)>,
    advanced_once: bool,
    done: bool,
}

impl<'a> AllTermsIterator<'a> {
    pub fn new(table: &'a Table, term_prefix: &[u8]) -> Result<AllTermsIterator<'a>> {
        let mut cursor = table.cursor();
        // Escaped encodings are prefix-compatible, so every term starting
        // with `term_prefix` encodes to a key starting with its escaped
        // (unterminated) form.
        let mut start = Vec::new();
        pack_string_preserving_sort(&mut start, term_prefix);
        start.truncate(start.len() - 2);
        cursor.find_entry_ge(&start)?;
        Ok(AllTermsIterator {
            cursor,
            term_prefix: term_prefix.to_vec(),
            current: None,
            advanced_once: false,
            done: false,
        })
    }

    pub fn at_end(&self) -> bool {
        self.done
    }

    pub fn current(&self) -> Option<(&[u8], TermStats)> {
        self.current.as_ref().map(|(t, s)| (t.as_slice(), *s))
    }

    pub fn next(&mut self) -> Result<()> {
        loop {
            if self.advanced_once {
                self.cursor.next()?;
            } else {
                // The constructor already positioned the cursor on the
                // first candidate entry.
                self.advanced_once = true;
            }
            if self.cursor.after_end() {
                self.current = None;
                self.done = true;
                return Ok(());
            }
            let key = match self.cursor.current_key() {
                Some(k) => k.to_vec(),
                None => {
                    self.current = None;
                    self.done = true;
                    return Ok(());
                }
            };
            if key == META_KEY || key.starts_with(USER_META_PREFIX) {
                continue;
            }
            let mut pos = 0;
            let term = unpack_string_preserving_sort(&key, &mut pos)?;
            if pos != key.len() || term.is_empty() {
                // Continuation chunk, or the all-documents list.
                continue;
            }
            if !term.starts_with(&self.term_prefix) {
                self.current = None;
                self.done = true;
                return Ok(());
            }
            let tag = self.cursor.read_tag()?;
            let mut tpos = 0;
            let stats = TermStats {
                term_freq: unpack_uint(&tag, &mut tpos)? as u32,
                collection_freq: unpack_uint(&tag, &mut tpos)?,
            };
            self.current = Some((term, stats));
            return Ok(());
        }
    }
}
