//! Per-document termlists with prefix compression.
//!
//! The tag starts `uint(doc_length) uint(num_terms)`, then one entry per
//! term in sorted order. Every entry after the first begins with a reuse
//! byte giving the length of prefix shared with the previous term; when
//! `(wdf + 1) * (prev_len + 1) + reuse` fits a byte the wdf rides along
//! in it (signalled by the byte exceeding `prev_len`) and the trailing
//! `uint(wdf)` is dropped. Then one byte of suffix length and the suffix
//! bytes.

use crate::btree::Table;
use crate::error::{NautexError, Result};
use crate::pack::{pack_uint, pack_uint_preserving_sort, unpack_uint};

/// Terms longer than this cannot be encoded (the suffix length is a byte,
/// and table keys embedding terms have their own cap).
pub const MAX_TERM_LEN: usize = 245;

pub fn termlist_key(did: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did as u64);
    key
}

/// Encode a termlist. `entries` must be sorted by term and free of
/// duplicates; wdfs may be zero (a term can index without contributing
/// length).
pub fn encode_termlist(doclen: u64, entries: &[(Vec<u8>, u32)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pack_uint(&mut out, doclen);
    pack_uint(&mut out, entries.len() as u64);
    let mut prev: &[u8] = b"";
    for (i, (term, wdf)) in entries.iter().enumerate() {
        if term.is_empty() {
            return Err(NautexError::InvalidArgument("empty term in termlist".into()));
        }
        if term.len() > MAX_TERM_LEN {
            return Err(NautexError::InvalidArgument(format!(
                "term of {} bytes exceeds the {} byte limit",
                term.len(),
                MAX_TERM_LEN
            )));
        }
        if i > 0 && term.as_slice() <= prev {
            return Err(NautexError::InvalidArgument(
                "termlist entries not sorted".into(),
            ));
        }
        let mut wdf_packed = false;
        if i > 0 {
            let reuse = common_prefix_len(prev, term);
            let divisor = prev.len() + 1;
            let packed = (*wdf as usize + 1)
                .checked_mul(divisor)
                .map(|v| v + reuse);
            match packed {
                Some(byte) if byte <= 255 => {
                    out.push(byte as u8);
                    wdf_packed = true;
                    out.push((term.len() - reuse) as u8);
                    out.extend_from_slice(&term[reuse..]);
                }
                _ => {
                    out.push(reuse as u8);
                    out.push((term.len() - reuse) as u8);
                    out.extend_from_slice(&term[reuse..]);
                }
            }
        } else {
            out.push(term.len() as u8);
            out.extend_from_slice(term);
        }
        if !wdf_packed {
            pack_uint(&mut out, *wdf as u64);
        }
        prev = term;
    }
    Ok(out)
}

pub fn set_termlist(
    table: &mut Table,
    did: u32,
    doclen: u64,
    entries: &[(Vec<u8>, u32)],
) -> Result<()> {
    let tag = encode_termlist(doclen, entries)?;
    table.add(&termlist_key(did), &tag)
}

pub fn remove_termlist(table: &mut Table, did: u32) -> Result<bool> {
    table.del(&termlist_key(did))
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Lazy decoder over one document's termlist.
pub struct TermListIterator {
    data: Vec<u8>,
    pos: usize,
    doclen: u64,
    size: u64,
    remaining: u64,
    current_term: Vec<u8>,
    current_wdf: u32,
    started: bool,
    finished: bool,
}

impl TermListIterator {
    /// Open the document's termlist; `None` when the document has none.
    pub fn open(table: &Table, did: u32) -> Result<Option<TermListIterator>> {
        match table.get_exact(&termlist_key(did))? {
            None => Ok(None),
            Some(data) => Ok(Some(Self::from_tag(data)?)),
        }
    }

    pub fn from_tag(data: Vec<u8>) -> Result<TermListIterator> {
        let mut pos = 0;
        let (doclen, size) = if data.is_empty() {
            (0, 0)
        } else {
            let doclen = unpack_uint(&data, &mut pos)?;
            let size = unpack_uint(&data, &mut pos)?;
            (doclen, size)
        };
        Ok(TermListIterator {
            data,
            pos,
            doclen,
            size,
            remaining: size,
            current_term: Vec::new(),
            current_wdf: 0,
            started: false,
            finished: false,
        })
    }

    pub fn doc_length(&self) -> u64 {
        self.doclen
    }

    /// Number of distinct terms in the list.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn at_end(&self) -> bool {
        self.finished
    }

    pub fn term(&self) -> &[u8] {
        debug_assert!(self.started && !self.at_end());
        &self.current_term
    }

    pub fn wdf(&self) -> u32 {
        debug_assert!(self.started && !self.at_end());
        self.current_wdf
    }

    pub fn next(&mut self) -> Result<()> {
        self.started = true;
        if self.remaining == 0 {
            self.finished = true;
            return Ok(());
        }
        self.remaining -= 1;
        self.read_entry()
    }

    fn read_entry(&mut self) -> Result<()> {
        let mut wdf_in_reuse = false;
        if !self.current_term.is_empty() {
            let byte = self.take_byte()? as usize;
            let mut reuse = byte;
            if byte > self.current_term.len() {
                // wdf packed into the reuse byte.
                wdf_in_reuse = true;
                let divisor = self.current_term.len() + 1;
                self.current_wdf = (byte / divisor - 1) as u32;
                reuse = byte % divisor;
            }
            self.current_term.truncate(reuse);
        }
        let append_len = self.take_byte()? as usize;
        if self.pos + append_len > self.data.len() {
            return Err(NautexError::corrupt("termlist suffix overruns tag"));
        }
        self.current_term
            .extend_from_slice(&self.data[self.pos..self.pos + append_len]);
        self.pos += append_len;
        if !wdf_in_reuse {
            self.current_wdf = unpack_uint(&self.data, &mut self.pos)? as u32;
        }
        Ok(())
    }

    fn take_byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| NautexError::corrupt("termlist truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Drain the remainder into a vector (mainly for the flush path).
    pub fn collect_entries(mut self) -> Result<Vec<(Vec<u8>, u32)>> {
        let mut out = Vec::new();
        self.next()?;
        while !self.at_end() {
            out.push((self.current_term.clone(), self.current_wdf));
            self.next()?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::TableConfig;
    use tempfile::TempDir;

    fn roundtrip(doclen: u64, entries: &[(&str, u32)]) {
        let owned: Vec<(Vec<u8>, u32)> = entries
            .iter()
            .map(|(t, w)| (t.as_bytes().to_vec(), *w))
            .collect();
        let tag = encode_termlist(doclen, &owned).unwrap();
        let it = TermListIterator::from_tag(tag).unwrap();
        assert_eq!(it.doc_length(), doclen);
        assert_eq!(it.size(), owned.len() as u64);
        assert_eq!(it.collect_entries().unwrap(), owned);
    }

    #[test]
    fn test_roundtrip_plain() {
        roundtrip(4, &[("brown", 1), ("fox", 1), ("quick", 1), ("the", 1)]);
    }

    #[test]
    fn test_roundtrip_shared_prefixes() {
        roundtrip(
            12,
            &[
                ("inter", 2),
                ("interpolate", 1),
                ("interpolation", 3),
                ("interval", 6),
            ],
        );
    }

    #[test]
    fn test_roundtrip_wdf_in_reuse_byte() {
        // Short previous term and tiny wdf: the packed-byte path.
        let owned = vec![(b"ab".to_vec(), 1), (b"abc".to_vec(), 2)];
        let tag = encode_termlist(3, &owned).unwrap();
        let it = TermListIterator::from_tag(tag.clone()).unwrap();
        assert_eq!(it.collect_entries().unwrap(), owned);
        // Entry two is [packed byte][suffix_len][suffix] with no wdf varint:
        // (2+1)*(2+1)+2 = 11, then 1, then b'c'.
        assert_eq!(&tag[tag.len() - 3..], &[11, 1, b'c']);
    }

    #[test]
    fn test_roundtrip_large_wdf_falls_back() {
        roundtrip(1000, &[("a", 100), ("ab", 100_000), ("b", 0)]);
    }

    #[test]
    fn test_roundtrip_prefixed_field_terms() {
        roundtrip(
            7,
            &[
                ("Ssubject", 1),
                ("XFOObar", 2),
                ("XFOObaz", 1),
                ("Zstem", 1),
                ("plain", 2),
            ],
        );
    }

    #[test]
    fn test_empty_list() {
        roundtrip(0, &[]);
    }

    #[test]
    fn test_rejects_unsorted_and_oversized() {
        assert!(encode_termlist(1, &[(b"b".to_vec(), 1), (b"a".to_vec(), 1)]).is_err());
        assert!(encode_termlist(1, &[(vec![b'x'; MAX_TERM_LEN + 1], 1)]).is_err());
        assert!(encode_termlist(1, &[(Vec::new(), 1)]).is_err());
    }

    #[test]
    fn test_store_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut t = Table::create(
            &dir.path().join("termlist"),
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap();
        let entries = vec![(b"dog".to_vec(), 1), (b"lazy".to_vec(), 1), (b"the".to_vec(), 1)];
        set_termlist(&mut t, 2, 3, &entries).unwrap();
        let it = TermListIterator::open(&t, 2).unwrap().unwrap();
        assert_eq!(it.doc_length(), 3);
        assert_eq!(it.collect_entries().unwrap(), entries);
        assert!(TermListIterator::open(&t, 9).unwrap().is_none());
        assert!(remove_termlist(&mut t, 2).unwrap());
        assert!(TermListIterator::open(&t, 2).unwrap().is_none());
    }
}
