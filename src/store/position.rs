//! Within-document position lists, interpolative-coded.
//!
//! Keyed by `sortable_uint(did) · term`. A single position is stored as a
//! bare `uint(pos)`. Longer lists store `uint(last)` followed by a bit
//! stream: `first` coded against `[0, last]`, then `size - 2` against
//! `[0, last - first]`, then the interior positions by recursive binary
//! midpoint coding against their tightest possible interval. The list
//! length is recoverable from the two header fields alone, without
//! touching the interior.

use crate::btree::Table;
use crate::error::{NautexError, Result};
use crate::pack::{pack_uint, pack_uint_preserving_sort, unpack_uint};

pub fn position_key(did: u32, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 5);
    pack_uint_preserving_sort(&mut key, did as u64);
    key.extend_from_slice(term);
    key
}

/// Store the position list for (did, term); an empty list removes it.
///
/// Positions must be strictly increasing.
pub fn set_positions(table: &mut Table, did: u32, term: &[u8], positions: &[u32]) -> Result<()> {
    if positions.is_empty() {
        remove_positions(table, did, term)?;
        return Ok(());
    }
    for w in positions.windows(2) {
        if w[0] >= w[1] {
            return Err(NautexError::InvalidArgument(
                "positions must be strictly increasing".into(),
            ));
        }
    }
    let key = position_key(did, term);
    if positions.len() == 1 {
        let mut tag = Vec::new();
        pack_uint(&mut tag, positions[0] as u64);
        return table.add(&key, &tag);
    }
    let last = *positions.last().unwrap();
    let first = positions[0];
    let mut header = Vec::new();
    pack_uint(&mut header, last as u64);
    let mut wr = BitWriter::new(header);
    wr.encode(first, last);
    wr.encode(positions.len() as u32 - 2, last - first);
    wr.encode_interpolative(positions, 0, positions.len() - 1);
    table.add(&key, &wr.freeze())
}

pub fn remove_positions(table: &mut Table, did: u32, term: &[u8]) -> Result<()> {
    table.del(&position_key(did, term))?;
    Ok(())
}

/// Decode the full position list; empty when none is stored.
pub fn read_positions(table: &Table, did: u32, term: &[u8]) -> Result<Vec<u32>> {
    let Some(tag) = table.get_exact(&position_key(did, term))? else {
        return Ok(Vec::new());
    };
    decode_positions(&tag)
}

pub fn decode_positions(tag: &[u8]) -> Result<Vec<u32>> {
    let mut pos = 0;
    let last = unpack_uint(tag, &mut pos)? as u32;
    if pos == tag.len() {
        return Ok(vec![last]);
    }
    let mut rd = BitReader::new(tag, pos);
    let first = rd.decode(last)?;
    let size = rd.decode(last - first)? as usize + 2;
    let mut positions = vec![0u32; size];
    positions[0] = first;
    positions[size - 1] = last;
    rd.decode_interpolative(&mut positions, 0, size - 1)?;
    Ok(positions)
}

/// Number of stored positions, read from the header alone.
pub fn position_count(table: &Table, did: u32, term: &[u8]) -> Result<u32> {
    let Some(tag) = table.get_exact(&position_key(did, term))? else {
        return Ok(0);
    };
    let mut pos = 0;
    let last = unpack_uint(&tag, &mut pos)? as u32;
    if pos == tag.len() {
        return Ok(1);
    }
    let mut rd = BitReader::new(&tag, pos);
    let first = rd.decode(last)?;
    Ok(rd.decode(last - first)? + 2)
}

/// An in-memory decoded position list with the iterator surface the
/// matcher's window checks use.
#[derive(Clone, Debug)]
pub struct PositionList {
    positions: Vec<u32>,
    idx: usize,
    started: bool,
}

impl PositionList {
    pub fn new(positions: Vec<u32>) -> PositionList {
        PositionList {
            positions,
            idx: 0,
            started: false,
        }
    }

    pub fn open(table: &Table, did: u32, term: &[u8]) -> Result<PositionList> {
        Ok(PositionList::new(read_positions(table, did, term)?))
    }

    pub fn size(&self) -> usize {
        self.positions.len()
    }

    pub fn at_end(&self) -> bool {
        self.started && self.idx >= self.positions.len()
    }

    pub fn position(&self) -> u32 {
        debug_assert!(self.started && !self.at_end());
        self.positions[self.idx]
    }

    pub fn next(&mut self) {
        if !self.started {
            self.started = true;
        } else if self.idx < self.positions.len() {
            self.idx += 1;
        }
    }

    pub fn skip_to(&mut self, target: u32) {
        if !self.started {
            self.started = true;
        }
        while self.idx < self.positions.len() && self.positions[self.idx] < target {
            self.idx += 1;
        }
    }
}

// ---- bit-level coder ----

/// LSB-first bit packer appending to a byte buffer.
pub struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    pub fn new(header: Vec<u8>) -> BitWriter {
        BitWriter {
            buf: header,
            acc: 0,
            bits: 0,
        }
    }

    fn write_bits(&mut self, value: u32, nbits: u32) {
        debug_assert!(nbits <= 32);
        self.acc |= (value as u64) << self.bits;
        self.bits += nbits;
        while self.bits >= 8 {
            self.buf.push(self.acc as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    /// Write `value` drawn from `[0, outof]` in the fewest whole bits a
    /// truncated binary code allows.
    pub fn encode(&mut self, value: u32, outof: u32) {
        debug_assert!(value <= outof);
        let m = outof as u64 + 1;
        if m == 1 {
            return;
        }
        let k = 63 - m.leading_zeros(); // floor(log2 m)
        let short = (1u64 << (k + 1)) - m; // count of k-bit codewords
        if (value as u64) < short {
            self.write_bits(value, k);
        } else {
            self.write_bits(value + short as u32, k + 1);
        }
    }

    /// Binary midpoint coding of `positions[j+1..k]` given both endpoints.
    pub fn encode_interpolative(&mut self, positions: &[u32], j: usize, k: usize) {
        if k - j < 2 {
            return;
        }
        let mid = (j + k) / 2;
        // positions[mid] lies in [pos[j] + (mid-j), pos[k] - (k-mid)].
        let lo = positions[j] + (mid - j) as u32;
        let hi = positions[k] - (k - mid) as u32;
        self.encode(positions[mid] - lo, hi - lo);
        self.encode_interpolative(positions, j, mid);
        self.encode_interpolative(positions, mid, k);
    }

    /// Flush pending bits and hand back the buffer.
    pub fn freeze(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.buf.push(self.acc as u8);
        }
        self.buf
    }
}

/// LSB-first bit reader over a byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> BitReader<'a> {
        BitReader {
            data,
            pos,
            acc: 0,
            bits: 0,
        }
    }

    fn read_bits(&mut self, nbits: u32) -> Result<u32> {
        while self.bits < nbits {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| NautexError::corrupt("position bit stream truncated"))?;
            self.pos += 1;
            self.acc |= (byte as u64) << self.bits;
            self.bits += 8;
        }
        let value = (self.acc & ((1u64 << nbits) - 1)) as u32;
        self.acc >>= nbits;
        self.bits -= nbits;
        Ok(value)
    }

    /// Inverse of [`BitWriter::encode`].
    pub fn decode(&mut self, outof: u32) -> Result<u32> {
        let m = outof as u64 + 1;
        if m == 1 {
            return Ok(0);
        }
        let k = 63 - m.leading_zeros();
        let short = (1u64 << (k + 1)) - m;
        let head = self.read_bits(k)?;
        if (head as u64) < short {
            Ok(head)
        } else {
            let tail = self.read_bits(1)?;
            Ok(((head << 1) | tail) - short as u32)
        }
    }

    /// Inverse of [`BitWriter::encode_interpolative`].
    pub fn decode_interpolative(
        &mut self,
        positions: &mut [u32],
        j: usize,
        k: usize,
    ) -> Result<()> {
        if k - j < 2 {
            return Ok(());
        }
        let mid = (j + k) / 2;
        let lo = positions[j] + (mid - j) as u32;
        let hi = positions[k] - (k - mid) as u32;
        if hi < lo {
            return Err(NautexError::corrupt("interpolative interval inverted"));
        }
        positions[mid] = lo + self.decode(hi - lo)?;
        self.decode_interpolative(positions, j, mid)?;
        self.decode_interpolative(positions, mid, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::TableConfig;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> Table {
        Table::create(
            &dir.path().join("position"),
            TableConfig {
                block_size: 2048,
                compress: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_single_position_is_bare_uint() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        set_positions(&mut t, 1, b"fox", &[42]).unwrap();
        // A lone position stores as one varint with no bit stream.
        let tag = t.get_exact(&position_key(1, b"fox")).unwrap().unwrap();
        assert_eq!(tag, vec![42]);
        assert_eq!(read_positions(&t, 1, b"fox").unwrap(), vec![42]);
        assert_eq!(position_count(&t, 1, b"fox").unwrap(), 1);
    }

    #[test]
    fn test_multi_position_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        let positions = vec![1, 2, 5, 9, 100, 101, 4000];
        set_positions(&mut t, 7, b"dog", &positions).unwrap();
        assert_eq!(read_positions(&t, 7, b"dog").unwrap(), positions);
        assert_eq!(position_count(&t, 7, b"dog").unwrap(), 7);
    }

    #[test]
    fn test_dense_run_codes_to_nothing() {
        // A fully dense run pins every interior position, so the
        // interpolative intervals are all empty.
        let positions: Vec<u32> = (10..200).collect();
        let mut header = Vec::new();
        pack_uint(&mut header, *positions.last().unwrap() as u64);
        let header_len = header.len();
        let mut wr = BitWriter::new(header);
        wr.encode(positions[0], *positions.last().unwrap());
        wr.encode(
            positions.len() as u32 - 2,
            positions.last().unwrap() - positions[0],
        );
        wr.encode_interpolative(&positions, 0, positions.len() - 1);
        let tag = wr.freeze();
        assert!(tag.len() <= header_len + 3);
        assert_eq!(decode_positions(&tag).unwrap(), positions);
    }

    #[test]
    fn test_missing_list_is_empty() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        assert!(read_positions(&t, 3, b"nothing").unwrap().is_empty());
        assert_eq!(position_count(&t, 3, b"nothing").unwrap(), 0);
    }

    #[test]
    fn test_unsorted_positions_rejected() {
        let dir = TempDir::new().unwrap();
        let mut t = table(&dir);
        assert!(set_positions(&mut t, 1, b"t", &[5, 5]).is_err());
        assert!(set_positions(&mut t, 1, b"t", &[5, 3]).is_err());
    }

    #[test]
    fn test_position_list_iterator() {
        let mut pl = PositionList::new(vec![2, 8, 11]);
        pl.next();
        assert_eq!(pl.position(), 2);
        pl.skip_to(9);
        assert_eq!(pl.position(), 11);
        pl.next();
        assert!(pl.at_end());
    }

    proptest! {
        #[test]
        fn prop_positions_roundtrip(
            raw in prop::collection::btree_set(0u32..100_000, 1..200)
        ) {
            let positions: Vec<u32> = raw.iter().copied().collect();
            let dir = TempDir::new().unwrap();
            let mut t = table(&dir);
            set_positions(&mut t, 1, b"w", &positions).unwrap();
            prop_assert_eq!(read_positions(&t, 1, b"w").unwrap(), positions.clone());
            prop_assert_eq!(
                position_count(&t, 1, b"w").unwrap() as usize,
                positions.len()
            );
        }
    }
}
