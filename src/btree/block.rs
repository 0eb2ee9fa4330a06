//! On-disk block encoding for B-tree nodes and overflow chains.
//!
//! Every block starts with the revision it was written under, so a reader
//! pinned to revision R can detect that a block has been recycled by a
//! later writer (header revision > R).
//!
//! Block layouts:
//!
//! ```text
//! leaf:     [rev u64][kind=0][count u16]  then `count` leaf items
//! branch:   [rev u64][kind=1][count u16]  [child0 u32] then `count`
//!           (separator, child) items
//! overflow: [rev u64][kind=2][next u32][len u16]  then `len` data bytes
//! ```
//!
//! A leaf item is `[key][rev varint][flags u8]` followed by either the
//! inline tag bytes or an overflow descriptor. Keys and inline tags are
//! length-prefixed varints. All integers little-endian.

use crate::error::{NautexError, Result};
use crate::pack::{pack_uint, unpack_uint};

pub const KIND_LEAF: u8 = 0;
pub const KIND_BRANCH: u8 = 1;
pub const KIND_OVERFLOW: u8 = 2;

/// Fixed part of every block header.
pub const BLOCK_HEADER: usize = 8 + 1 + 2;

const TAG_COMPRESSED: u8 = 0x01;
const TAG_OVERFLOW: u8 = 0x02;

/// How a leaf entry's value is stored.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    /// Value bytes held in the leaf item itself.
    Inline { compressed: bool, data: Vec<u8> },
    /// Value spilled to a chain of overflow blocks.
    Overflow {
        compressed: bool,
        total_len: u64,
        first_block: u32,
    },
}

impl Tag {
    pub fn compressed(&self) -> bool {
        match self {
            Tag::Inline { compressed, .. } => *compressed,
            Tag::Overflow { compressed, .. } => *compressed,
        }
    }
}

/// One key/value entry in a leaf, with the revision it was last written at.
#[derive(Clone, Debug)]
pub struct LeafItem {
    pub key: Vec<u8>,
    pub rev: u64,
    pub tag: Tag,
}

impl LeafItem {
    fn encoded_len(&self) -> usize {
        let tag_len = match &self.tag {
            Tag::Inline { data, .. } => uint_len(data.len() as u64) + data.len(),
            Tag::Overflow { total_len, .. } => uint_len(*total_len) + 4,
        };
        uint_len(self.key.len() as u64) + self.key.len() + uint_len(self.rev) + 1 + tag_len
    }
}

/// A parsed B-tree node.
///
/// Branch nodes hold `children.len() == separators.len() + 1` block
/// numbers; `children[i]` covers keys below `separators[i]`, the last
/// child covers everything from the last separator up.
#[derive(Clone, Debug)]
pub enum Node {
    Leaf { items: Vec<LeafItem> },
    Branch {
        separators: Vec<Vec<u8>>,
        children: Vec<u32>,
    },
}

impl Node {
    pub fn empty_leaf() -> Node {
        Node::Leaf { items: Vec::new() }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Bytes this node needs on disk, header included.
    pub fn encoded_len(&self) -> usize {
        match self {
            Node::Leaf { items } => {
                BLOCK_HEADER + items.iter().map(LeafItem::encoded_len).sum::<usize>()
            }
            Node::Branch {
                separators,
                children: _,
            } => {
                BLOCK_HEADER
                    + 4
                    + separators
                        .iter()
                        .map(|s| uint_len(s.len() as u64) + s.len() + 4)
                        .sum::<usize>()
            }
        }
    }

    pub fn serialize(&self, rev: u64, block_size: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(block_size);
        out.extend_from_slice(&rev.to_le_bytes());
        match self {
            Node::Leaf { items } => {
                out.push(KIND_LEAF);
                out.extend_from_slice(&(items.len() as u16).to_le_bytes());
                for item in items {
                    pack_uint(&mut out, item.key.len() as u64);
                    out.extend_from_slice(&item.key);
                    // Items touched in the current build carry a pending
                    // marker until the commit revision is known.
                    let item_rev = if item.rev == u64::MAX { rev } else { item.rev };
                    pack_uint(&mut out, item_rev);
                    match &item.tag {
                        Tag::Inline { compressed, data } => {
                            out.push(if *compressed { TAG_COMPRESSED } else { 0 });
                            pack_uint(&mut out, data.len() as u64);
                            out.extend_from_slice(data);
                        }
                        Tag::Overflow {
                            compressed,
                            total_len,
                            first_block,
                        } => {
                            let mut flags = TAG_OVERFLOW;
                            if *compressed {
                                flags |= TAG_COMPRESSED;
                            }
                            out.push(flags);
                            pack_uint(&mut out, *total_len);
                            out.extend_from_slice(&first_block.to_le_bytes());
                        }
                    }
                }
            }
            Node::Branch {
                separators,
                children,
            } => {
                out.push(KIND_BRANCH);
                out.extend_from_slice(&(separators.len() as u16).to_le_bytes());
                out.extend_from_slice(&children[0].to_le_bytes());
                for (sep, child) in separators.iter().zip(&children[1..]) {
                    pack_uint(&mut out, sep.len() as u64);
                    out.extend_from_slice(sep);
                    out.extend_from_slice(&child.to_le_bytes());
                }
            }
        }
        debug_assert!(out.len() <= block_size, "node overflows its block");
        out.resize(block_size, 0);
        out
    }

    /// Parse a node block, returning it with the revision it was written at.
    pub fn parse(buf: &[u8]) -> Result<(u64, Node)> {
        if buf.len() < BLOCK_HEADER {
            return Err(NautexError::corrupt("block shorter than header"));
        }
        let rev = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let kind = buf[8];
        let count = u16::from_le_bytes(buf[9..11].try_into().unwrap()) as usize;
        let mut pos = BLOCK_HEADER;
        match kind {
            KIND_LEAF => {
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = read_bytes(buf, &mut pos)?;
                    let item_rev = unpack_uint(buf, &mut pos)?;
                    let flags = *buf
                        .get(pos)
                        .ok_or_else(|| NautexError::corrupt("truncated leaf item"))?;
                    pos += 1;
                    let compressed = flags & TAG_COMPRESSED != 0;
                    let tag = if flags & TAG_OVERFLOW != 0 {
                        let total_len = unpack_uint(buf, &mut pos)?;
                        let first_block = read_u32(buf, &mut pos)?;
                        Tag::Overflow {
                            compressed,
                            total_len,
                            first_block,
                        }
                    } else {
                        Tag::Inline {
                            compressed,
                            data: read_bytes(buf, &mut pos)?,
                        }
                    };
                    items.push(LeafItem {
                        key,
                        rev: item_rev,
                        tag,
                    });
                }
                Ok((rev, Node::Leaf { items }))
            }
            KIND_BRANCH => {
                let mut children = Vec::with_capacity(count + 1);
                let mut separators = Vec::with_capacity(count);
                children.push(read_u32(buf, &mut pos)?);
                for _ in 0..count {
                    separators.push(read_bytes(buf, &mut pos)?);
                    children.push(read_u32(buf, &mut pos)?);
                }
                Ok((rev, Node::Branch {
                    separators,
                    children,
                }))
            }
            _ => Err(NautexError::corrupt(format!("bad block kind {}", kind))),
        }
    }

    /// Split the node roughly in half by encoded size.
    ///
    /// Returns the right sibling and the separator key under which it must
    /// be registered in the parent (the right half's smallest key).
    pub fn split(&mut self) -> (Vec<u8>, Node) {
        match self {
            Node::Leaf { items } => {
                let total: usize = items.iter().map(LeafItem::encoded_len).sum();
                let mut acc = 0;
                let mut split_at = items.len() - 1;
                for (i, item) in items.iter().enumerate() {
                    acc += item.encoded_len();
                    if acc * 2 >= total && i + 1 < items.len() {
                        split_at = i + 1;
                        break;
                    }
                }
                let right: Vec<LeafItem> = items.split_off(split_at);
                let sep = right[0].key.clone();
                (sep, Node::Leaf { items: right })
            }
            Node::Branch {
                separators,
                children,
            } => {
                // Promote the middle separator; it does not stay in either half.
                let mid = separators.len() / 2;
                let right_seps = separators.split_off(mid + 1);
                let sep = separators.pop().expect("branch split needs >= 2 separators");
                let right_children = children.split_off(mid + 1);
                (sep, Node::Branch {
                    separators: right_seps,
                    children: right_children,
                })
            }
        }
    }
}

/// Encode an overflow block.
pub fn serialize_overflow(rev: u64, next: u32, data: &[u8], block_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(block_size);
    out.extend_from_slice(&rev.to_le_bytes());
    out.push(KIND_OVERFLOW);
    out.extend_from_slice(&next.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    debug_assert!(out.len() <= block_size);
    out.resize(block_size, 0);
    out
}

/// Decode an overflow block into (revision, next block, payload).
pub fn parse_overflow(buf: &[u8]) -> Result<(u64, u32, &[u8])> {
    if buf.len() < 8 + 1 + 4 + 2 {
        return Err(NautexError::corrupt("overflow block shorter than header"));
    }
    let rev = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    if buf[8] != KIND_OVERFLOW {
        return Err(NautexError::corrupt("expected overflow block"));
    }
    let next = u32::from_le_bytes(buf[9..13].try_into().unwrap());
    let len = u16::from_le_bytes(buf[13..15].try_into().unwrap()) as usize;
    if 15 + len > buf.len() {
        return Err(NautexError::corrupt("overflow payload overruns block"));
    }
    Ok((rev, next, &buf[15..15 + len]))
}

/// How much payload one overflow block holds.
pub fn overflow_capacity(block_size: usize) -> usize {
    block_size - (8 + 1 + 4 + 2)
}

fn uint_len(v: u64) -> usize {
    let mut len = 1;
    let mut v = v;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = unpack_uint(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(NautexError::corrupt("length prefix overruns block"));
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(NautexError::corrupt("truncated block number"));
    }
    let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[&[u8]]) -> Node {
        Node::Leaf {
            items: keys
                .iter()
                .map(|k| LeafItem {
                    key: k.to_vec(),
                    rev: 3,
                    tag: Tag::Inline {
                        compressed: false,
                        data: b"v".to_vec(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn test_leaf_roundtrip() {
        let node = leaf_with(&[b"alpha", b"beta", b"gamma"]);
        let buf = node.serialize(7, 2048);
        assert_eq!(buf.len(), 2048);
        let (rev, parsed) = Node::parse(&buf).unwrap();
        assert_eq!(rev, 7);
        match parsed {
            Node::Leaf { items } => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[1].key, b"beta");
                assert_eq!(items[1].rev, 3);
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_branch_roundtrip() {
        let node = Node::Branch {
            separators: vec![b"m".to_vec()],
            children: vec![4, 9],
        };
        let buf = node.serialize(2, 2048);
        let (_, parsed) = Node::parse(&buf).unwrap();
        match parsed {
            Node::Branch {
                separators,
                children,
            } => {
                assert_eq!(separators, vec![b"m".to_vec()]);
                assert_eq!(children, vec![4, 9]);
            }
            _ => panic!("expected branch"),
        }
    }

    #[test]
    fn test_leaf_split_separator_is_right_head() {
        let mut node = leaf_with(&[b"a", b"b", b"c", b"d"]);
        let (sep, right) = node.split();
        match (&node, &right) {
            (Node::Leaf { items: l }, Node::Leaf { items: r }) => {
                assert!(!l.is_empty() && !r.is_empty());
                assert_eq!(sep, r[0].key);
                assert!(l.last().unwrap().key < r[0].key);
            }
            _ => panic!("expected leaves"),
        }
    }

    #[test]
    fn test_overflow_roundtrip() {
        let buf = serialize_overflow(5, 12, b"spilled", 2048);
        let (rev, next, data) = parse_overflow(&buf).unwrap();
        assert_eq!((rev, next), (5, 12));
        assert_eq!(data, b"spilled");
    }

    #[test]
    fn test_bad_kind_is_corrupt() {
        let mut buf = leaf_with(&[b"k"]).serialize(1, 2048);
        buf[8] = 9;
        assert!(Node::parse(&buf).is_err());
    }
}
