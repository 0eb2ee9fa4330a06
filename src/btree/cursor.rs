//! Ordered traversal over a table snapshot.
//!
//! A cursor materialises the path from the root to its current leaf, so
//! moving to a neighbouring entry only re-reads the blocks whose subtree
//! changes. Cursors borrow the table: any mutation of a writable table
//! invalidates every open cursor at compile time.

use super::block::Node;
use super::table::Table;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Position {
    BeforeStart,
    Positioned,
    AfterEnd,
}

/// Cursor over the entries of one [`Table`], in key order.
pub struct Cursor<'a> {
    table: &'a Table,
    /// Path from root to leaf: each level holds the parsed node and the
    /// index of the child (or item, at the leaf) the path goes through.
    stack: Vec<(Node, usize)>,
    state: Position,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(table: &'a Table) -> Cursor<'a> {
        Cursor {
            table,
            stack: Vec::new(),
            state: Position::BeforeStart,
        }
    }

    pub fn before_start(&self) -> bool {
        self.state == Position::BeforeStart
    }

    pub fn after_end(&self) -> bool {
        self.state == Position::AfterEnd
    }

    /// Force the after-end state.
    pub fn to_end(&mut self) {
        self.stack.clear();
        self.state = Position::AfterEnd;
    }

    /// Key of the current entry; `None` off either end.
    pub fn current_key(&self) -> Option<&[u8]> {
        if self.state != Position::Positioned {
            return None;
        }
        match self.stack.last() {
            Some((Node::Leaf { items }, idx)) => Some(&items[*idx].key),
            _ => None,
        }
    }

    /// Fetch the current entry's value, decompressing if needed.
    pub fn read_tag(&self) -> Result<Vec<u8>> {
        let (_, _, tag) = self.current_tag()?;
        self.table.tag_value(&tag)
    }

    /// Fetch the current entry's value exactly as stored, together with
    /// its compression flag. Used by the compactor to move tags between
    /// tables without a decompress/recompress round.
    pub fn read_tag_raw(&self) -> Result<(bool, Vec<u8>)> {
        let (_, _, tag) = self.current_tag()?;
        self.table.tag_raw(&tag)
    }

    /// Revision the current entry was last written at.
    pub fn current_entry_revision(&self) -> Option<u64> {
        if self.state != Position::Positioned {
            return None;
        }
        match self.stack.last() {
            Some((Node::Leaf { items }, idx)) => Some(items[*idx].rev),
            _ => None,
        }
    }

    fn current_tag(&self) -> Result<(Vec<u8>, u64, super::block::Tag)> {
        match self.stack.last() {
            Some((Node::Leaf { items }, idx)) if self.state == Position::Positioned => {
                let item = &items[*idx];
                Ok((item.key.clone(), item.rev, item.tag.clone()))
            }
            _ => Err(crate::error::NautexError::InvalidOperation(
                "cursor is not positioned on an entry".into(),
            )),
        }
    }

    /// Position at the smallest key >= `key`; returns whether the match
    /// is exact. With no such entry the cursor ends up after the end.
    pub fn find_entry_ge(&mut self, key: &[u8]) -> Result<bool> {
        self.stack.clear();
        let Some(root) = self.table.root() else {
            self.state = Position::AfterEnd;
            return Ok(false);
        };
        let mut no = root;
        loop {
            let node = self.table.read_node(no)?;
            match node {
                Node::Leaf { ref items } => {
                    let idx = items.partition_point(|it| it.key.as_slice() < key);
                    let exact = idx < items.len() && items[idx].key == key;
                    let at_end_of_leaf = idx == items.len();
                    self.stack.push((node, idx));
                    self.state = Position::Positioned;
                    if at_end_of_leaf {
                        // The target falls past this leaf; step into the
                        // next one (or off the end).
                        self.advance()?;
                    }
                    return Ok(exact);
                }
                Node::Branch {
                    ref separators,
                    ref children,
                } => {
                    let ci = separators.partition_point(|s| s.as_slice() <= key);
                    let child = children[ci];
                    self.stack.push((node, ci));
                    no = child;
                }
            }
        }
    }

    /// Position at the greatest key < `key`; before-start when none.
    pub fn find_entry_lt(&mut self, key: &[u8]) -> Result<()> {
        self.find_entry_ge(key)?;
        match self.state {
            Position::AfterEnd => {
                // Everything is below `key`: land on the last entry.
                self.last()?;
            }
            _ => self.retreat()?,
        }
        Ok(())
    }

    /// Advance to the next entry.
    pub fn next(&mut self) -> Result<()> {
        match self.state {
            Position::BeforeStart => self.first(),
            Position::Positioned => self.advance(),
            Position::AfterEnd => Ok(()),
        }
    }

    /// Retreat to the previous entry.
    pub fn prev(&mut self) -> Result<()> {
        match self.state {
            Position::AfterEnd => self.last(),
            Position::Positioned => self.retreat(),
            Position::BeforeStart => Ok(()),
        }
    }

    fn first(&mut self) -> Result<()> {
        self.stack.clear();
        let Some(root) = self.table.root() else {
            self.state = Position::AfterEnd;
            return Ok(());
        };
        self.descend_edge(root, false)?;
        self.state = if self.leaf_has_item() {
            Position::Positioned
        } else {
            Position::AfterEnd
        };
        Ok(())
    }

    fn last(&mut self) -> Result<()> {
        self.stack.clear();
        let Some(root) = self.table.root() else {
            self.state = Position::BeforeStart;
            return Ok(());
        };
        self.descend_edge(root, true)?;
        self.state = if self.leaf_has_item() {
            Position::Positioned
        } else {
            Position::BeforeStart
        };
        Ok(())
    }

    /// Walk to the leftmost (or rightmost) leaf under `no`.
    fn descend_edge(&mut self, mut no: u32, rightmost: bool) -> Result<()> {
        loop {
            let node = self.table.read_node(no)?;
            match node {
                Node::Leaf { ref items } => {
                    let idx = if rightmost && !items.is_empty() {
                        items.len() - 1
                    } else {
                        0
                    };
                    self.stack.push((node, idx));
                    return Ok(());
                }
                Node::Branch { ref children, .. } => {
                    let ci = if rightmost { children.len() - 1 } else { 0 };
                    let child = children[ci];
                    self.stack.push((node, ci));
                    no = child;
                }
            }
        }
    }

    fn leaf_has_item(&self) -> bool {
        matches!(self.stack.last(), Some((Node::Leaf { items }, idx)) if *idx < items.len())
    }

    /// Step forward one entry, walking up and back down at leaf edges.
    fn advance(&mut self) -> Result<()> {
        // Try to move within the current leaf first.
        if let Some((Node::Leaf { items }, idx)) = self.stack.last_mut() {
            if *idx + 1 < items.len() {
                *idx += 1;
                return Ok(());
            }
        }
        // Climb until a branch has a further child, then take its leftmost
        // descendant.
        loop {
            self.stack.pop();
            let next_child = match self.stack.last_mut() {
                None => {
                    self.state = Position::AfterEnd;
                    return Ok(());
                }
                Some((Node::Branch { children, .. }, idx)) => {
                    if *idx + 1 < children.len() {
                        *idx += 1;
                        Some(children[*idx])
                    } else {
                        None
                    }
                }
                Some((Node::Leaf { .. }, _)) => None,
            };
            if let Some(child) = next_child {
                self.descend_edge(child, false)?;
                if !self.leaf_has_item() {
                    self.state = Position::AfterEnd;
                }
                return Ok(());
            }
        }
    }

    /// Step backward one entry.
    fn retreat(&mut self) -> Result<()> {
        if let Some((Node::Leaf { .. }, idx)) = self.stack.last_mut() {
            if *idx > 0 {
                *idx -= 1;
                return Ok(());
            }
        }
        loop {
            self.stack.pop();
            let prev_child = match self.stack.last_mut() {
                None => {
                    self.state = Position::BeforeStart;
                    return Ok(());
                }
                Some((Node::Branch { children, .. }, idx)) => {
                    if *idx > 0 {
                        *idx -= 1;
                        Some(children[*idx])
                    } else {
                        None
                    }
                }
                Some((Node::Leaf { .. }, _)) => None,
            };
            if let Some(child) = prev_child {
                self.descend_edge(child, true)?;
                if !self.leaf_has_item() {
                    self.state = Position::BeforeStart;
                }
                return Ok(());
            }
        }
    }
}
