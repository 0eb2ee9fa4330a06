//! Revisioned B-tree table storage
//!
//! Each table is one data file of fixed-size blocks plus two alternating
//! base descriptors. Writers copy-on-write every touched block and publish
//! a commit by writing the inactive base; readers pin whichever revision
//! their base described when they opened.
//!
//! - `block`: node / overflow block encoding
//! - `base`: the root descriptor files (`T.baseA` / `T.baseB`)
//! - `table`: the ordered map itself (get / add / del / commit)
//! - `cursor`: ordered traversal over a snapshot

mod base;
mod block;
mod cursor;
mod table;

pub use base::Base;
pub use block::{Node, Tag};
pub use cursor::Cursor;
pub use table::{Table, TableConfig, MAX_KEY_LEN};
