//! Nautex: a disk-resident full-text search engine.
//!
//! An inverted-index database on a transactional B-tree store: documents
//! go in as pre-tokenized (term, wdf) multisets with optional positions,
//! values and payloads; queries come back as ranked result sets.
//!
//! # Architecture
//!
//! ```text
//! queryparser  ->  Query  ->  matcher (posting-list tree, MSet)
//!                                  |
//!            db (Database / WritableDatabase, inverter buffer)
//!                                  |
//!     store (postlist, termlist, position, record, values,
//!            spelling, synonym)
//!                                  |
//!            btree (blocks, bases, cursors)  +  pack codecs
//! ```
//!
//! Each database directory is a set of seven tables; every table is one
//! block file plus two alternating base descriptors, so a commit is
//! atomic and readers pin the revision they opened. One writer at a
//! time (a lock file enforces this), any number of readers.
//!
//! # Usage
//!
//! ```no_run
//! use nautex::{Database, DatabaseSettings, Document, Enquire, WritableDatabase};
//!
//! let mut writer = WritableDatabase::create("idx", DatabaseSettings::default())?;
//! let mut doc = Document::new();
//! doc.add_posting(b"hello", 1, 1)?;
//! doc.set_data(&b"greeting"[..]);
//! writer.add_document(&doc)?;
//! writer.commit()?;
//!
//! let db = Database::open("idx")?;
//! let mut enquire = Enquire::new(&db);
//! enquire.set_query(nautex::Query::term("hello"));
//! let mset = enquire.get_mset(0, 10)?;
//! # Ok::<(), nautex::NautexError>(())
//! ```

pub mod btree;
pub mod compact;
pub mod db;
pub mod error;
pub mod matcher;
pub mod pack;
pub mod query;
pub mod queryparser;
pub mod store;

pub use compact::{CompactionLevel, CompactOptions, Compactor};
pub use db::{Database, DatabaseSettings, Document, WritableDatabase};
pub use error::{NautexError, Result};
pub use matcher::{
    Bm25Params, Enquire, KeyMaker, MSet, MSetItem, MultiValueKeyMaker, PrepareState, RemoteMatch,
};
pub use query::{CombinableOp, Query};
pub use queryparser::{
    DefaultOp, QueryParser, SimpleStopper, SnowballStemmer, StemStrategy, Stemmer, Stopper,
    StringValueRangeProcessor, ValueRangeProcessor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
