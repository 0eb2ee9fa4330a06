//! Database handles and the on-disk directory layout.
//!
//! A database directory holds the backend marker, a 16-byte `uuid` file,
//! seven tables (each `T.DB` + `T.baseA`/`T.baseB`) and, while a writer
//! is open, a lock file.

mod document;
mod lock;
mod reader;
mod version;
mod writer;

pub use document::Document;
pub use lock::{WriterLock, LOCK_FILE};
pub use reader::Database;
pub use version::{MARKER_FILE, UUID_FILE};
pub use writer::{DatabaseSettings, WritableDatabase};

pub(crate) use reader::TableSet;
