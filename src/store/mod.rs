//! Index stores layered on the B-tree tables.
//!
//! Each store owns the key and tag encodings for one table of the
//! database directory:
//!
//! - `postlist`: chunked (docid, wdf) posting lists + global stats
//! - `position`: interpolative-coded within-document positions
//! - `termlist`: per-document prefix-compressed (term, wdf) lists
//! - `record`: opaque document payloads
//! - `values`: per-slot document values, ordered for range scans
//! - `spelling`: word frequencies + trigram index for suggestions
//! - `synonym`: per-term synonym lists

pub mod position;
pub mod postlist;
pub mod record;
pub mod spelling;
pub mod synonym;
pub mod termlist;
pub mod values;
