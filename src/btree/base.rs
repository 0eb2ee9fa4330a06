//! Base descriptors: the two alternating root files of a table.
//!
//! A base names a revision and everything needed to read it: the root
//! block, tree depth, entry count and the free/freed block lists. Commit
//! writes the inactive base via write-to-temp, fsync, rename, fsync-dir,
//! so a crash at any point leaves the previous revision's base untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NautexError, Result};

const BASE_MAGIC: &[u8; 8] = b"NXBASE01";

/// Serialized root descriptor for one table revision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Base {
    pub block_size: u32,
    pub revision: u64,
    /// Root block, or `None` while the table is empty.
    pub root: Option<u32>,
    /// Number of levels (0 for an empty table, 1 for a lone leaf root).
    pub levels: u32,
    /// First block number never yet allocated.
    pub next_block: u32,
    pub entry_count: u64,
    /// Blocks reusable immediately when building the next revision.
    pub free: Vec<u32>,
    /// Blocks dropped while building this revision; they may still be
    /// referenced by the previous one, so they only become reusable one
    /// commit later.
    pub freed: Vec<u32>,
    pub compress_tags: bool,
}

impl Base {
    pub fn new_empty(block_size: u32, compress_tags: bool) -> Base {
        Base {
            block_size,
            revision: 1,
            root: None,
            levels: 0,
            // Block 0 is never allocated: overflow chains use 0 as
            // their end-of-chain marker.
            next_block: 1,
            entry_count: 0,
            free: Vec::new(),
            freed: Vec::new(),
            compress_tags,
        }
    }

    pub fn path_for(table_path: &Path, letter: char) -> PathBuf {
        let mut name = table_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".base{}", letter));
        table_path.with_file_name(name)
    }

    /// Serialize and durably write this base as `<table>.base<letter>`.
    pub fn write(&self, table_path: &Path, letter: char) -> Result<()> {
        let body = bincode::serialize(self).map_err(|e| {
            NautexError::DatabaseIo(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let path = Self::path_for(table_path, letter);
        let tmp = path.with_extension("tmp");
        {
            let mut f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            f.write_all(BASE_MAGIC)?;
            f.write_all(&(body.len() as u32).to_le_bytes())?;
            f.write_all(&body)?;
            f.write_all(&crc.to_le_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        if let Some(dir) = path.parent() {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    /// Read `<table>.base<letter>`, if present and intact.
    ///
    /// A missing file is `Ok(None)`; a damaged one is reported the same
    /// way (with a warning) so that the other base can take over, since a
    /// half-written base is exactly what a crash during commit leaves.
    pub fn read(table_path: &Path, letter: char) -> Result<Option<Base>> {
        let path = Self::path_for(table_path, letter);
        let mut buf = Vec::new();
        match File::open(&path) {
            Ok(mut f) => f.read_to_end(&mut buf)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(&buf) {
            Ok(base) => Ok(Some(base)),
            Err(e) => {
                warn!(base = %path.display(), error = %e, "discarding unreadable base");
                Ok(None)
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<Base> {
        if buf.len() < 8 + 4 + 4 || &buf[0..8] != BASE_MAGIC {
            return Err(NautexError::corrupt("bad base magic"));
        }
        let body_len = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        if 12 + body_len + 4 != buf.len() {
            return Err(NautexError::corrupt("base length mismatch"));
        }
        let body = &buf[12..12 + body_len];
        let stored_crc = u32::from_le_bytes(buf[12 + body_len..].try_into().unwrap());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(NautexError::corrupt("base checksum mismatch"));
        }
        Ok(bincode::deserialize(body)?)
    }

    /// Pick the base to open: the valid one with the highest revision, or
    /// with `pinned` set, the base holding exactly that revision.
    pub fn choose(table_path: &Path, pinned: Option<u64>) -> Result<(Base, char)> {
        let a = Base::read(table_path, 'A')?;
        let b = Base::read(table_path, 'B')?;
        let mut picked: Option<(Base, char)> = None;
        for (base, letter) in [(a, 'A'), (b, 'B')] {
            let Some(base) = base else { continue };
            match pinned {
                Some(rev) => {
                    if base.revision == rev {
                        return Ok((base, letter));
                    }
                }
                None => {
                    if picked.as_ref().map_or(true, |(p, _)| base.revision > p.revision) {
                        picked = Some((base, letter));
                    }
                }
            }
        }
        match pinned {
            Some(rev) => Err(NautexError::DatabaseModified { revision: rev }),
            None => picked.ok_or_else(|| {
                NautexError::corrupt(format!(
                    "no usable base for table {}",
                    table_path.display()
                ))
            }),
        }
    }
}
