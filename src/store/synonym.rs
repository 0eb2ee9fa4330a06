//! Synonym store: one entry per term carrying its expansion list.
//!
//! The tag is a byte-length-prefixed sorted list of synonyms. Keys are
//! the terms themselves, so a cursor range scan doubles as the
//! "which terms have synonyms" iterator the parser's multi-word matching
//! needs.

use crate::btree::{Cursor, Table};
use crate::error::{NautexError, Result};

pub fn encode_synonyms(synonyms: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for synonym in synonyms {
        if synonym.is_empty() || synonym.len() > 255 {
            return Err(NautexError::InvalidArgument(
                "synonym must be 1..=255 bytes".into(),
            ));
        }
        out.push(synonym.len() as u8);
        out.extend_from_slice(synonym);
    }
    Ok(out)
}

pub fn decode_synonyms(tag: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < tag.len() {
        let len = tag[pos] as usize;
        pos += 1;
        if pos + len > tag.len() {
            return Err(NautexError::corrupt("synonym list truncated"));
        }
        out.push(tag[pos..pos + len].to_vec());
        pos += len;
    }
    Ok(out)
}

/// Add one synonym for `term`.
pub fn add_synonym(table: &mut Table, term: &[u8], synonym: &[u8]) -> Result<()> {
    let mut synonyms = get_synonyms(table, term)?;
    if let Err(at) = synonyms.binary_search(&synonym.to_vec()) {
        synonyms.insert(at, synonym.to_vec());
        table.add(term, &encode_synonyms(&synonyms)?)?;
    }
    Ok(())
}

/// Remove one synonym; the entry disappears with its last synonym.
pub fn remove_synonym(table: &mut Table, term: &[u8], synonym: &[u8]) -> Result<()> {
    let mut synonyms = get_synonyms(table, term)?;
    if let Ok(at) = synonyms.binary_search(&synonym.to_vec()) {
        synonyms.remove(at);
        if synonyms.is_empty() {
            table.del(term)?;
        } else {
            table.add(term, &encode_synonyms(&synonyms)?)?;
        }
    }
    Ok(())
}

pub fn clear_synonyms(table: &mut Table, term: &[u8]) -> Result<bool> {
    table.del(term)
}

pub fn get_synonyms(table: &Table, term: &[u8]) -> Result<Vec<Vec<u8>>> {
    match table.get_exact(term)? {
        Some(tag) => decode_synonyms(&tag),
        None => Ok(Vec::new()),
    }
}

/// Iterate the terms which have synonyms, optionally below a prefix.
pub struct SynonymKeysIterator<'a> {
    cursor: Cursor<'a>,
    prefix: Vec<u8>,
    current: Option<Vec<u8>>,
    advanced_once: bool,
}

impl<'a> SynonymKeysIterator<'a> {
    pub fn new(table: &'a Table, prefix: &[u8]) -> Result<SynonymKeysIterator<'a>> {
        let mut cursor = table.cursor();
        cursor.find_entry_ge(prefix)?;
        Ok(SynonymKeysIterator {
            cursor,
            prefix: prefix.to_vec(),
            current: None,
            advanced_once: false,
        })
    }

    pub fn at_end(&self) -> bool {
        self.advanced_once && self.current.is_none()
    }

    pub fn term(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    pub fn next(&mut self) -> Result<()> {
        if self.advanced_once {
            self.cursor.next()?;
        } else {
            self.advanced_once = true;
        }
        match self.cursor.current_key() {
            Some(key) if key.starts_with(&self.prefix) => {
                self.current = Some(key.to_vec());
            }
            _ => self.current = None,
        }
        Ok(())
    }
}
