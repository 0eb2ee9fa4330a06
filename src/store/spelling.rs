//! Spelling dictionary: word frequencies plus a trigram index.
//!
//! Two key families share the table:
//!
//! ```text
//! W·word     -> uint(frequency)
//! T·trigram  -> prefix-compressed sorted word list
//! ```
//!
//! A suggestion gathers candidate words sharing at least one trigram with
//! the misspelling, keeps those within the edit-distance budget, and
//! picks the closest, breaking ties by frequency then byte order.

use std::collections::BTreeSet;

use crate::btree::Table;
use crate::error::{NautexError, Result};
use crate::pack::{pack_uint, unpack_uint};

pub const WORD_PREFIX: u8 = b'W';
pub const TRIGRAM_PREFIX: u8 = b'T';

/// Default edit-distance budget for suggestions.
pub const MAX_EDIT_DISTANCE: u32 = 2;

pub fn word_key(word: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(word.len() + 1);
    key.push(WORD_PREFIX);
    key.extend_from_slice(word);
    key
}

fn trigram_key(trigram: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(trigram.len() + 1);
    key.push(TRIGRAM_PREFIX);
    key.extend_from_slice(trigram);
    key
}

/// The trigrams a word is indexed under; short words index whole.
fn trigrams(word: &[u8]) -> Vec<Vec<u8>> {
    if word.len() <= 3 {
        return vec![word.to_vec()];
    }
    word.windows(3).map(|w| w.to_vec()).collect()
}

/// Record `count` sightings of `word`.
pub fn add_word(table: &mut Table, word: &[u8], count: u64) -> Result<()> {
    if word.is_empty() || count == 0 {
        return Ok(());
    }
    let key = word_key(word);
    let old = match table.get_exact(&key)? {
        Some(tag) => {
            let mut pos = 0;
            unpack_uint(&tag, &mut pos)?
        }
        None => 0,
    };
    let mut tag = Vec::new();
    pack_uint(&mut tag, old + count);
    table.add(&key, &tag)?;
    if old == 0 {
        for trigram in trigrams(word) {
            let tkey = trigram_key(&trigram);
            let mut words = match table.get_exact(&tkey)? {
                Some(tag) => decode_wordlist(&tag)?,
                None => Vec::new(),
            };
            if let Err(at) = words.binary_search(&word.to_vec()) {
                words.insert(at, word.to_vec());
                table.add(&tkey, &encode_wordlist(&words)?)?;
            }
        }
    }
    Ok(())
}

/// Forget `count` sightings; the word leaves the dictionary at zero.
pub fn remove_word(table: &mut Table, word: &[u8], count: u64) -> Result<()> {
    let key = word_key(word);
    let Some(tag) = table.get_exact(&key)? else {
        return Ok(());
    };
    let mut pos = 0;
    let old = unpack_uint(&tag, &mut pos)?;
    let new = old.saturating_sub(count);
    if new > 0 {
        let mut tag = Vec::new();
        pack_uint(&mut tag, new);
        return table.add(&key, &tag);
    }
    table.del(&key)?;
    for trigram in trigrams(word) {
        let tkey = trigram_key(&trigram);
        if let Some(tag) = table.get_exact(&tkey)? {
            let mut words = decode_wordlist(&tag)?;
            if let Ok(at) = words.binary_search(&word.to_vec()) {
                words.remove(at);
                if words.is_empty() {
                    table.del(&tkey)?;
                } else {
                    table.add(&tkey, &encode_wordlist(&words)?)?;
                }
            }
        }
    }
    Ok(())
}

pub fn word_freq(table: &Table, word: &[u8]) -> Result<u64> {
    match table.get_exact(&word_key(word))? {
        Some(tag) => {
            let mut pos = 0;
            unpack_uint(&tag, &mut pos)
        }
        None => Ok(0),
    }
}

/// Best replacement for `word`, if any lies within `max_edit` edits.
pub fn suggest(table: &Table, word: &[u8], max_edit: u32) -> Result<Option<Vec<u8>>> {
    if word.is_empty() {
        return Ok(None);
    }
    let mut candidates: BTreeSet<Vec<u8>> = BTreeSet::new();
    for trigram in trigrams(word) {
        if let Some(tag) = table.get_exact(&trigram_key(&trigram))? {
            for w in decode_wordlist(&tag)? {
                candidates.insert(w);
            }
        }
    }
    let mut best: Option<(u32, u64, Vec<u8>)> = None;
    for candidate in candidates {
        if candidate == word {
            continue;
        }
        let dist = edit_distance(word, &candidate);
        if dist > max_edit {
            continue;
        }
        let freq = word_freq(table, &candidate)?;
        // Candidates arrive in byte order, so on a full tie the earliest
        // word is already in place.
        let better = match &best {
            None => true,
            Some((bd, bf, _)) => dist < *bd || (dist == *bd && freq > *bf),
        };
        if better {
            best = Some((dist, freq, candidate));
        }
    }
    Ok(best.map(|(_, _, w)| w))
}

/// Plain Levenshtein distance over bytes.
pub fn edit_distance(a: &[u8], b: &[u8]) -> u32 {
    if a.is_empty() {
        return b.len() as u32;
    }
    if b.is_empty() {
        return a.len() as u32;
    }
    let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
    let mut cur = vec![0u32; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i as u32 + 1;
        for (j, &cb) in b.iter().enumerate() {
            let sub = prev[j] + u32::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Encode a sorted word list with prefix sharing:
/// `uint(count)` then `[first: len byte + bytes]` and
/// `[reuse byte][suffix len byte][suffix]` for the rest.
pub fn encode_wordlist(words: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pack_uint(&mut out, words.len() as u64);
    let mut prev: &[u8] = b"";
    for (i, word) in words.iter().enumerate() {
        if word.len() > 255 {
            return Err(NautexError::InvalidArgument(
                "word too long for spelling dictionary".into(),
            ));
        }
        if i == 0 {
            out.push(word.len() as u8);
            out.extend_from_slice(word);
        } else {
            let reuse = prev
                .iter()
                .zip(word.iter())
                .take_while(|(a, b)| a == b)
                .count()
                .min(255);
            out.push(reuse as u8);
            out.push((word.len() - reuse) as u8);
            out.extend_from_slice(&word[reuse..]);
        }
        prev = word;
    }
    Ok(out)
}

pub fn decode_wordlist(tag: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut pos = 0;
    let count = unpack_uint(tag, &mut pos)? as usize;
    let mut out: Vec<Vec<u8>> = Vec::with_capacity(count);
    let mut current: Vec<u8> = Vec::new();
    for i in 0..count {
        let (reuse, suffix_len) = if i == 0 {
            (0, take_byte(tag, &mut pos)? as usize)
        } else {
            let reuse = take_byte(tag, &mut pos)? as usize;
            (reuse, take_byte(tag, &mut pos)? as usize)
        };
        if reuse > current.len() {
            return Err(NautexError::corrupt("wordlist reuse exceeds previous word"));
        }
        current.truncate(reuse);
        if pos + suffix_len > tag.len() {
            return Err(NautexError::corrupt("wordlist suffix overruns tag"));
        }
        current.extend_from_slice(&tag[pos..pos + suffix_len]);
        pos += suffix_len;
        out.push(current.clone());
    }
    Ok(out)
}

fn take_byte(tag: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *tag
        .get(*pos)
        .ok_or_else(|| NautexError::corrupt("wordlist truncated"))?;
    *pos += 1;
    Ok(b)
}
