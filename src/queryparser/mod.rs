//! Free-form query string parsing.
//!
//! Two stages: a lexer turning the string into tokens (terms, operators,
//! filters, ranges, phrase/group structure), then a recursive-descent
//! parser reducing those into a [`Query`] tree with the precedence
//! ladder OR < XOR < AND/NOT. Behaviour is opt-in per parse through the
//! `FLAG_*` bits.

mod lexer;
mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::Database;
use crate::error::{NautexError, Result};
use crate::query::Query;

/// Enable AND/OR/NOT/XOR/NEAR/ADJ and bracketed subexpressions.
pub const FLAG_BOOLEAN: u32 = 1 << 0;
/// Enable quoted phrases.
pub const FLAG_PHRASE: u32 = 1 << 1;
/// Enable `+term` / `-term`.
pub const FLAG_LOVEHATE: u32 = 1 << 2;
/// Recognise boolean operators in any case, not just upper.
pub const FLAG_BOOLEAN_ANY_CASE: u32 = 1 << 3;
/// Enable right truncation (`term*`).
pub const FLAG_WILDCARD: u32 = 1 << 4;
/// Allow a query that is only a NOT (matched against all documents).
pub const FLAG_PURE_NOT: u32 = 1 << 5;
/// Treat the final term as a prefix (for search-as-you-type).
pub const FLAG_PARTIAL: u32 = 1 << 6;
/// Look up spelling corrections for unknown terms.
pub const FLAG_SPELLING_CORRECTION: u32 = 1 << 7;
/// Enable the `~term` explicit synonym operator.
pub const FLAG_SYNONYM: u32 = 1 << 8;
/// Expand every term with its synonyms automatically.
pub const FLAG_AUTO_SYNONYMS: u32 = 1 << 9;
/// Also match multi-word synonym keys across adjacent terms.
pub const FLAG_AUTO_MULTIWORD_SYNONYMS: u32 = 1 << 10;

/// The flags most applications start from.
pub const FLAG_DEFAULT: u32 = FLAG_BOOLEAN | FLAG_PHRASE | FLAG_LOVEHATE;

/// Operator joining plain terms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DefaultOp {
    Or,
    And,
}

/// Stemming applied to parsed terms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StemStrategy {
    /// Never stem.
    None,
    /// Stem terms except those used positionally or looking unstemable;
    /// stemmed forms carry the `Z` prefix.
    Some,
    /// Stem everything, without the `Z` prefix.
    All,
}

/// External stemming function; the engine treats it as a pure
/// `string -> string` mapping.
pub trait Stemmer: Send + Sync {
    fn stem(&self, word: &str) -> String;
}

/// Snowball stemming via the rust-stemmers crate.
pub struct SnowballStemmer {
    inner: rust_stemmers::Stemmer,
}

impl SnowballStemmer {
    pub fn new(language: &str) -> Result<SnowballStemmer> {
        use rust_stemmers::Algorithm::*;
        let algorithm = match language.to_ascii_lowercase().as_str() {
            "arabic" | "ar" => Arabic,
            "danish" | "da" => Danish,
            "dutch" | "nl" => Dutch,
            "english" | "en" => English,
            "finnish" | "fi" => Finnish,
            "french" | "fr" => French,
            "german" | "de" => German,
            "greek" | "el" => Greek,
            "hungarian" | "hu" => Hungarian,
            "italian" | "it" => Italian,
            "norwegian" | "no" => Norwegian,
            "portuguese" | "pt" => Portuguese,
            "romanian" | "ro" => Romanian,
            "russian" | "ru" => Russian,
            "spanish" | "es" => Spanish,
            "swedish" | "sv" => Swedish,
            "tamil" | "ta" => Tamil,
            "turkish" | "tr" => Turkish,
            other => {
                return Err(NautexError::InvalidArgument(format!(
                    "no stemmer for language '{}'",
                    other
                )))
            }
        };
        Ok(SnowballStemmer {
            inner: rust_stemmers::Stemmer::create(algorithm),
        })
    }
}

impl Stemmer for SnowballStemmer {
    fn stem(&self, word: &str) -> String {
        self.inner.stem(word).into_owned()
    }
}

/// Stopword predicate.
pub trait Stopper: Send + Sync {
    fn is_stopword(&self, word: &str) -> bool;
}

/// Set-backed stopper.
#[derive(Default)]
pub struct SimpleStopper {
    words: std::collections::HashSet<String>,
}

impl SimpleStopper {
    pub fn new(words: impl IntoIterator<Item = String>) -> SimpleStopper {
        SimpleStopper {
            words: words.into_iter().collect(),
        }
    }

    /// The stock English stopword list.
    pub fn english() -> SimpleStopper {
        Self::new(
            stop_words::get(stop_words::LANGUAGE::English)
                .into_iter()
                .map(|w| w.to_lowercase()),
        )
    }
}

impl Stopper for SimpleStopper {
    fn is_stopword(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// Maps a textual range (`lo..hi`) onto a value slot, or declines.
///
/// Processors run in registration order; the first to accept wins. A
/// processor may rewrite the boundary strings (strip markers, normalise
/// numbers) before they become the range bounds.
pub trait ValueRangeProcessor: Send + Sync {
    fn try_range(&self, lo: &mut String, hi: &mut String) -> Option<u32>;
}

/// Accepts any pair of strings for one slot, optionally demanding (and
/// stripping) a `marker:` prefix on the range start.
pub struct StringValueRangeProcessor {
    slot: u32,
    marker: Option<String>,
}

impl StringValueRangeProcessor {
    pub fn new(slot: u32) -> StringValueRangeProcessor {
        StringValueRangeProcessor { slot, marker: None }
    }

    pub fn with_marker(slot: u32, marker: impl Into<String>) -> StringValueRangeProcessor {
        StringValueRangeProcessor {
            slot,
            marker: Some(marker.into()),
        }
    }
}

impl ValueRangeProcessor for StringValueRangeProcessor {
    fn try_range(&self, lo: &mut String, _hi: &mut String) -> Option<u32> {
        match &self.marker {
            None => Some(self.slot),
            Some(marker) => {
                let stripped = lo.strip_prefix(marker.as_str())?.to_string();
                *lo = stripped;
                Some(self.slot)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PrefixInfo {
    pub filter: bool,
    pub prefixes: Vec<String>,
}

/// The query parser.
///
/// Lifetime-bound to an optional database, used for term existence
/// checks (suffix retention, spelling), wildcard and synonym expansion.
pub struct QueryParser<'d> {
    pub(crate) db: Option<&'d Database>,
    pub(crate) default_op: DefaultOp,
    pub(crate) stemmer: Option<Arc<dyn Stemmer>>,
    pub(crate) stem_strategy: StemStrategy,
    pub(crate) stopper: Option<Arc<dyn Stopper>>,
    pub(crate) prefixes: HashMap<String, PrefixInfo>,
    pub(crate) vrps: Vec<Arc<dyn ValueRangeProcessor>>,
    corrected_query: String,
    stoplist: Vec<String>,
}

impl<'d> QueryParser<'d> {
    pub fn new() -> QueryParser<'d> {
        QueryParser {
            db: None,
            default_op: DefaultOp::Or,
            stemmer: None,
            stem_strategy: StemStrategy::Some,
            stopper: None,
            prefixes: HashMap::new(),
            vrps: Vec::new(),
            corrected_query: String::new(),
            stoplist: Vec::new(),
        }
    }

    pub fn set_database(&mut self, db: &'d Database) -> &mut Self {
        self.db = Some(db);
        self
    }

    pub fn set_default_op(&mut self, op: DefaultOp) -> &mut Self {
        self.default_op = op;
        self
    }

    pub fn set_stemmer(&mut self, stemmer: Arc<dyn Stemmer>) -> &mut Self {
        self.stemmer = Some(stemmer);
        self
    }

    pub fn set_stemming_strategy(&mut self, strategy: StemStrategy) -> &mut Self {
        self.stem_strategy = strategy;
        self
    }

    pub fn set_stopper(&mut self, stopper: Arc<dyn Stopper>) -> &mut Self {
        self.stopper = Some(stopper);
        self
    }

    /// Register a probabilistic field prefix (`field:term` searches the
    /// prefix). A field may map to several prefixes; they are OR-ed.
    pub fn add_prefix(&mut self, field: &str, prefix: &str) -> Result<()> {
        self.add_prefix_impl(field, prefix, false)
    }

    /// Register a boolean filter prefix; its terms restrict rather than
    /// rank.
    pub fn add_boolean_prefix(&mut self, field: &str, prefix: &str) -> Result<()> {
        self.add_prefix_impl(field, prefix, true)
    }

    fn add_prefix_impl(&mut self, field: &str, prefix: &str, filter: bool) -> Result<()> {
        match self.prefixes.get_mut(field) {
            Some(info) => {
                if info.filter != filter {
                    return Err(NautexError::InvalidOperation(format!(
                        "field '{}' is already registered as a {} prefix",
                        field,
                        if info.filter { "filter" } else { "probabilistic" }
                    )));
                }
                info.prefixes.push(prefix.to_string());
            }
            None => {
                self.prefixes.insert(
                    field.to_string(),
                    PrefixInfo {
                        filter,
                        prefixes: vec![prefix.to_string()],
                    },
                );
            }
        }
        Ok(())
    }

    pub fn add_value_range_processor(&mut self, vrp: Arc<dyn ValueRangeProcessor>) -> &mut Self {
        self.vrps.push(vrp);
        self
    }

    /// Parse `qs` under `flags` into a query tree.
    pub fn parse_query(&mut self, qs: &str, flags: u32) -> Result<Query> {
        self.parse_query_with_prefix(qs, flags, "")
    }

    /// As [`QueryParser::parse_query`], applying `default_prefix` to
    /// unprefixed terms.
    pub fn parse_query_with_prefix(
        &mut self,
        qs: &str,
        flags: u32,
        default_prefix: &str,
    ) -> Result<Query> {
        self.corrected_query.clear();
        self.stoplist.clear();
        let lexed = lexer::lex(self, qs, flags, default_prefix)?;
        self.corrected_query = lexed.corrected_query;
        let mut parse = parser::Parser::new(self, flags, lexed.tokens);
        let (query, stoplist) = parse.run()?;
        self.stoplist = stoplist;
        Ok(query)
    }

    /// The query string with spelling corrections applied; empty when no
    /// correction was made (or the flag was off).
    pub fn get_corrected_query_string(&self) -> &str {
        &self.corrected_query
    }

    /// Terms dropped as stopwords during the last parse.
    pub fn stoplist(&self) -> &[String] {
        &self.stoplist
    }
}

impl<'d> Default for QueryParser<'d> {
    fn default() -> Self {
        Self::new()
    }
}
