//! The query-string lexer.
//!
//! Produces the token stream the parser reduces: terms (plain, group,
//! phrased, wildcarded, partial), boolean filters, range bounds, quotes,
//! brackets and operators. Field prefixes are resolved here, against a
//! stack so that `field:(...)` and `field:"..."` scope their prefix over
//! the whole subexpression. Spelling corrections are also collected here
//! since they need the raw byte offsets.

use super::{PrefixInfo, QueryParser, StemStrategy};
use crate::error::Result;

/// Carries term information from lexer to parser.
#[derive(Clone, Debug)]
pub(crate) struct TermToken {
    /// Lower-cased term body.
    pub name: String,
    /// The body as typed (recorded against the stemmed form).
    pub unstemmed: String,
    /// Field prefixes to apply; `""` means no prefix.
    pub prefixes: Vec<String>,
    /// Stemming decided for this term.
    pub stem: StemStrategy,
    /// Term position (1-based across the query).
    pub pos: u32,
    /// Byte offset in the query string.
    pub offset: usize,
}

#[derive(Clone, Debug)]
pub(crate) enum Token {
    Term(TermToken),
    GroupTerm(TermToken),
    PhrTerm(TermToken),
    WildTerm(TermToken),
    PartialTerm(TermToken),
    BooleanFilter(TermToken),
    RangeStart { text: String, offset: usize },
    RangeEnd { text: String, offset: usize },
    Quote { offset: usize },
    Bra { offset: usize },
    Ket { offset: usize },
    And { offset: usize },
    Or { offset: usize },
    Not { offset: usize },
    Xor { offset: usize },
    Near { window: Option<u32>, offset: usize },
    Adj { window: Option<u32>, offset: usize },
    Love { offset: usize },
    Hate { offset: usize },
    HateAfterAnd { offset: usize },
    Synonym { offset: usize },
}

impl Token {
    pub fn offset(&self) -> usize {
        match self {
            Token::Term(t)
            | Token::GroupTerm(t)
            | Token::PhrTerm(t)
            | Token::WildTerm(t)
            | Token::PartialTerm(t)
            | Token::BooleanFilter(t) => t.offset,
            Token::RangeStart { offset, .. }
            | Token::RangeEnd { offset, .. }
            | Token::Quote { offset }
            | Token::Bra { offset }
            | Token::Ket { offset }
            | Token::And { offset }
            | Token::Or { offset }
            | Token::Not { offset }
            | Token::Xor { offset }
            | Token::Near { offset, .. }
            | Token::Adj { offset, .. }
            | Token::Love { offset }
            | Token::Hate { offset }
            | Token::HateAfterAnd { offset }
            | Token::Synonym { offset } => *offset,
        }
    }
}

pub(crate) struct LexOutput {
    pub tokens: Vec<Token>,
    pub corrected_query: String,
}

fn is_wordchar(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Characters allowed singly between word characters (AT&T, Fred's);
/// apostrophe variants fold to ASCII.
fn check_infix(ch: char) -> Option<char> {
    match ch {
        '\'' | '&' | '\u{b7}' | '\u{5f4}' | '\u{2027}' => Some(ch),
        '\u{2019}' | '\u{201b}' => Some('\''),
        _ => None,
    }
}

/// Separators kept between digits (1,000 or 3.14).
fn check_infix_digit(ch: char) -> Option<char> {
    match ch {
        ',' | '.' | ';' => Some(ch),
        _ => None,
    }
}

fn is_suffix_char(ch: char) -> bool {
    ch == '+' || ch == '#'
}

fn is_phrase_generator(ch: char) -> bool {
    matches!(ch, '.' | '-' | '/' | ':' | '\\' | '@')
}

fn is_stem_preventer(ch: char) -> bool {
    matches!(
        ch,
        '(' | '/' | '\\' | '@' | '<' | '>' | '=' | '*' | '[' | '{' | '"'
    )
}

fn should_stem(term: &str) -> bool {
    term.chars().next().map_or(false, |c| c.is_lowercase())
}

/// Characters a range bound may contain before the `..`.
fn is_range_char(ch: char) -> bool {
    is_wordchar(ch) || matches!(ch, '%' | ',' | '-' | '.' | '/' | ':' | '@' | '$' | '£' | '€')
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Default,
    InQuotes,
    InPrefixedQuotes,
    InGroup,
    ExplicitSynonym,
}

struct Lexer<'p, 'd> {
    parser: &'p QueryParser<'d>,
    flags: u32,
    qs: String,
    chars: Vec<(usize, char)>,
    i: usize,
    mode: Mode,
    prefix_stack: Vec<PrefixInfo>,
    tokens: Vec<Token>,
    term_pos: u32,
    /// True while lexing the token right after a boolean operator.
    after_operator: bool,
    /// The character before the one being examined (space at start).
    prev: char,
    /// Prefix resolved by `try_lex_prefix`, consumed by `lex_word`.
    pending_prefix: Option<PrefixInfo>,
    corrected_query: String,
    correction_offset: i64,
}

pub(crate) fn lex(
    parser: &QueryParser<'_>,
    qs: &str,
    flags: u32,
    default_prefix: &str,
) -> Result<LexOutput> {
    let default_info = if default_prefix.is_empty() {
        parser
            .prefixes
            .get("")
            .cloned()
            .unwrap_or_else(|| PrefixInfo {
                filter: false,
                prefixes: vec![String::new()],
            })
    } else {
        PrefixInfo {
            filter: false,
            prefixes: vec![default_prefix.to_string()],
        }
    };
    let mut lexer = Lexer {
        parser,
        flags,
        qs: qs.to_string(),
        chars: qs.char_indices().collect(),
        i: 0,
        mode: Mode::Default,
        prefix_stack: vec![default_info],
        tokens: Vec::new(),
        term_pos: 1,
        after_operator: false,
        prev: ' ',
        pending_prefix: None,
        corrected_query: String::new(),
        correction_offset: 0,
    };
    lexer.run()?;
    Ok(LexOutput {
        tokens: lexer.tokens,
        corrected_query: lexer.corrected_query,
    })
}

impl<'p, 'd> Lexer<'p, 'd> {
    fn cur(&self) -> Option<char> {
        self.chars.get(self.i).map(|&(_, c)| c)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.i)
            .map(|&(o, _)| o)
            .unwrap_or(self.qs.len())
    }

    fn flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn term_exists(&self, term: &str) -> bool {
        match self.parser.db {
            Some(db) => db.term_exists(term.as_bytes()).unwrap_or(false),
            None => false,
        }
    }

    fn run(&mut self) -> Result<()> {
        let value_ranges = !self.parser.vrps.is_empty() && self.qs.contains("..");
        while self.i < self.chars.len() {
            let was_after_operator = self.after_operator;
            self.after_operator = false;

            let ch = match self.cur() {
                Some(c) => c,
                None => break,
            };
            if ch.is_whitespace() {
                self.prev = ' ';
                while self.cur().map_or(false, char::is_whitespace) {
                    self.i += 1;
                }
                self.after_operator = was_after_operator;
                continue;
            }

            if (self.mode == Mode::Default || self.mode == Mode::InGroup)
                && value_ranges
                && self.try_lex_range()
            {
                self.prev = 'A';
                continue;
            }

            let ch = match self.cur() {
                Some(c) => c,
                None => break,
            };
            if !is_wordchar(ch) {
                self.lex_punctuation(ch, was_after_operator);
                continue;
            }

            self.lex_word(was_after_operator)?;
        }
        // Implicitly close any unclosed quotes.
        if self.mode == Mode::InQuotes || self.mode == Mode::InPrefixedQuotes {
            let offset = self.qs.len();
            self.tokens.push(Token::Quote { offset });
            if self.mode == Mode::InPrefixedQuotes && self.prefix_stack.len() > 1 {
                self.prefix_stack.pop();
            }
        }
        Ok(())
    }

    fn lex_punctuation(&mut self, ch: char, was_after_operator: bool) {
        let prev = self.prev;
        let offset = self.offset();
        self.i += 1;
        self.prev = ch;
        if self.mode == Mode::InGroup {
            self.mode = Mode::Default;
        }
        match ch {
            '"' => {
                if self.mode == Mode::Default {
                    // Skip whitespace; ignore a trailing or empty quote.
                    while self.cur().map_or(false, char::is_whitespace) {
                        self.i += 1;
                    }
                    match self.cur() {
                        None => return,
                        Some('"') => {
                            self.prev = '"';
                            self.i += 1;
                            return;
                        }
                        _ => {}
                    }
                }
                if self.flag(super::FLAG_PHRASE) {
                    self.tokens.push(Token::Quote { offset });
                    if self.mode == Mode::Default {
                        self.mode = Mode::InQuotes;
                    } else {
                        if self.mode == Mode::InPrefixedQuotes && self.prefix_stack.len() > 1 {
                            self.prefix_stack.pop();
                        }
                        self.mode = Mode::Default;
                    }
                }
            }
            '+' | '-' => {
                if self.i >= self.chars.len() {
                    return;
                }
                if prev > ' ' && prev != '(' {
                    return;
                }
                let next = self.cur().unwrap_or(' ');
                if next.is_whitespace() || next == '+' || next == '-' {
                    return;
                }
                if self.mode == Mode::Default && self.flag(super::FLAG_LOVEHATE) {
                    let token = if ch == '+' {
                        Token::Love { offset }
                    } else if was_after_operator {
                        Token::HateAfterAnd { offset }
                    } else {
                        Token::Hate { offset }
                    };
                    self.tokens.push(token);
                    // The loved/hated term must not start a group.
                    self.after_operator = true;
                }
            }
            '(' => {
                while self.cur().map_or(false, char::is_whitespace) {
                    self.i += 1;
                }
                if self.i >= self.chars.len() {
                    return;
                }
                if prev > ' ' && !matches!(prev, '(' | ')' | '+' | '-') {
                    return;
                }
                if self.cur() == Some(')') {
                    self.prev = ')';
                    self.i += 1;
                    return;
                }
                if self.mode == Mode::Default && self.flag(super::FLAG_BOOLEAN) {
                    let top = self.prefix_stack.last().cloned();
                    if let Some(top) = top {
                        self.prefix_stack.push(top);
                    }
                    self.tokens.push(Token::Bra { offset });
                }
            }
            ')' => {
                if self.mode == Mode::Default && self.flag(super::FLAG_BOOLEAN) {
                    if self.prefix_stack.len() > 1 {
                        self.prefix_stack.pop();
                    }
                    self.tokens.push(Token::Ket { offset });
                }
            }
            '~' => {
                if self.i >= self.chars.len() {
                    return;
                }
                if self.mode == Mode::Default && self.flag(super::FLAG_SYNONYM) {
                    if prev > ' ' && !matches!(prev, '+' | '-' | '(') {
                        return;
                    }
                    if !self.cur().map_or(false, is_wordchar) {
                        return;
                    }
                    self.tokens.push(Token::Synonym { offset });
                    self.mode = Mode::ExplicitSynonym;
                    self.after_operator = true;
                }
            }
            _ => {}
        }
    }

    /// Attempt to lex `lo..hi`; returns whether a range was consumed.
    fn try_lex_range(&mut self) -> bool {
        let mut j = self.i;
        let mut prev_dot = false;
        while let Some(&(_, ch)) = self.chars.get(j) {
            if prev_dot && ch == '.' {
                // Found "..": the char after must start the range end.
                let after = self.chars.get(j + 1).map(|&(_, c)| c);
                match after {
                    None => return false,
                    Some(c) if c <= ' ' || c == ')' => return false,
                    _ => {}
                }
                let start_offset = self.chars[self.i].0;
                let dot_offset = self.chars[j - 1].0;
                let start_text = self.qs[start_offset..dot_offset].to_string();
                // Collect the range end: anything until whitespace or ')'.
                let mut k = j + 1;
                while let Some(&(_, c)) = self.chars.get(k) {
                    if c <= ' ' || c == ')' {
                        break;
                    }
                    k += 1;
                }
                let end_from = self.chars[j + 1].0;
                let end_to = self
                    .chars
                    .get(k)
                    .map(|&(o, _)| o)
                    .unwrap_or(self.qs.len());
                let end_text = self.qs[end_from..end_to].to_string();
                self.tokens.push(Token::RangeStart {
                    text: start_text,
                    offset: start_offset,
                });
                self.tokens.push(Token::RangeEnd {
                    text: end_text,
                    offset: end_from,
                });
                self.i = k;
                return true;
            }
            if !is_range_char(ch) {
                return false;
            }
            prev_dot = ch == '.';
            j += 1;
        }
        false
    }

    fn lex_word(&mut self, was_after_operator: bool) -> Result<()> {
        // A term, a field prefix, or a boolean operator.
        let mut prefixinfo: Option<PrefixInfo> = None;
        if matches!(
            self.mode,
            Mode::Default | Mode::InGroup | Mode::ExplicitSynonym
        ) && !self.parser.prefixes.is_empty()
        {
            if let Some(handled) = self.try_lex_prefix()? {
                if handled {
                    return Ok(());
                }
            }
            // try_lex_prefix may have advanced past "field:".
            prefixinfo = self.pending_prefix.take();
        }

        let mut in_chain = false;
        loop {
            let term_start = self.offset();
            let (term, was_acronym) = self.parse_term();

            // Boolean operators.
            if !in_chain
                && matches!(self.mode, Mode::Default | Mode::InGroup)
                && self.flag(super::FLAG_BOOLEAN)
                && !was_acronym
                && prefixinfo.is_none()
                && (2..=4).contains(&term.len())
                && term.chars().next().map_or(false, |c| c.is_alphabetic())
                && self.lex_operator(&term, term_start)
            {
                self.after_operator = true;
                self.mode = Mode::Default;
                self.prev = 'A';
                return Ok(());
            }

            let info = prefixinfo
                .clone()
                .or_else(|| self.prefix_stack.last().cloned())
                .unwrap_or(PrefixInfo {
                    filter: false,
                    prefixes: vec![String::new()],
                });

            let unstemmed = term.clone();
            let name = term.to_lowercase();

            // Stem unless prevented by strategy, a missing stemmer, a
            // term that looks unstemable, or a stem-preventing follower.
            let mut stem = self.parser.stem_strategy;
            if self.parser.stemmer.is_none() {
                stem = StemStrategy::None;
            } else if stem == StemStrategy::Some {
                let preventer = self.cur().map_or(false, is_stem_preventer);
                if !should_stem(&unstemmed) || preventer {
                    stem = StemStrategy::None;
                }
            }

            let token = TermToken {
                name,
                unstemmed,
                prefixes: info.prefixes.clone(),
                stem,
                pos: self.term_pos,
                offset: term_start,
            };
            self.term_pos += 1;

            if matches!(self.mode, Mode::Default | Mode::InGroup) {
                if self.flag(super::FLAG_WILDCARD) && self.cur() == Some('*') {
                    let after_star = self.peek(1);
                    if after_star.map_or(true, |c| !is_wordchar(c)) {
                        self.i += 1;
                        self.tokens.push(Token::WildTerm(token));
                        self.prev = '*';
                        return Ok(());
                    }
                } else if self.i >= self.chars.len() && self.flag(super::FLAG_PARTIAL) {
                    self.tokens.push(Token::PartialTerm(token));
                    return Ok(());
                }
            }

            // Spelling correction for plain unprefixed terms.
            if self.flag(super::FLAG_SPELLING_CORRECTION)
                && !was_acronym
                && !in_chain
                && token.prefixes.iter().any(|p| p.is_empty())
            {
                self.maybe_correct_spelling(&token.name, term_start);
            }

            let emitted_kind = if in_chain {
                Token::PhrTerm(token)
            } else {
                // Demote to a plain TERM when the group is about to turn
                // into a phrase chain.
                let mut group = self.mode == Mode::InGroup;
                if group && self.phrase_chain_follows() {
                    group = false;
                    self.mode = Mode::Default;
                }
                if group {
                    Token::GroupTerm(token)
                } else {
                    Token::Term(token)
                }
            };
            self.tokens.push(emitted_kind);
            self.prev = 'A';

            if matches!(
                self.mode,
                Mode::InQuotes | Mode::InPrefixedQuotes | Mode::ExplicitSynonym
            ) {
                if self.mode == Mode::ExplicitSynonym {
                    self.mode = Mode::Default;
                }
                return Ok(());
            }

            // Phrase generators splice adjacent words into a phrase.
            if self.cur().map_or(false, is_phrase_generator) {
                let mut k = self.i;
                while self.chars.get(k).map_or(false, |&(_, c)| is_phrase_generator(c)) {
                    k += 1;
                }
                if self.chars.get(k).map_or(false, |&(_, c)| is_wordchar(c)) {
                    // Later links of the chain keep the first term's
                    // field prefix.
                    self.i = k;
                    in_chain = true;
                    continue;
                }
            }

            // Adjacent whitespace-separated words form a group.
            self.mode = Mode::Default;
            if !was_after_operator && self.cur().map_or(false, char::is_whitespace) {
                let mut k = self.i;
                while self.chars.get(k).map_or(false, |&(_, c)| c.is_whitespace()) {
                    k += 1;
                }
                if self.chars.get(k).map_or(false, |&(_, c)| is_wordchar(c)) {
                    self.mode = Mode::InGroup;
                }
            }
            return Ok(());
        }
    }

    /// True when the upcoming characters continue this group as a
    /// phrase (generator chars immediately followed by a word).
    fn phrase_chain_follows(&self) -> bool {
        let mut k = self.i;
        if !self.chars.get(k).map_or(false, |&(_, c)| is_phrase_generator(c)) {
            return false;
        }
        while self.chars.get(k).map_or(false, |&(_, c)| is_phrase_generator(c)) {
            k += 1;
        }
        self.chars.get(k).map_or(false, |&(_, c)| is_wordchar(c))
    }

    /// Parse one term at the cursor: acronyms, infix characters,
    /// retained `+`/`#` suffixes.
    fn parse_term(&mut self) -> (String, bool) {
        let mut term = String::new();
        let mut was_acronym = false;

        // Initials separated by '.' (e.g. P.T.O., U.N.C.L.E.).
        if self.cur().map_or(false, |c| c.is_uppercase()) {
            let mut t = String::new();
            let mut p = self.i;
            loop {
                let Some(&(_, c)) = self.chars.get(p) else { break };
                if !c.is_uppercase() {
                    break;
                }
                t.push(c);
                p += 1;
                match self.chars.get(p) {
                    Some(&(_, '.')) => p += 1,
                    _ => break,
                }
            }
            // One letter does not make an acronym.
            if t.chars().count() > 1
                && !self.chars.get(p).map_or(false, |&(_, c)| is_wordchar(c))
            {
                self.i = p;
                term = t;
                was_acronym = true;
            }
        }

        if term.is_empty() {
            let mut prevch = self.cur().unwrap_or(' ');
            term.push(prevch);
            self.i += 1;
            while let Some(ch) = self.cur() {
                let keep = if is_wordchar(ch) {
                    Some(ch)
                } else {
                    // A single embedded separator stays when flanked by
                    // word characters.
                    let nextch = self.peek(1);
                    match nextch {
                        Some(n) if is_wordchar(n) => {
                            if prevch.is_ascii_digit() && n.is_ascii_digit() {
                                check_infix_digit(ch)
                            } else {
                                check_infix(ch)
                            }
                        }
                        _ => None,
                    }
                };
                match keep {
                    Some(c) => {
                        term.push(c);
                        prevch = c;
                        self.i += 1;
                    }
                    None => break,
                }
            }

            // Keep trailing + or # (C++, C#, Na+) when the database
            // knows the suffixed form, up to three suffix characters.
            if self.cur().map_or(false, is_suffix_char) {
                let mut suffixed = term.clone();
                let mut p = self.i;
                let mut ok = true;
                while self.chars.get(p).map_or(false, |&(_, c)| is_suffix_char(c)) {
                    if suffixed.len() - term.len() == 3 {
                        ok = false;
                        break;
                    }
                    suffixed.push(self.chars[p].1);
                    p += 1;
                }
                if ok && !self.chars.get(p).map_or(false, |&(_, c)| is_wordchar(c)) {
                    let lc = suffixed.to_lowercase();
                    let use_suffixed = if self.term_exists(&lc) {
                        true
                    } else {
                        !self.term_exists(&term.to_lowercase())
                    };
                    if use_suffixed {
                        term = suffixed;
                        self.i = p;
                    }
                }
            }
        }
        (term, was_acronym)
    }

    fn lex_operator(&mut self, term: &str, offset: usize) -> bool {
        let op = if self.flag(super::FLAG_BOOLEAN_ANY_CASE) {
            term.to_uppercase()
        } else {
            term.to_string()
        };
        match op.as_str() {
            "AND" => {
                self.tokens.push(Token::And { offset });
                true
            }
            "NOT" => {
                self.tokens.push(Token::Not { offset });
                true
            }
            "XOR" => {
                self.tokens.push(Token::Xor { offset });
                true
            }
            "OR" => {
                self.tokens.push(Token::Or { offset });
                true
            }
            "NEAR" | "ADJ" => {
                let window = self.lex_op_window();
                let token = if op == "NEAR" {
                    Token::Near { window, offset }
                } else {
                    Token::Adj { window, offset }
                };
                self.tokens.push(token);
                true
            }
            _ => false,
        }
    }

    /// Optional "/n" after NEAR or ADJ.
    fn lex_op_window(&mut self) -> Option<u32> {
        if self.cur() != Some('/') {
            return None;
        }
        let mut p = self.i + 1;
        let mut width: u32 = 0;
        let mut digits = 0;
        while let Some(&(_, c)) = self.chars.get(p) {
            let Some(d) = c.to_digit(10) else { break };
            width = width.saturating_mul(10).saturating_add(d);
            digits += 1;
            p += 1;
        }
        if digits == 0 || width == 0 {
            return None;
        }
        match self.chars.get(p) {
            None => {}
            Some(&(_, c)) if c.is_whitespace() => {}
            _ => return None,
        }
        self.i = p;
        Some(width)
    }

    /// Handle `field:...` forms. `Ok(Some(true))` means a token was
    /// fully handled; otherwise lexing continues (possibly with
    /// `pending_prefix` set and the cursor past the colon).
    fn try_lex_prefix(&mut self) -> Result<Option<bool>> {
        let mut p = self.i;
        while self.chars.get(p).map_or(false, |&(_, c)| is_wordchar(c)) {
            p += 1;
        }
        if self.chars.get(p).map(|&(_, c)| c) != Some(':') {
            return Ok(None);
        }
        let after = self.chars.get(p + 1).map(|&(_, c)| c);
        match after {
            None => return Ok(None),
            Some(c) if c <= ' ' || c == ')' => return Ok(None),
            _ => {}
        }
        let field: String = self.chars[self.i..p].iter().map(|&(_, c)| c).collect();
        let Some(info) = self.parser.prefixes.get(&field).cloned() else {
            return Ok(None);
        };
        let after = after.unwrap_or(' ');
        let offset = self.offset();

        if info.filter {
            if self.mode == Mode::InGroup {
                self.mode = Mode::Default;
            }
            self.i = p + 1;
            let mut name = String::new();
            if self.cur() == Some('"') {
                // Quoted boolean term: any characters, "" escapes ".
                self.i += 1;
                while let Some(c) = self.cur() {
                    if c == '"' {
                        self.i += 1;
                        if self.cur() != Some('"') {
                            break;
                        }
                    }
                    name.push(self.cur().unwrap_or('"'));
                    self.i += 1;
                }
            } else {
                while let Some(c) = self.cur() {
                    if c <= ' ' || c == ')' {
                        break;
                    }
                    name.push(c);
                    self.i += 1;
                }
            }
            self.tokens.push(Token::BooleanFilter(TermToken {
                name,
                unstemmed: field,
                prefixes: info.prefixes,
                stem: StemStrategy::None,
                pos: 0,
                offset,
            }));
            self.prev = 'A';
            return Ok(Some(true));
        }

        if after == '"' && self.flag(super::FLAG_PHRASE) {
            // Prefixed phrase, e.g. subject:"space flight".
            self.mode = Mode::InPrefixedQuotes;
            self.tokens.push(Token::Quote { offset });
            self.i = p + 2;
            self.prev = '"';
            self.prefix_stack.push(info);
            return Ok(Some(true));
        }

        if after == '(' && self.flag(super::FLAG_BOOLEAN) {
            // Prefixed subexpression, e.g. title:(fast NEAR food).
            self.mode = Mode::Default;
            self.tokens.push(Token::Bra { offset });
            self.i = p + 2;
            self.prev = '(';
            self.prefix_stack.push(info);
            return Ok(Some(true));
        }

        if is_wordchar(after) {
            // Prefixed term.
            self.i = p + 1;
            self.pending_prefix = Some(info);
            return Ok(Some(false));
        }
        // Looks like a prefix but is not; lex as plain text.
        Ok(None)
    }

    fn maybe_correct_spelling(&mut self, term: &str, term_start: usize) {
        let Some(db) = self.parser.db else { return };
        if db.term_exists(term.as_bytes()).unwrap_or(true) {
            return;
        }
        let Ok(Some(suggestion)) = db.get_spelling_suggestion(term.as_bytes()) else {
            return;
        };
        let suggestion = String::from_utf8_lossy(&suggestion).into_owned();
        if self.corrected_query.is_empty() {
            self.corrected_query = self.qs.clone();
        }
        let term_end = self.offset();
        let n = term_end - term_start;
        let at = (term_start as i64 + self.correction_offset) as usize;
        self.corrected_query.replace_range(at..at + n, &suggestion);
        self.correction_offset += suggestion.len() as i64 - n as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::super::{QueryParser, FLAG_BOOLEAN, FLAG_DEFAULT, FLAG_LOVEHATE, FLAG_WILDCARD};
    use super::*;

    fn lex_kinds(qs: &str, flags: u32) -> Vec<String> {
        let parser = QueryParser::new();
        let out = lex(&parser, qs, flags, "").unwrap();
        out.tokens
            .iter()
            .map(|t| match t {
                Token::Term(t) => format!("T:{}", t.name),
                Token::GroupTerm(t) => format!("G:{}", t.name),
                Token::PhrTerm(t) => format!("P:{}", t.name),
                Token::WildTerm(t) => format!("W:{}", t.name),
                Token::PartialTerm(t) => format!("PA:{}", t.name),
                Token::BooleanFilter(t) => format!("F:{}", t.name),
                Token::RangeStart { text, .. } => format!("RS:{}", text),
                Token::RangeEnd { text, .. } => format!("RE:{}", text),
                Token::Quote { .. } => "QUOTE".into(),
                Token::Bra { .. } => "BRA".into(),
                Token::Ket { .. } => "KET".into(),
                Token::And { .. } => "AND".into(),
                Token::Or { .. } => "OR".into(),
                Token::Not { .. } => "NOT".into(),
                Token::Xor { .. } => "XOR".into(),
                Token::Near { window, .. } => format!("NEAR:{:?}", window),
                Token::Adj { window, .. } => format!("ADJ:{:?}", window),
                Token::Love { .. } => "LOVE".into(),
                Token::Hate { .. } => "HATE".into(),
                Token::HateAfterAnd { .. } => "HATE_AFTER_AND".into(),
                Token::Synonym { .. } => "SYN".into(),
            })
            .collect()
    }

    #[test]
    fn test_simple_terms_group() {
        assert_eq!(
            lex_kinds("quick brown fox", FLAG_DEFAULT),
            vec!["T:quick", "G:brown", "G:fox"]
        );
    }

    #[test]
    fn test_boolean_operators() {
        assert_eq!(
            lex_kinds("cat AND dog OR fish", FLAG_BOOLEAN),
            vec!["T:cat", "AND", "T:dog", "OR", "T:fish"]
        );
        // Lowercase is not an operator without ANY_CASE.
        assert_eq!(
            lex_kinds("cat and dog", FLAG_BOOLEAN),
            vec!["T:cat", "G:and", "G:dog"]
        );
    }

    #[test]
    fn test_love_hate() {
        assert_eq!(
            lex_kinds("+quick -brown", FLAG_LOVEHATE),
            vec!["LOVE", "T:quick", "HATE", "T:brown"]
        );
    }

    #[test]
    fn test_hate_after_and() {
        assert_eq!(
            lex_kinds("cat AND -dog", FLAG_BOOLEAN | FLAG_LOVEHATE),
            vec!["T:cat", "AND", "HATE_AFTER_AND", "T:dog"]
        );
    }

    #[test]
    fn test_phrase_generators() {
        assert_eq!(
            lex_kinds("mission-critical", FLAG_DEFAULT),
            vec!["T:mission", "P:critical"]
        );
    }

    #[test]
    fn test_quoted_phrase() {
        assert_eq!(
            lex_kinds("\"quick brown\" fox", FLAG_DEFAULT),
            vec!["QUOTE", "T:quick", "T:brown", "QUOTE", "T:fox"]
        );
    }

    #[test]
    fn test_unmatched_quote_closed() {
        assert_eq!(
            lex_kinds("\"quick brown", FLAG_DEFAULT),
            vec!["QUOTE", "T:quick", "T:brown", "QUOTE"]
        );
    }

    #[test]
    fn test_acronym() {
        // Initials collapse to the bare letters, and are never mistaken
        // for boolean operators.
        assert_eq!(lex_kinds("P.T.O. boss", FLAG_DEFAULT), vec!["T:pto", "G:boss"]);
        assert_eq!(lex_kinds("A.N.D. term", FLAG_DEFAULT), vec!["T:and", "G:term"]);
    }

    #[test]
    fn test_infix_characters() {
        assert_eq!(
            lex_kinds("AT&T isn't 1,000", FLAG_DEFAULT),
            vec!["T:at&t", "G:isn't", "G:1,000"]
        );
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            lex_kinds("prog* plain", FLAG_DEFAULT | FLAG_WILDCARD),
            vec!["W:prog", "T:plain"]
        );
    }

    #[test]
    fn test_near_with_width() {
        assert_eq!(
            lex_kinds("cat NEAR/3 dog", FLAG_BOOLEAN),
            vec!["T:cat", "NEAR:Some(3)", "T:dog"]
        );
        assert_eq!(
            lex_kinds("cat ADJ dog", FLAG_BOOLEAN),
            vec!["T:cat", "ADJ:None", "T:dog"]
        );
    }

    #[test]
    fn test_brackets() {
        assert_eq!(
            lex_kinds("(cat OR dog) fish", FLAG_BOOLEAN),
            vec!["BRA", "T:cat", "OR", "T:dog", "KET", "T:fish"]
        );
    }

    #[test]
    fn test_prefix_handling() {
        let mut parser = QueryParser::new();
        parser.add_prefix("title", "S").unwrap();
        let out = lex(&parser, "title:history plain", FLAG_DEFAULT, "").unwrap();
        match &out.tokens[0] {
            Token::Term(t) => {
                assert_eq!(t.name, "history");
                assert_eq!(t.prefixes, vec!["S".to_string()]);
            }
            other => panic!("expected prefixed term, got {:?}", other),
        }
        match &out.tokens[1] {
            // Whitespace-adjacent, so it joins the group; and it must
            // fall back to the empty prefix.
            Token::GroupTerm(t) => assert_eq!(t.prefixes, vec![String::new()]),
            other => panic!("expected plain group term, got {:?}", other),
        }
    }

    #[test]
    fn test_boolean_filter_prefix() {
        let mut parser = QueryParser::new();
        parser.add_boolean_prefix("site", "H").unwrap();
        let out = lex(&parser, "site:example.com quick", FLAG_DEFAULT, "").unwrap();
        match &out.tokens[0] {
            Token::BooleanFilter(t) => {
                assert_eq!(t.name, "example.com");
                assert_eq!(t.prefixes, vec!["H".to_string()]);
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_range_tokens() {
        use super::super::StringValueRangeProcessor;
        use std::sync::Arc;
        let mut parser = QueryParser::new();
        parser.add_value_range_processor(Arc::new(StringValueRangeProcessor::new(0)));
        let out = lex(&parser, "hello..world", FLAG_DEFAULT, "").unwrap();
        let kinds: Vec<String> = out
            .tokens
            .iter()
            .map(|t| match t {
                Token::RangeStart { text, .. } => format!("RS:{}", text),
                Token::RangeEnd { text, .. } => format!("RE:{}", text),
                _ => "?".into(),
            })
            .collect();
        assert_eq!(kinds, vec!["RS:hello", "RE:world"]);
    }
}
