//! The parser: reduces the token stream into a [`Query`] tree.
//!
//! Operator precedence climbs OR < XOR < AND/NOT, all left-associative.
//! Between boolean operators sits the probabilistic sequence: terms and
//! term groups joined by the default operator, `+`/`-` terms, boolean
//! filters grouped by prefix (OR within a group, AND across groups) and
//! value ranges. `AND -term` reduces exactly like `AND NOT term`; the
//! two differ only in which operator a syntax error names.

use std::collections::BTreeMap;

use super::lexer::{TermToken, Token};
use super::{DefaultOp, QueryParser, StemStrategy};
use crate::error::{NautexError, Result};
use crate::query::{CombinableOp, Query};

/// Filter terms group by (prefix set, value slot): within a group OR,
/// across groups AND.
type FilterGroupId = (Vec<String>, Option<u32>);

#[derive(Default)]
struct Prob {
    query: Query,
    love: Query,
    hate: Query,
    filters: BTreeMap<FilterGroupId, Query>,
}

impl Prob {
    fn is_empty(&self) -> bool {
        self.query.is_empty()
            && self.love.is_empty()
            && self.hate.is_empty()
            && self.filters.is_empty()
    }

    fn add_default(&mut self, q: Query, op: DefaultOp) {
        let op = match op {
            DefaultOp::Or => CombinableOp::Or,
            DefaultOp::And => CombinableOp::And,
        };
        self.query = Query::combine(op, std::mem::take(&mut self.query), q);
    }

    fn add_filter(&mut self, id: FilterGroupId, q: Query) {
        let entry = self.filters.entry(id).or_insert(Query::Empty);
        *entry = Query::combine(CombinableOp::Or, std::mem::take(entry), q);
    }

    fn merge_filters(&mut self) -> Query {
        let mut merged = Query::Empty;
        for (_, q) in std::mem::take(&mut self.filters) {
            merged = Query::combine(CombinableOp::And, merged, q);
        }
        merged
    }

    /// Assemble: probabilistic part, then loves (AND_MAYBE), then
    /// filters (FILTER, or weight-scaled alone), then hates (AND_NOT).
    fn finalize(mut self) -> Result<Query> {
        let mut q = std::mem::take(&mut self.query);
        if !self.love.is_empty() {
            let love = std::mem::take(&mut self.love);
            q = if q.is_empty() {
                love
            } else {
                Query::AndMaybe(Box::new(love), Box::new(q))
            };
        }
        if !self.filters.is_empty() {
            let merged = self.merge_filters();
            q = if q.is_empty() {
                Query::ScaleWeight {
                    factor: 0.0,
                    subquery: Box::new(merged),
                }
            } else {
                Query::Filter(Box::new(q), Box::new(merged))
            };
        }
        if !self.hate.is_empty() {
            if q.is_empty() {
                return Err(NautexError::QueryParse {
                    message: "Syntax: <expression> NOT <expression>".into(),
                    offset: 0,
                });
            }
            q = Query::AndNot(Box::new(q), Box::new(std::mem::take(&mut self.hate)));
        }
        Ok(q)
    }
}

pub(crate) struct Parser<'p, 'd> {
    qp: &'p QueryParser<'d>,
    flags: u32,
    tokens: Vec<Token>,
    i: usize,
    stoplist: Vec<String>,
}

impl<'p, 'd> Parser<'p, 'd> {
    pub fn new(qp: &'p QueryParser<'d>, flags: u32, tokens: Vec<Token>) -> Parser<'p, 'd> {
        Parser {
            qp,
            flags,
            tokens,
            i: 0,
            stoplist: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<(Query, Vec<String>)> {
        if self.tokens.is_empty() {
            return Ok((Query::Empty, Vec::new()));
        }
        let query = self.parse_expr(0)?;
        if let Some(token) = self.peek() {
            return Err(self.error_at("unexpected token", token.offset()));
        }
        Ok((query, std::mem::take(&mut self.stoplist)))
    }

    fn flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.i)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.i + ahead)
    }

    fn error_at(&self, message: impl Into<String>, offset: usize) -> NautexError {
        NautexError::QueryParse {
            message: message.into(),
            offset,
        }
    }

    fn op_error(&self, op_text: &str, offset: usize) -> NautexError {
        self.error_at(
            format!("Syntax: <expression> {} <expression>", op_text),
            offset,
        )
    }

    // ---- expression level ----

    fn parse_expr(&mut self, min_prec: u8) -> Result<Query> {
        let mut lhs = self.parse_operand()?;
        loop {
            // (operator text, precedence, builds-AND_NOT, extra tokens)
            let (prec, offset) = match self.peek() {
                Some(Token::Or { offset }) => (0u8, *offset),
                Some(Token::Xor { offset }) => (1, *offset),
                Some(Token::And { offset }) | Some(Token::Not { offset }) => (2, *offset),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            let token = self.tokens[self.i].clone();
            self.i += 1;
            match token {
                Token::Or { offset } => {
                    let rhs = self.parse_expr(prec + 1)?;
                    if lhs.is_empty() || rhs.is_empty() {
                        return Err(self.op_error("OR", offset));
                    }
                    lhs = Query::combine(CombinableOp::Or, lhs, rhs);
                }
                Token::Xor { offset } => {
                    let rhs = self.parse_expr(prec + 1)?;
                    if lhs.is_empty() || rhs.is_empty() {
                        return Err(self.op_error("XOR", offset));
                    }
                    lhs = Query::Xor(Box::new(lhs), Box::new(rhs));
                }
                Token::And { offset } => {
                    // AND NOT and AND -term reduce to AND_NOT; the
                    // latter differs only in the operator an error
                    // message names.
                    let (negated, op_text) = match self.peek() {
                        Some(Token::Not { .. }) => {
                            self.i += 1;
                            (true, "AND NOT")
                        }
                        Some(Token::HateAfterAnd { .. }) => {
                            self.i += 1;
                            (true, "AND")
                        }
                        _ => (false, "AND"),
                    };
                    let rhs = self.parse_expr(prec + 1)?;
                    if lhs.is_empty() || rhs.is_empty() {
                        return Err(self.op_error(op_text, offset));
                    }
                    lhs = if negated {
                        Query::AndNot(Box::new(lhs), Box::new(rhs))
                    } else {
                        Query::combine(CombinableOp::And, lhs, rhs)
                    };
                }
                Token::Not { offset } => {
                    let rhs = self.parse_expr(prec + 1)?;
                    if lhs.is_empty() {
                        if !self.flag(super::FLAG_PURE_NOT) {
                            return Err(self.op_error("NOT", offset));
                        }
                        // 'NOT foo' matches everything except foo.
                        lhs = Query::All;
                    }
                    if rhs.is_empty() {
                        return Err(self.op_error("NOT", offset));
                    }
                    lhs = Query::AndNot(Box::new(lhs), Box::new(rhs));
                }
                _ => unreachable!("peek guaranteed an operator"),
            }
        }
        Ok(lhs)
    }

    // ---- probabilistic sequence ----

    fn parse_operand(&mut self) -> Result<Query> {
        let mut prob = Prob::default();
        let mut any = false;
        loop {
            match self.peek() {
                Some(
                    Token::Term(_)
                    | Token::GroupTerm(_)
                    | Token::WildTerm(_)
                    | Token::PartialTerm(_)
                    | Token::Quote { .. }
                    | Token::Bra { .. }
                    | Token::Synonym { .. },
                ) => {
                    if let Some(q) = self.parse_compound(true)? {
                        prob.add_default(q, self.qp.default_op);
                    }
                    any = true;
                }
                Some(Token::BooleanFilter(_)) => {
                    let Some(Token::BooleanFilter(t)) = self.peek().cloned() else {
                        unreachable!()
                    };
                    self.i += 1;
                    prob.add_filter((t.prefixes.clone(), None), self.filter_query(&t));
                    any = true;
                }
                Some(Token::Love { offset }) => {
                    let offset = *offset;
                    self.i += 1;
                    if let Some(Token::BooleanFilter(t)) = self.peek().cloned() {
                        // +filter is just the filter.
                        self.i += 1;
                        prob.add_filter((t.prefixes.clone(), None), self.filter_query(&t));
                    } else {
                        let Some(q) = self.parse_compound(false)? else {
                            return Err(self.error_at("Syntax: +<term>", offset));
                        };
                        if self.qp.default_op == DefaultOp::And {
                            // Love under AND only bypasses the stopper.
                            prob.add_default(q, DefaultOp::And);
                        } else {
                            prob.love =
                                Query::combine(CombinableOp::And, std::mem::take(&mut prob.love), q);
                        }
                    }
                    any = true;
                }
                Some(Token::Hate { offset }) => {
                    let offset = *offset;
                    self.i += 1;
                    let hated = if let Some(Token::BooleanFilter(t)) = self.peek().cloned() {
                        self.i += 1;
                        self.filter_query(&t)
                    } else {
                        match self.parse_compound(false)? {
                            Some(q) => q,
                            None => return Err(self.error_at("Syntax: -<term>", offset)),
                        }
                    };
                    prob.hate =
                        Query::combine(CombinableOp::Or, std::mem::take(&mut prob.hate), hated);
                    any = true;
                }
                Some(Token::RangeStart { .. }) => {
                    let Some(Token::RangeStart { text: lo, offset }) = self.peek().cloned() else {
                        unreachable!()
                    };
                    self.i += 1;
                    let Some(Token::RangeEnd { text: hi, .. }) = self.peek().cloned() else {
                        return Err(self.error_at("range is missing its end", offset));
                    };
                    self.i += 1;
                    let (slot, range) = self.value_range(lo, hi, offset)?;
                    prob.add_filter((Vec::new(), Some(slot)), range);
                    any = true;
                }
                _ => break,
            }
        }
        if !any {
            return Ok(Query::Empty);
        }
        prob.finalize()
    }

    /// One term-like unit: a term, group, phrase chain, NEAR/ADJ chain,
    /// quoted phrase, wildcard, partial, bracketed subexpression or
    /// `~term`. `None` when the unit dissolved into stopwords.
    fn parse_compound(&mut self, apply_stopper: bool) -> Result<Option<Query>> {
        match self.peek().cloned() {
            Some(Token::Term(t)) | Some(Token::GroupTerm(t)) => {
                self.i += 1;
                if matches!(self.peek(), Some(Token::PhrTerm(_))) {
                    let mut terms = vec![t];
                    while let Some(Token::PhrTerm(pt)) = self.peek() {
                        terms.push(pt.clone());
                        self.i += 1;
                    }
                    let window = terms.len() as u32;
                    return Ok(Some(self.phrase_query(terms, window, true)?));
                }
                if matches!(self.peek(), Some(Token::Near { .. } | Token::Adj { .. })) {
                    return self.positional_chain(t).map(Some);
                }
                if matches!(self.peek(), Some(Token::GroupTerm(_))) {
                    let mut terms = vec![t];
                    while let Some(Token::GroupTerm(g)) = self.peek() {
                        terms.push(g.clone());
                        self.i += 1;
                    }
                    let q = self.group_query(terms)?;
                    return Ok(if q.is_empty() { None } else { Some(q) });
                }
                if apply_stopper && self.is_stopword(&t) {
                    self.stoplist.push(t.name.clone());
                    return Ok(None);
                }
                Ok(Some(self.term_query_auto(&t)?))
            }
            Some(Token::WildTerm(t)) => {
                self.i += 1;
                Ok(Some(self.wildcard_query(&t)?))
            }
            Some(Token::PartialTerm(t)) => {
                self.i += 1;
                Ok(Some(self.partial_query(&t)?))
            }
            Some(Token::Quote { offset }) => {
                self.i += 1;
                let mut terms = Vec::new();
                loop {
                    match self.peek().cloned() {
                        Some(Token::Term(t)) => {
                            terms.push(t);
                            self.i += 1;
                        }
                        Some(Token::Quote { .. }) => {
                            self.i += 1;
                            break;
                        }
                        _ => return Err(self.error_at("unterminated phrase", offset)),
                    }
                }
                if terms.is_empty() {
                    return Ok(None);
                }
                let window = terms.len() as u32;
                Ok(Some(self.phrase_query(terms, window, true)?))
            }
            Some(Token::Bra { offset }) => {
                self.i += 1;
                let q = self.parse_expr(0)?;
                match self.peek() {
                    Some(Token::Ket { .. }) => {
                        self.i += 1;
                        Ok(Some(q))
                    }
                    _ => Err(self.error_at("unmatched (", offset)),
                }
            }
            Some(Token::Synonym { offset }) => {
                self.i += 1;
                match self.peek().cloned() {
                    Some(Token::Term(t)) | Some(Token::GroupTerm(t)) => {
                        self.i += 1;
                        Ok(Some(self.term_query_with_synonyms(&t)?))
                    }
                    _ => Err(self.error_at("Syntax: ~<term>", offset)),
                }
            }
            _ => Ok(None),
        }
    }

    /// TERM (NEAR|ADJ) TERM ... chains.
    fn positional_chain(&mut self, first: TermToken) -> Result<Query> {
        let mut terms = vec![first];
        let mut window: Option<u32> = None;
        let mut ordered: Option<bool> = None;
        loop {
            let (w, is_adj, offset) = match self.peek() {
                Some(Token::Near { window, offset }) => (*window, false, *offset),
                Some(Token::Adj { window, offset }) => (*window, true, *offset),
                _ => break,
            };
            if *ordered.get_or_insert(is_adj) != is_adj {
                return Err(self.error_at("cannot mix NEAR and ADJ", offset));
            }
            self.i += 1;
            if let Some(w) = w {
                window = Some(window.unwrap_or(0).max(w));
            }
            match self.peek().cloned() {
                Some(Token::Term(t)) | Some(Token::GroupTerm(t)) => {
                    terms.push(t);
                    self.i += 1;
                }
                _ => {
                    let name = if is_adj { "ADJ" } else { "NEAR" };
                    return Err(self.op_error(name, offset));
                }
            }
        }
        let explicit = window.unwrap_or(10);
        if ordered == Some(true) {
            // ADJ/n: in order, spread at most n; the phrase window is
            // one wider since it bounds the exclusive span.
            self.phrase_query(terms, explicit + 1, false)
        } else {
            let subqueries = self.positional_terms(terms)?;
            Ok(Query::Near {
                subqueries,
                window: explicit,
            })
        }
    }

    fn positional_terms(&mut self, terms: Vec<TermToken>) -> Result<Vec<Query>> {
        terms
            .into_iter()
            .map(|mut t| {
                // Positional use pins the exact form: no Z-stemming.
                if t.stem == StemStrategy::Some {
                    t.stem = StemStrategy::None;
                }
                let prefix = t.prefixes.first().cloned().unwrap_or_default();
                Ok(Query::Term {
                    term: self.make_term_text(&t, &prefix).into_bytes(),
                    wqf: 1,
                    pos: t.pos,
                })
            })
            .collect()
    }

    fn phrase_query(
        &mut self,
        terms: Vec<TermToken>,
        window: u32,
        collapse_single: bool,
    ) -> Result<Query> {
        if collapse_single && terms.len() == 1 {
            let t = &terms[0];
            return self.term_query_auto(t);
        }
        let subqueries = self.positional_terms(terms)?;
        Ok(Query::Phrase { subqueries, window })
    }

    /// A whitespace group: multiword synonym spans when enabled, else
    /// the terms joined by the default operator.
    fn group_query(&mut self, terms: Vec<TermToken>) -> Result<Query> {
        let multiword = self.flag(super::FLAG_AUTO_MULTIWORD_SYNONYMS) && self.qp.db.is_some();
        let mut parts: Vec<Query> = Vec::new();
        let mut i = 0;
        while i < terms.len() {
            if multiword {
                if let Some((span, expansions)) = self.longest_synonym_span(&terms, i)? {
                    // The matched span becomes SYNONYM(original group,
                    // expansions).
                    let mut group = Query::Empty;
                    for t in &terms[i..i + span] {
                        let q = self.term_query(t)?;
                        group = Query::combine(
                            match self.qp.default_op {
                                DefaultOp::Or => CombinableOp::Or,
                                DefaultOp::And => CombinableOp::And,
                            },
                            group,
                            q,
                        );
                    }
                    let mut subs = vec![group];
                    for expansion in expansions {
                        subs.push(Query::Term {
                            term: expansion,
                            wqf: 1,
                            pos: terms[i].pos,
                        });
                    }
                    parts.push(Query::Synonym(subs));
                    i += span;
                    continue;
                }
            }
            let t = &terms[i];
            if self.is_stopword(t) {
                self.stoplist.push(t.name.clone());
            } else {
                parts.push(self.term_query_auto(t)?);
            }
            i += 1;
        }
        let mut q = Query::Empty;
        for part in parts {
            q = Query::combine(
                match self.qp.default_op {
                    DefaultOp::Or => CombinableOp::Or,
                    DefaultOp::And => CombinableOp::And,
                },
                q,
                part,
            );
        }
        Ok(q)
    }

    /// Greedy longest multiword-synonym match starting at `terms[i]`.
    fn longest_synonym_span(
        &self,
        terms: &[TermToken],
        i: usize,
    ) -> Result<Option<(usize, Vec<Vec<u8>>)>> {
        let Some(db) = self.qp.db else { return Ok(None) };
        let keys = db.synonym_keys(terms[i].name.as_bytes())?;
        let mut best: Option<(usize, Vec<u8>)> = None;
        for key in keys {
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            let words: Vec<&str> = key_str.split(' ').collect();
            if words.len() < 2 || words.len() > terms.len() - i {
                continue;
            }
            let matches = words
                .iter()
                .zip(&terms[i..i + words.len()])
                .all(|(w, t)| *w == t.name);
            if matches && best.as_ref().map_or(true, |(n, _)| words.len() > *n) {
                best = Some((words.len(), key.clone()));
            }
        }
        match best {
            Some((span, key)) => {
                let expansions = db.synonyms(&key)?;
                Ok(Some((span, expansions)))
            }
            None => Ok(None),
        }
    }

    // ---- term -> query helpers ----

    fn is_stopword(&self, t: &TermToken) -> bool {
        match &self.qp.stopper {
            Some(stopper) => stopper.is_stopword(&t.name),
            None => false,
        }
    }

    fn prefix_needs_colon(prefix: &str, name: &str) -> bool {
        let first_upper = name.chars().next().map_or(false, |c| c.is_uppercase());
        first_upper && prefix.len() > 1 && !prefix.ends_with(':')
    }

    /// The indexable form of a term under one prefix: optional `Z`
    /// marker for stemmed forms, the prefix (with `:` separator where
    /// the body could be confused for more prefix), then the body.
    fn make_term_text(&self, t: &TermToken, prefix: &str) -> String {
        let mut out = String::new();
        if t.stem == StemStrategy::Some {
            out.push('Z');
        }
        if !prefix.is_empty() {
            out.push_str(prefix);
            if Self::prefix_needs_colon(prefix, &t.name) {
                out.push(':');
            }
        }
        match (&self.qp.stemmer, t.stem) {
            (Some(stemmer), StemStrategy::Some | StemStrategy::All) => {
                out.push_str(&stemmer.stem(&t.name))
            }
            _ => out.push_str(&t.name),
        }
        out
    }

    fn term_query(&self, t: &TermToken) -> Result<Query> {
        let mut q = Query::Empty;
        for prefix in &t.prefixes {
            let sub = Query::Term {
                term: self.make_term_text(t, prefix).into_bytes(),
                wqf: 1,
                pos: t.pos,
            };
            q = Query::combine(CombinableOp::Or, q, sub);
        }
        Ok(q)
    }

    fn term_query_auto(&self, t: &TermToken) -> Result<Query> {
        if self.flag(super::FLAG_AUTO_SYNONYMS) {
            self.term_query_with_synonyms(t)
        } else {
            self.term_query(t)
        }
    }

    /// The term plus any synonyms stored for it (unstemmed form first,
    /// falling back to the stemmed form).
    fn term_query_with_synonyms(&self, t: &TermToken) -> Result<Query> {
        let mut q = self.term_query(t)?;
        let Some(db) = self.qp.db else { return Ok(q) };
        for prefix in &t.prefixes {
            let mut plain = String::new();
            if !prefix.is_empty() {
                plain.push_str(prefix);
                if Self::prefix_needs_colon(prefix, &t.name) {
                    plain.push(':');
                }
            }
            plain.push_str(&t.name);
            let mut synonyms = db.synonyms(plain.as_bytes())?;
            if synonyms.is_empty() && t.stem != StemStrategy::None {
                let stemmed = self.make_term_text(t, prefix);
                synonyms = db.synonyms(stemmed.as_bytes())?;
            }
            for synonym in synonyms {
                q = Query::combine(
                    CombinableOp::Synonym,
                    q,
                    Query::Term {
                        term: synonym,
                        wqf: 1,
                        pos: t.pos,
                    },
                );
            }
        }
        Ok(q)
    }

    /// Right truncation: a synonym over every matching term.
    fn wildcard_query(&self, t: &TermToken) -> Result<Query> {
        let mut subs = Vec::new();
        if let Some(db) = self.qp.db {
            for prefix in &t.prefixes {
                let mut root = prefix.clone().into_bytes();
                root.extend_from_slice(t.name.as_bytes());
                for term in db.allterms_with_prefix(&root)? {
                    subs.push(Query::Term {
                        term,
                        wqf: 1,
                        pos: t.pos,
                    });
                }
            }
        }
        Ok(Query::Synonym(subs))
    }

    /// Partial (search-as-you-type) term: wildcard expansions OR the
    /// term as it would parse normally, so an exact hit outranks the
    /// truncated ones.
    fn partial_query(&self, t: &TermToken) -> Result<Query> {
        let wild = self.wildcard_query(t)?;
        let mut full = Vec::new();
        for prefix in &t.prefixes {
            full.push(Query::Term {
                term: self.make_term_text(t, prefix).into_bytes(),
                wqf: 1,
                pos: t.pos,
            });
        }
        Ok(Query::Or(vec![wild, Query::Synonym(full)]))
    }

    /// Filter terms use the name as typed, under each filter prefix.
    fn filter_query(&self, t: &TermToken) -> Query {
        let mut q = Query::Empty;
        for prefix in &t.prefixes {
            let mut text = String::new();
            text.push_str(prefix);
            if Self::prefix_needs_colon(prefix, &t.name) {
                text.push(':');
            }
            text.push_str(&t.name);
            q = Query::combine(CombinableOp::Or, q, Query::term(text));
        }
        q
    }

    /// Offer the range to each processor in order; first taker wins.
    fn value_range(&self, lo: String, hi: String, offset: usize) -> Result<(u32, Query)> {
        for vrp in &self.qp.vrps {
            let mut lo = lo.clone();
            let mut hi = hi.clone();
            if let Some(slot) = vrp.try_range(&mut lo, &mut hi) {
                return Ok((
                    slot,
                    Query::ValueRange {
                        slot,
                        lo: lo.into_bytes(),
                        hi: hi.into_bytes(),
                    },
                ));
            }
        }
        Err(self.error_at("Unknown range operation", offset))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::{
        DefaultOp, QueryParser, StringValueRangeProcessor, FLAG_BOOLEAN, FLAG_DEFAULT,
        FLAG_LOVEHATE, FLAG_PURE_NOT,
    };
    use crate::query::Query;

    fn parse(qs: &str, flags: u32) -> Query {
        QueryParser::new().parse_query(qs, flags).unwrap()
    }

    #[test]
    fn test_single_term() {
        assert_eq!(parse("fox", FLAG_DEFAULT), Query::term_at("fox", 1));
    }

    #[test]
    fn test_default_op_or() {
        let q = parse("quick fox", FLAG_DEFAULT);
        assert_eq!(
            q,
            Query::Or(vec![Query::term_at("quick", 1), Query::term_at("fox", 2)])
        );
    }

    #[test]
    fn test_default_op_and() {
        let mut qp = QueryParser::new();
        qp.set_default_op(DefaultOp::And);
        let q = qp.parse_query("quick fox", FLAG_DEFAULT).unwrap();
        assert_eq!(
            q,
            Query::And(vec![Query::term_at("quick", 1), Query::term_at("fox", 2)])
        );
    }

    #[test]
    fn test_boolean_operators() {
        let q = parse("cat AND dog", FLAG_BOOLEAN);
        assert_eq!(
            q,
            Query::And(vec![Query::term_at("cat", 1), Query::term_at("dog", 2)])
        );
        let q = parse("cat OR dog AND fish", FLAG_BOOLEAN);
        // AND binds tighter than OR.
        assert_eq!(
            q,
            Query::Or(vec![
                Query::term_at("cat", 1),
                Query::And(vec![Query::term_at("dog", 2), Query::term_at("fish", 3)]),
            ])
        );
    }

    #[test]
    fn test_and_not() {
        let q = parse("cat AND NOT dog", FLAG_BOOLEAN);
        assert_eq!(
            q,
            Query::AndNot(
                Box::new(Query::term_at("cat", 1)),
                Box::new(Query::term_at("dog", 2))
            )
        );
        // NOT alone between expressions behaves the same.
        assert_eq!(parse("cat NOT dog", FLAG_BOOLEAN), q);
    }

    #[test]
    fn test_hate_after_and_reduces_like_and_not() {
        let q = parse("cat AND -dog", FLAG_BOOLEAN | FLAG_LOVEHATE);
        assert_eq!(
            q,
            Query::AndNot(
                Box::new(Query::term_at("cat", 1)),
                Box::new(Query::term_at("dog", 2))
            )
        );
    }

    #[test]
    fn test_pure_not() {
        assert!(QueryParser::new()
            .parse_query("NOT dog", FLAG_BOOLEAN)
            .is_err());
        let q = parse("NOT dog", FLAG_BOOLEAN | FLAG_PURE_NOT);
        assert_eq!(
            q,
            Query::AndNot(Box::new(Query::All), Box::new(Query::term_at("dog", 1)))
        );
    }

    #[test]
    fn test_love_becomes_and_maybe() {
        let q = parse("+quick brown", FLAG_DEFAULT);
        assert_eq!(
            q,
            Query::AndMaybe(
                Box::new(Query::term_at("quick", 1)),
                Box::new(Query::term_at("brown", 2))
            )
        );
    }

    #[test]
    fn test_love_with_default_and_is_plain() {
        let mut qp = QueryParser::new();
        qp.set_default_op(DefaultOp::And);
        let q = qp.parse_query("+quick brown", FLAG_DEFAULT).unwrap();
        assert_eq!(
            q,
            Query::And(vec![Query::term_at("quick", 1), Query::term_at("brown", 2)])
        );
    }

    #[test]
    fn test_hate_becomes_and_not() {
        let q = parse("quick -brown", FLAG_DEFAULT);
        assert_eq!(
            q,
            Query::AndNot(
                Box::new(Query::term_at("quick", 1)),
                Box::new(Query::term_at("brown", 2))
            )
        );
    }

    #[test]
    fn test_hate_alone_is_an_error() {
        assert!(QueryParser::new().parse_query("-dog", FLAG_DEFAULT).is_err());
    }

    #[test]
    fn test_quoted_phrase() {
        let q = parse("\"quick brown\"", FLAG_DEFAULT);
        assert_eq!(
            q,
            Query::Phrase {
                subqueries: vec![Query::term_at("quick", 1), Query::term_at("brown", 2)],
                window: 2,
            }
        );
    }

    #[test]
    fn test_phrase_generators() {
        let q = parse("mission-critical", FLAG_DEFAULT);
        assert_eq!(
            q,
            Query::Phrase {
                subqueries: vec![Query::term_at("mission", 1), Query::term_at("critical", 2)],
                window: 2,
            }
        );
    }

    #[test]
    fn test_near() {
        let q = parse("cat NEAR/3 dog", FLAG_BOOLEAN);
        assert_eq!(
            q,
            Query::Near {
                subqueries: vec![Query::term_at("cat", 1), Query::term_at("dog", 2)],
                window: 3,
            }
        );
    }

    #[test]
    fn test_adj_is_ordered() {
        let q = parse("cat ADJ/3 dog", FLAG_BOOLEAN);
        assert_eq!(
            q,
            Query::Phrase {
                subqueries: vec![Query::term_at("cat", 1), Query::term_at("dog", 2)],
                window: 4,
            }
        );
    }

    #[test]
    fn test_brackets() {
        let q = parse("(cat OR dog) AND fish", FLAG_BOOLEAN);
        assert_eq!(
            q,
            Query::And(vec![
                Query::Or(vec![Query::term_at("cat", 1), Query::term_at("dog", 2)]),
                Query::term_at("fish", 3),
            ])
        );
    }

    #[test]
    fn test_boolean_filter_grouping() {
        // Same prefix ORs, different prefixes AND; filter applied over
        // the probabilistic part.
        let mut qp = QueryParser::new();
        qp.add_boolean_prefix("site", "H").unwrap();
        qp.add_boolean_prefix("lang", "L").unwrap();
        let q = qp
            .parse_query("fox site:a site:b lang:en", FLAG_DEFAULT)
            .unwrap();
        assert_eq!(
            q,
            Query::Filter(
                Box::new(Query::term_at("fox", 1)),
                Box::new(Query::And(vec![
                    Query::Or(vec![Query::term("Ha"), Query::term("Hb")]),
                    Query::term("Len"),
                ]))
            )
        );
    }

    #[test]
    fn test_filter_only_query_scales_to_zero() {
        let mut qp = QueryParser::new();
        qp.add_boolean_prefix("site", "H").unwrap();
        let q = qp.parse_query("site:example.com", FLAG_DEFAULT).unwrap();
        assert_eq!(
            q,
            Query::ScaleWeight {
                factor: 0.0,
                subquery: Box::new(Query::term("Hexample.com")),
            }
        );
    }

    #[test]
    fn test_site_filter_with_hated_term() {
        // site:example.com quick -brown with site mapped to prefix H:
        // the filter restricts the probabilistic part, the hate carves
        // its term out of the result.
        let mut qp = QueryParser::new();
        qp.add_boolean_prefix("site", "H").unwrap();
        let q = qp
            .parse_query("site:example.com quick -brown", FLAG_DEFAULT)
            .unwrap();
        assert_eq!(
            q,
            Query::AndNot(
                Box::new(Query::Filter(
                    Box::new(Query::term_at("quick", 1)),
                    Box::new(Query::term("Hexample.com")),
                )),
                Box::new(Query::term_at("brown", 2)),
            )
        );
    }

    #[test]
    fn test_value_range() {
        let mut qp = QueryParser::new();
        qp.add_value_range_processor(Arc::new(StringValueRangeProcessor::new(0)));
        let q = qp.parse_query("hello..world", FLAG_DEFAULT).unwrap();
        assert_eq!(
            q,
            Query::ScaleWeight {
                factor: 0.0,
                subquery: Box::new(Query::ValueRange {
                    slot: 0,
                    lo: b"hello".to_vec(),
                    hi: b"world".to_vec(),
                }),
            }
        );
    }

    #[test]
    fn test_value_range_with_no_taker_is_an_error() {
        let mut qp = QueryParser::new();
        qp.add_value_range_processor(Arc::new(StringValueRangeProcessor::with_marker(
            1, "price:",
        )));
        assert!(qp.parse_query("hello..world", FLAG_DEFAULT).is_err());
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(parse("", FLAG_DEFAULT), Query::Empty);
        assert_eq!(parse("   ", FLAG_DEFAULT), Query::Empty);
    }

    #[test]
    fn test_dangling_operator_is_an_error() {
        assert!(QueryParser::new()
            .parse_query("cat AND", FLAG_BOOLEAN)
            .is_err());
        assert!(QueryParser::new()
            .parse_query("OR dog", FLAG_BOOLEAN)
            .is_err());
    }

    #[test]
    fn test_error_carries_offset() {
        let err = QueryParser::new()
            .parse_query("cat AND", FLAG_BOOLEAN)
            .unwrap_err();
        match err {
            crate::error::NautexError::QueryParse { offset, .. } => assert_eq!(offset, 4),
            other => panic!("expected QueryParse, got {:?}", other),
        }
    }
}
