//! The query tree: what the parser produces and the matcher evaluates.

use std::fmt;

/// A structured query.
///
/// The operator set is closed; the matcher lowers each node onto the
/// corresponding posting-list node.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Matches nothing (the empty query).
    Empty,
    /// Matches every document (used by pure NOT).
    All,
    /// A single term with its within-query frequency and position.
    Term {
        term: Vec<u8>,
        wqf: u32,
        pos: u32,
    },
    /// All subqueries must match; weights sum.
    And(Vec<Query>),
    /// Any subquery may match; weights sum over the matching ones.
    Or(Vec<Query>),
    /// Left must match, right must not.
    AndNot(Box<Query>, Box<Query>),
    /// Exactly one side must match.
    Xor(Box<Query>, Box<Query>),
    /// Left must match; right only adds weight.
    AndMaybe(Box<Query>, Box<Query>),
    /// Left must match; right restricts without weighting.
    Filter(Box<Query>, Box<Query>),
    /// Terms near each other, any order, within `window` positions.
    Near { subqueries: Vec<Query>, window: u32 },
    /// Terms in order within `window` positions.
    Phrase { subqueries: Vec<Query>, window: u32 },
    /// Alternatives scored as a single term.
    Synonym(Vec<Query>),
    /// Documents whose value in `slot` lies in `[lo, hi]`.
    ValueRange {
        slot: u32,
        lo: Vec<u8>,
        hi: Vec<u8>,
    },
    /// Scale the subquery's weights; zero makes it a pure filter.
    ScaleWeight { factor: f64, subquery: Box<Query> },
}

impl Query {
    pub fn term(term: impl Into<Vec<u8>>) -> Query {
        Query::Term {
            term: term.into(),
            wqf: 1,
            pos: 0,
        }
    }

    pub fn term_at(term: impl Into<Vec<u8>>, pos: u32) -> Query {
        Query::Term {
            term: term.into(),
            wqf: 1,
            pos,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Query::Empty)
    }

    /// Combine two queries under an associative operator, flattening
    /// nested runs of the same operator and dropping empty sides.
    pub fn combine(op: CombinableOp, a: Query, b: Query) -> Query {
        if a.is_empty() {
            return b;
        }
        if b.is_empty() {
            return a;
        }
        let mut subqueries = Vec::new();
        let mut push = |q: Query, subqueries: &mut Vec<Query>| match (op, q) {
            (CombinableOp::And, Query::And(subs)) => subqueries.extend(subs),
            (CombinableOp::Or, Query::Or(subs)) => subqueries.extend(subs),
            (CombinableOp::Synonym, Query::Synonym(subs)) => subqueries.extend(subs),
            (_, q) => subqueries.push(q),
        };
        push(a, &mut subqueries);
        push(b, &mut subqueries);
        match op {
            CombinableOp::And => Query::And(subqueries),
            CombinableOp::Or => Query::Or(subqueries),
            CombinableOp::Synonym => Query::Synonym(subqueries),
        }
    }

    /// Number of term leaves, for percent-of-query accounting.
    pub fn leaf_count(&self) -> u32 {
        match self {
            Query::Empty => 0,
            Query::All | Query::Term { .. } | Query::ValueRange { .. } => 1,
            Query::And(subs) | Query::Or(subs) => subs.iter().map(Query::leaf_count).sum(),
            Query::Synonym(_) => 1,
            Query::AndNot(l, _) => l.leaf_count(),
            Query::Xor(l, r) => l.leaf_count() + r.leaf_count(),
            Query::AndMaybe(l, r) => l.leaf_count() + r.leaf_count(),
            Query::Filter(l, r) => l.leaf_count() + r.leaf_count(),
            Query::Near { subqueries, .. } | Query::Phrase { subqueries, .. } => {
                subqueries.iter().map(Query::leaf_count).sum()
            }
            Query::ScaleWeight { subquery, .. } => subquery.leaf_count(),
        }
    }
}

impl Default for Query {
    fn default() -> Query {
        Query::Empty
    }
}

/// Operators [`Query::combine`] knows how to flatten.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CombinableOp {
    And,
    Or,
    Synonym,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, subs: &[Query], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, q) in subs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", q)?;
            }
            write!(f, ")")
        }
        match self {
            Query::Empty => write!(f, "<empty>"),
            Query::All => write!(f, "<alldocuments>"),
            Query::Term { term, wqf, .. } => {
                write!(f, "{}", String::from_utf8_lossy(term))?;
                if *wqf > 1 {
                    write!(f, "#{}", wqf)?;
                }
                Ok(())
            }
            Query::And(subs) => join(f, subs, "AND"),
            Query::Or(subs) => join(f, subs, "OR"),
            Query::AndNot(l, r) => write!(f, "({} AND_NOT {})", l, r),
            Query::Xor(l, r) => write!(f, "({} XOR {})", l, r),
            Query::AndMaybe(l, r) => write!(f, "({} AND_MAYBE {})", l, r),
            Query::Filter(l, r) => write!(f, "({} FILTER {})", l, r),
            Query::Near { subqueries, window } => {
                write!(f, "NEAR/{} ", window)?;
                join(f, subqueries, "")
            }
            Query::Phrase { subqueries, window } => {
                write!(f, "PHRASE/{} ", window)?;
                join(f, subqueries, "")
            }
            Query::Synonym(subs) => join(f, subs, "SYNONYM"),
            Query::ValueRange { slot, lo, hi } => write!(
                f,
                "VALUE_RANGE {} {} {}",
                slot,
                String::from_utf8_lossy(lo),
                String::from_utf8_lossy(hi)
            ),
            Query::ScaleWeight { factor, subquery } => write!(f, "{} * {}", factor, subquery),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_flattens() {
        let q = Query::combine(
            CombinableOp::Or,
            Query::combine(CombinableOp::Or, Query::term("a"), Query::term("b")),
            Query::term("c"),
        );
        match q {
            Query::Or(subs) => assert_eq!(subs.len(), 3),
            other => panic!("expected flat OR, got {}", other),
        }
    }

    #[test]
    fn test_combine_drops_empty() {
        let q = Query::combine(CombinableOp::And, Query::Empty, Query::term("a"));
        assert_eq!(q, Query::term("a"));
    }

    #[test]
    fn test_display() {
        let q = Query::AndNot(
            Box::new(Query::combine(
                CombinableOp::And,
                Query::term("quick"),
                Query::term("brown"),
            )),
            Box::new(Query::term("lazy")),
        );
        assert_eq!(q.to_string(), "((quick AND brown) AND_NOT lazy)");
    }

    #[test]
    fn test_leaf_count() {
        let q = Query::AndMaybe(
            Box::new(Query::term("a")),
            Box::new(Query::Or(vec![Query::term("b"), Query::term("c")])),
        );
        assert_eq!(q.leaf_count(), 3);
    }
}
