//! The match driver: lowers a [`Query`] onto a posting-list tree and
//! collects a ranked [`MSet`].
//!
//! Candidates are kept in a bounded heap whose floor, once the heap is
//! full and `check_at_least` is satisfied, becomes the `w_min` passed
//! down the tree; that is what lets OR nodes rewrite themselves into
//! cheaper shapes mid-match.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::leaf::{AllDocsPostList, LeafPostList};
use super::mset::{KeyMaker, MSet, MSetItem};
use super::weight::{Bm25Params, Bm25Weight, BoolWeight, Weight, WeightStats};
use super::{
    next_handling_prune, AndMaybePostList, AndNotPostList, AndPostList, MatchContext,
    OrPostList, PositionFilterKind, PositionFilterPostList, PostList, SynonymPostList,
    ValueRangePostList, XorPostList,
};
use crate::db::{Database, TableSet};
use crate::error::{NautexError, Result};
use crate::query::Query;

/// How results are ordered.
#[derive(Clone)]
enum Ranking {
    ByWeight,
    /// Lexicographic sort key, optionally reversed, weight as tiebreak.
    ByKey { maker: Arc<dyn KeyMaker>, reverse: bool },
}

/// One query execution facade bound to a reader.
pub struct Enquire<'a> {
    db: &'a Database,
    query: Query,
    params: Bm25Params,
    boolean: bool,
    ranking: Ranking,
    collapse: Option<(Arc<dyn KeyMaker>, u32)>,
}

impl<'a> Enquire<'a> {
    pub fn new(db: &'a Database) -> Enquire<'a> {
        Enquire {
            db,
            query: Query::Empty,
            params: Bm25Params::default(),
            boolean: false,
            ranking: Ranking::ByWeight,
            collapse: None,
        }
    }

    pub fn set_query(&mut self, query: Query) -> &mut Self {
        self.query = query;
        self
    }

    pub fn set_bm25_params(&mut self, params: Bm25Params) -> &mut Self {
        self.params = params;
        self
    }

    /// Weight nothing: every match scores zero (pure boolean retrieval).
    pub fn set_boolean_weighting(&mut self, boolean: bool) -> &mut Self {
        self.boolean = boolean;
        self
    }

    /// Order results by a document key instead of by weight: largest
    /// key first, or smallest with `reverse` set. Weight breaks ties.
    /// Per-field direction is the key maker's business.
    pub fn set_sort_by_key(&mut self, maker: Arc<dyn KeyMaker>, reverse: bool) -> &mut Self {
        self.ranking = Ranking::ByKey { maker, reverse };
        self
    }

    /// Keep at most `max` documents per distinct collapse key.
    pub fn set_collapse_key(&mut self, maker: Arc<dyn KeyMaker>, max: u32) -> &mut Self {
        self.collapse = Some((maker, max.max(1)));
        self
    }

    pub fn get_mset(&self, first: u32, max_items: u32) -> Result<MSet> {
        self.get_mset_with_check(first, max_items, 0)
    }

    /// As `get_mset`, but scan at least `check_at_least` candidates
    /// before weight pruning kicks in, so the match counts are reliable
    /// that far.
    pub fn get_mset_with_check(
        &self,
        first: u32,
        max_items: u32,
        check_at_least: u32,
    ) -> Result<MSet> {
        let tables = self.db.tables()?;
        let dbsize = self.db.doc_count()?;
        let avg_length = self.db.avg_length()?;
        let builder = TreeBuilder {
            tables,
            db: self.db,
            dbsize,
            avg_length,
            params: self.params,
            boolean: self.boolean,
        };
        let mut pl = Box::new(builder.build(&self.query, 1.0)?);
        let max_possible = pl.recalc_maxweight();

        let capacity = first
            .checked_add(max_items)
            .ok_or_else(|| NautexError::Range("first + max_items overflows".into()))? as usize;
        let check_target = (check_at_least as usize).max(capacity);

        let mut ctx = MatchContext::default();
        let mut pool = Pool::new(self.ranking.clone());
        let mut w_min = 0.0_f64;
        let mut seen: u64 = 0;
        let mut max_attained = 0.0_f64;
        let mut collapse_counts: HashMap<Vec<u8>, u32> = HashMap::new();
        let initial_est = pl.get_termfreq_est();
        let initial_max = pl.get_termfreq_max();
        let mut pruned = false;

        loop {
            next_handling_prune(&mut pl, w_min, &mut ctx)?;
            if ctx.recalc_needed {
                ctx.recalc_needed = false;
                let remaining = pl.recalc_maxweight();
                debug!(remaining, w_min, "match tree rewritten; bounds refreshed");
                if remaining < w_min {
                    break;
                }
            }
            if pl.at_end() {
                break;
            }
            seen += 1;
            let docid = pl.get_docid();
            let weight = pl.get_weight()?;
            if weight > max_attained {
                max_attained = weight;
            }

            let collapse_key = match &self.collapse {
                Some((maker, _)) => Some(maker.make_key(self.db, docid)?),
                None => None,
            };
            if let (Some(key), Some((_, max))) = (&collapse_key, &self.collapse) {
                let count = collapse_counts.entry(key.clone()).or_insert(0);
                if *count >= *max {
                    continue;
                }
                *count += 1;
            }
            let sort_key = match &self.ranking {
                Ranking::ByKey { maker, .. } => Some(maker.make_key(self.db, docid)?),
                Ranking::ByWeight => None,
            };

            pool.offer(
                Candidate {
                    docid,
                    weight,
                    matching_subqs: pl.count_matching_subqs(),
                    sort_key,
                    collapse_key,
                },
                capacity,
            );

            // Raise the admission floor only when ranking by weight and
            // the forced scan is satisfied.
            if matches!(self.ranking, Ranking::ByWeight)
                && pool.len() == capacity
                && seen >= check_target as u64
            {
                if let Some(worst) = pool.worst() {
                    if worst.weight > w_min {
                        w_min = worst.weight;
                        pruned = true;
                    }
                }
            }
        }

        let mut ranked = pool.into_sorted();
        let items: Vec<MSetItem> = ranked
            .drain(..)
            .skip(first as usize)
            .map(|c| {
                let percent = if max_attained > 0.0 {
                    ((c.weight * 100.0 / max_attained).round() as u8).clamp(1, 100)
                } else {
                    let total = self.query.leaf_count().max(1);
                    ((c.matching_subqs * 100 / total) as u8).clamp(1, 100)
                };
                MSetItem {
                    docid: c.docid,
                    weight: c.weight,
                    percent,
                    sort_key: c.sort_key,
                    collapse_key: c.collapse_key,
                }
            })
            .collect();

        // With no pruning and no collapsing the scan was exhaustive and
        // all three bounds collapse to the exact count.
        let exact = !pruned && self.collapse.is_none();
        let seen = seen.min(u32::MAX as u64) as u32;
        let (lower, upper) = if exact {
            (seen, seen)
        } else {
            (seen.min(initial_max), initial_max)
        };
        Ok(MSet {
            items,
            matches_lower_bound: lower,
            matches_estimated: initial_est.clamp(lower, upper),
            matches_upper_bound: upper,
            max_possible,
            max_attained,
            first,
        })
    }
}

/// Lowers queries onto posting-list nodes.
struct TreeBuilder<'a> {
    tables: &'a TableSet,
    db: &'a Database,
    dbsize: u32,
    avg_length: f64,
    params: Bm25Params,
    boolean: bool,
}

impl<'a> TreeBuilder<'a> {
    fn term_weight(&self, term: &[u8], wqf: u32, factor: f64) -> Result<Box<dyn Weight>> {
        if self.boolean || factor == 0.0 {
            return Ok(Box::new(BoolWeight));
        }
        let stats = WeightStats {
            collection_size: self.dbsize,
            avg_length: self.avg_length,
            term_freq: self.db.term_freq(term)?,
            wqf,
        };
        Ok(Box::new(Bm25Weight::new(self.params, &stats, factor)))
    }

    fn build(&self, query: &Query, factor: f64) -> Result<PostList<'a>> {
        match query {
            Query::Empty => Ok(PostList::empty()),
            Query::All => AllDocsPostList::open(self.tables),
            Query::Term { term, wqf, .. } => {
                let weight = self.term_weight(term, *wqf, factor)?;
                LeafPostList::open(self.tables, term, weight)
            }
            Query::And(subs) => {
                let children = self.build_all(subs, factor)?;
                Ok(fold_and(children, self.dbsize))
            }
            Query::Or(subs) => {
                let children = self.build_all(subs, factor)?;
                Ok(fold_or(children, self.dbsize))
            }
            Query::AndNot(l, r) => {
                let l = self.build(l, factor)?;
                let r = self.build(r, 0.0)?;
                if matches!(r, PostList::Empty(_)) {
                    return Ok(l);
                }
                Ok(PostList::AndNot(AndNotPostList::new(
                    Box::new(l),
                    Box::new(r),
                    self.dbsize,
                )))
            }
            Query::Xor(l, r) => Ok(PostList::Xor(XorPostList::new(
                Box::new(self.build(l, factor)?),
                Box::new(self.build(r, factor)?),
                self.dbsize,
            ))),
            Query::AndMaybe(l, r) => Ok(PostList::AndMaybe(AndMaybePostList::new(
                Box::new(self.build(l, factor)?),
                Box::new(self.build(r, factor)?),
                self.dbsize,
            ))),
            Query::Filter(l, r) => Ok(PostList::And(AndPostList::new(
                Box::new(self.build(l, factor)?),
                Box::new(self.build(r, 0.0)?),
                self.dbsize,
            ))),
            Query::Near { subqueries, window } => {
                self.build_positional(subqueries, *window, PositionFilterKind::Near, factor)
            }
            Query::Phrase { subqueries, window } => {
                self.build_positional(subqueries, *window, PositionFilterKind::Phrase, factor)
            }
            Query::Synonym(subs) => {
                // Alternatives carry no weight of their own; one weight
                // is applied over the union's combined wdf.
                let children = self.build_all(subs, 0.0)?;
                let inner = fold_or(children, self.dbsize);
                if matches!(inner, PostList::Empty(_)) {
                    return Ok(PostList::empty());
                }
                let est = inner.get_termfreq_est().clamp(1, self.dbsize.max(1));
                let weight: Box<dyn Weight> = if self.boolean || factor == 0.0 {
                    Box::new(BoolWeight)
                } else {
                    Box::new(Bm25Weight::new(
                        self.params,
                        &WeightStats {
                            collection_size: self.dbsize,
                            avg_length: self.avg_length,
                            term_freq: est,
                            wqf: 1,
                        },
                        factor,
                    ))
                };
                Ok(PostList::Synonym(SynonymPostList::new(
                    Box::new(inner),
                    weight,
                )))
            }
            Query::ValueRange { slot, lo, hi } => Ok(PostList::ValueRange(
                ValueRangePostList::open(self.tables, *slot, lo.clone(), hi.clone(), self.dbsize)?,
            )),
            Query::ScaleWeight { factor: f, subquery } => self.build(subquery, factor * f),
        }
    }

    fn build_all(&self, subs: &[Query], factor: f64) -> Result<Vec<PostList<'a>>> {
        subs.iter().map(|q| self.build(q, factor)).collect()
    }

    fn build_positional(
        &self,
        subs: &[Query],
        window: u32,
        kind: PositionFilterKind,
        factor: f64,
    ) -> Result<PostList<'a>> {
        let mut terms = Vec::with_capacity(subs.len());
        for sub in subs {
            match sub {
                Query::Term { term, .. } => terms.push(term.clone()),
                _ => {
                    return Err(NautexError::InvalidArgument(
                        "positional operators require plain terms".into(),
                    ))
                }
            }
        }
        let children = self.build_all(subs, factor)?;
        if children.iter().any(|c| matches!(c, PostList::Empty(_))) {
            return Ok(PostList::empty());
        }
        let inner = fold_and(children, self.dbsize);
        Ok(PostList::PositionFilter(PositionFilterPostList::new(
            kind,
            window,
            terms,
            Box::new(inner),
            &self.tables.position,
        )))
    }
}

fn fold_and<'a>(children: Vec<PostList<'a>>, dbsize: u32) -> PostList<'a> {
    let mut it = children.into_iter();
    let Some(first) = it.next() else {
        return PostList::empty();
    };
    it.fold(first, |acc, next| {
        PostList::And(AndPostList::new(Box::new(acc), Box::new(next), dbsize))
    })
}

fn fold_or<'a>(mut children: Vec<PostList<'a>>, dbsize: u32) -> PostList<'a> {
    children.retain(|c| !matches!(c, PostList::Empty(_)));
    // Put the branch with the larger frequency estimate on the left.
    children.sort_by(|a, b| b.get_termfreq_est().cmp(&a.get_termfreq_est()));
    let mut it = children.into_iter();
    let Some(first) = it.next() else {
        return PostList::empty();
    };
    it.fold(first, |acc, next| {
        PostList::Or(OrPostList::new(Box::new(acc), Box::new(next), dbsize))
    })
}

struct Candidate {
    docid: u32,
    weight: f64,
    matching_subqs: u32,
    sort_key: Option<Vec<u8>>,
    collapse_key: Option<Vec<u8>>,
}

/// Bounded candidate pool: a binary heap with the worst candidate at
/// the root, so the admission floor is O(1) and eviction O(log n).
struct Pool {
    items: Vec<Candidate>,
    ranking: Ranking,
}

impl Pool {
    fn new(ranking: Ranking) -> Pool {
        Pool {
            items: Vec::new(),
            ranking,
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn worst(&self) -> Option<&Candidate> {
        self.items.first()
    }

    /// Ordering: `Greater` means `a` ranks better than `b`.
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        let by_weight = |a: &Candidate, b: &Candidate| {
            a.weight
                .total_cmp(&b.weight)
                // Equal weights: the smaller docid ranks first.
                .then_with(|| b.docid.cmp(&a.docid))
        };
        match &self.ranking {
            Ranking::ByWeight => by_weight(a, b),
            Ranking::ByKey { reverse, .. } => {
                let key_cmp = a.sort_key.cmp(&b.sort_key);
                let key_cmp = if *reverse { key_cmp.reverse() } else { key_cmp };
                key_cmp.then_with(|| by_weight(a, b))
            }
        }
    }

    fn offer(&mut self, candidate: Candidate, capacity: usize) {
        if capacity == 0 {
            return;
        }
        if self.items.len() < capacity {
            self.items.push(candidate);
            self.sift_up(self.items.len() - 1);
            return;
        }
        if self.compare(&candidate, &self.items[0]) == Ordering::Greater {
            self.items[0] = candidate;
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.compare(&self.items[i], &self.items[parent]) == Ordering::Less {
                self.items.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut smallest = i;
            if l < self.items.len()
                && self.compare(&self.items[l], &self.items[smallest]) == Ordering::Less
            {
                smallest = l;
            }
            if r < self.items.len()
                && self.compare(&self.items[r], &self.items[smallest]) == Ordering::Less
            {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }

    /// Drain into best-first order.
    fn into_sorted(self) -> Vec<Candidate> {
        let Pool { mut items, ranking } = self;
        let pool = Pool {
            items: Vec::new(),
            ranking,
        };
        items.sort_by(|a, b| pool.compare(b, a));
        items
    }
}
