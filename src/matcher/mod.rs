//! Query evaluation: a tree of posting-list iterators.
//!
//! Every node of the tree (one operator per module) implements the same
//! surface: docid-ordered advancement with `next` / `skip_to`, term
//! frequency bounds for estimation, and weight bounds for pruning. The
//! `w_min` argument tells a node the smallest weight its caller still
//! has a use for; a node which can no longer satisfy that bound in its
//! current shape returns a cheaper *replacement* node, which the parent
//! swaps in (an OR whose branches cannot reach `w_min` on their own
//! becomes an AND, and so on). Replacements are signalled through
//! [`MatchContext`] so the match loop can refresh its weight bounds.

mod and;
mod and_maybe;
mod and_not;
mod external;
mod leaf;
mod matcher;
mod mset;
mod or;
mod phrase;
mod synonym;
mod value_range;
mod weight;
mod xor;

pub use external::{PrepareState, RemoteMatch};
pub use matcher::Enquire;
pub use mset::{KeyMaker, MSet, MSetItem, MultiValueKeyMaker};
pub use weight::{Bm25Params, Bm25Weight, BoolWeight, Weight, WeightStats};

pub(crate) use and::AndPostList;
pub(crate) use and_maybe::AndMaybePostList;
pub(crate) use and_not::AndNotPostList;
pub(crate) use external::ExternalPostList;
pub(crate) use leaf::{AllDocsPostList, LeafPostList};
pub(crate) use or::OrPostList;
pub(crate) use phrase::{PositionFilterKind, PositionFilterPostList};
pub(crate) use synonym::SynonymPostList;
pub(crate) use value_range::ValueRangePostList;
pub(crate) use xor::XorPostList;

use crate::error::{NautexError, Result};
use crate::store::position::PositionList;

/// State threaded through `next`/`skip_to` so any node can tell the
/// match loop that the tree changed shape and weight bounds are stale.
#[derive(Debug, Default)]
pub struct MatchContext {
    pub recalc_needed: bool,
}

/// The closed set of posting list nodes.
pub enum PostList<'a> {
    /// Matches nothing (an absent term, or an empty query).
    Empty(EmptyPostList),
    /// Placeholder left behind while a node's children move into its
    /// replacement; reaching it is a matcher bug.
    Decayed,
    Leaf(LeafPostList<'a>),
    AllDocs(AllDocsPostList<'a>),
    Or(OrPostList<'a>),
    And(AndPostList<'a>),
    AndNot(AndNotPostList<'a>),
    Xor(XorPostList<'a>),
    AndMaybe(AndMaybePostList<'a>),
    Synonym(SynonymPostList<'a>),
    PositionFilter(PositionFilterPostList<'a>),
    ValueRange(ValueRangePostList<'a>),
    External(ExternalPostList),
}

/// Advance `pl`, substituting any replacement it hands back.
pub(crate) fn next_handling_prune<'a>(
    pl: &mut Box<PostList<'a>>,
    w_min: f64,
    ctx: &mut MatchContext,
) -> Result<()> {
    if let Some(replacement) = pl.next(w_min, ctx)? {
        *pl = replacement;
        ctx.recalc_needed = true;
    }
    Ok(())
}

/// `skip_to` counterpart of [`next_handling_prune`].
pub(crate) fn skip_to_handling_prune<'a>(
    pl: &mut Box<PostList<'a>>,
    did: u32,
    w_min: f64,
    ctx: &mut MatchContext,
) -> Result<()> {
    if let Some(replacement) = pl.skip_to(did, w_min, ctx)? {
        *pl = replacement;
        ctx.recalc_needed = true;
    }
    Ok(())
}

/// Detach a child, leaving the decayed marker behind. Used only while
/// building the node that replaces the current one.
pub(crate) fn take_child<'a>(child: &mut Box<PostList<'a>>) -> Box<PostList<'a>> {
    std::mem::replace(child, Box::new(PostList::Decayed))
}

fn decayed() -> NautexError {
    NautexError::InvalidOperation("use of a decayed posting list node".into())
}

/// Matches no documents.
#[derive(Debug, Default)]
pub struct EmptyPostList;

impl<'a> PostList<'a> {
    pub fn empty() -> PostList<'a> {
        PostList::Empty(EmptyPostList)
    }

    /// Advance to the next matching document. May return a replacement
    /// node the caller must substitute for this one.
    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        match self {
            PostList::Empty(_) => Ok(None),
            PostList::Decayed => Err(decayed()),
            PostList::Leaf(pl) => pl.next(),
            PostList::AllDocs(pl) => pl.next(),
            PostList::Or(pl) => pl.next(w_min, ctx),
            PostList::And(pl) => pl.next(w_min, ctx),
            PostList::AndNot(pl) => pl.next(w_min, ctx),
            PostList::Xor(pl) => pl.next(w_min, ctx),
            PostList::AndMaybe(pl) => pl.next(w_min, ctx),
            PostList::Synonym(pl) => pl.next(ctx),
            PostList::PositionFilter(pl) => pl.next(w_min, ctx),
            PostList::ValueRange(pl) => pl.next(),
            PostList::External(pl) => pl.next(),
        }
    }

    /// Advance to the first matching document with docid >= `did`.
    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        match self {
            PostList::Empty(_) => Ok(None),
            PostList::Decayed => Err(decayed()),
            PostList::Leaf(pl) => pl.skip_to(did),
            PostList::AllDocs(pl) => pl.skip_to(did),
            PostList::Or(pl) => pl.skip_to(did, w_min, ctx),
            PostList::And(pl) => pl.skip_to(did, w_min, ctx),
            PostList::AndNot(pl) => pl.skip_to(did, w_min, ctx),
            PostList::Xor(pl) => pl.skip_to(did, w_min, ctx),
            PostList::AndMaybe(pl) => pl.skip_to(did, w_min, ctx),
            PostList::Synonym(pl) => pl.skip_to(did, ctx),
            PostList::PositionFilter(pl) => pl.skip_to(did, w_min, ctx),
            PostList::ValueRange(pl) => pl.skip_to(did),
            PostList::External(pl) => pl.skip_to(did),
        }
    }

    /// Docid of the current match; only valid once advanced and not at
    /// the end.
    pub fn get_docid(&self) -> u32 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0,
            PostList::Leaf(pl) => pl.get_docid(),
            PostList::AllDocs(pl) => pl.get_docid(),
            PostList::Or(pl) => pl.get_docid(),
            PostList::And(pl) => pl.get_docid(),
            PostList::AndNot(pl) => pl.get_docid(),
            PostList::Xor(pl) => pl.get_docid(),
            PostList::AndMaybe(pl) => pl.get_docid(),
            PostList::Synonym(pl) => pl.get_docid(),
            PostList::PositionFilter(pl) => pl.get_docid(),
            PostList::ValueRange(pl) => pl.get_docid(),
            PostList::External(pl) => pl.get_docid(),
        }
    }

    pub fn at_end(&self) -> bool {
        match self {
            PostList::Empty(_) => true,
            PostList::Decayed => true,
            PostList::Leaf(pl) => pl.at_end(),
            PostList::AllDocs(pl) => pl.at_end(),
            PostList::Or(pl) => pl.at_end(),
            PostList::And(pl) => pl.at_end(),
            PostList::AndNot(pl) => pl.at_end(),
            PostList::Xor(pl) => pl.at_end(),
            PostList::AndMaybe(pl) => pl.at_end(),
            PostList::Synonym(pl) => pl.at_end(),
            PostList::PositionFilter(pl) => pl.at_end(),
            PostList::ValueRange(pl) => pl.at_end(),
            PostList::External(pl) => pl.at_end(),
        }
    }

    pub fn get_termfreq_min(&self) -> u32 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0,
            PostList::Leaf(pl) => pl.get_termfreq(),
            PostList::AllDocs(pl) => pl.get_termfreq(),
            PostList::Or(pl) => pl.get_termfreq_min(),
            PostList::And(pl) => pl.get_termfreq_min(),
            PostList::AndNot(pl) => pl.get_termfreq_min(),
            PostList::Xor(pl) => pl.get_termfreq_min(),
            PostList::AndMaybe(pl) => pl.get_termfreq_min(),
            PostList::Synonym(pl) => pl.get_termfreq_min(),
            PostList::PositionFilter(pl) => pl.get_termfreq_min(),
            PostList::ValueRange(pl) => pl.get_termfreq_min(),
            PostList::External(pl) => pl.get_termfreq(),
        }
    }

    pub fn get_termfreq_est(&self) -> u32 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0,
            PostList::Leaf(pl) => pl.get_termfreq(),
            PostList::AllDocs(pl) => pl.get_termfreq(),
            PostList::Or(pl) => pl.get_termfreq_est(),
            PostList::And(pl) => pl.get_termfreq_est(),
            PostList::AndNot(pl) => pl.get_termfreq_est(),
            PostList::Xor(pl) => pl.get_termfreq_est(),
            PostList::AndMaybe(pl) => pl.get_termfreq_est(),
            PostList::Synonym(pl) => pl.get_termfreq_est(),
            PostList::PositionFilter(pl) => pl.get_termfreq_est(),
            PostList::ValueRange(pl) => pl.get_termfreq_est(),
            PostList::External(pl) => pl.get_termfreq(),
        }
    }

    pub fn get_termfreq_max(&self) -> u32 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0,
            PostList::Leaf(pl) => pl.get_termfreq(),
            PostList::AllDocs(pl) => pl.get_termfreq(),
            PostList::Or(pl) => pl.get_termfreq_max(),
            PostList::And(pl) => pl.get_termfreq_max(),
            PostList::AndNot(pl) => pl.get_termfreq_max(),
            PostList::Xor(pl) => pl.get_termfreq_max(),
            PostList::AndMaybe(pl) => pl.get_termfreq_max(),
            PostList::Synonym(pl) => pl.get_termfreq_max(),
            PostList::PositionFilter(pl) => pl.get_termfreq_max(),
            PostList::ValueRange(pl) => pl.get_termfreq_max(),
            PostList::External(pl) => pl.get_termfreq(),
        }
    }

    /// Static upper bound on `get_weight`, as of the last recalc.
    pub fn get_maxweight(&self) -> f64 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0.0,
            PostList::Leaf(pl) => pl.get_maxweight(),
            PostList::AllDocs(pl) => pl.get_maxweight(),
            PostList::Or(pl) => pl.get_maxweight(),
            PostList::And(pl) => pl.get_maxweight(),
            PostList::AndNot(pl) => pl.get_maxweight(),
            PostList::Xor(pl) => pl.get_maxweight(),
            PostList::AndMaybe(pl) => pl.get_maxweight(),
            PostList::Synonym(pl) => pl.get_maxweight(),
            PostList::PositionFilter(pl) => pl.get_maxweight(),
            PostList::ValueRange(pl) => pl.get_maxweight(),
            PostList::External(pl) => pl.get_maxweight(),
        }
    }

    /// Refresh cached weight bounds after the tree changed shape.
    pub fn recalc_maxweight(&mut self) -> f64 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0.0,
            PostList::Leaf(pl) => pl.get_maxweight(),
            PostList::AllDocs(pl) => pl.get_maxweight(),
            PostList::Or(pl) => pl.recalc_maxweight(),
            PostList::And(pl) => pl.recalc_maxweight(),
            PostList::AndNot(pl) => pl.recalc_maxweight(),
            PostList::Xor(pl) => pl.recalc_maxweight(),
            PostList::AndMaybe(pl) => pl.recalc_maxweight(),
            PostList::Synonym(pl) => pl.recalc_maxweight(),
            PostList::PositionFilter(pl) => pl.recalc_maxweight(),
            PostList::ValueRange(pl) => pl.get_maxweight(),
            PostList::External(pl) => pl.get_maxweight(),
        }
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        match self {
            PostList::Empty(_) => Ok(0.0),
            PostList::Decayed => Err(decayed()),
            PostList::Leaf(pl) => pl.get_weight(),
            PostList::AllDocs(_) => Ok(0.0),
            PostList::Or(pl) => pl.get_weight(),
            PostList::And(pl) => pl.get_weight(),
            PostList::AndNot(pl) => pl.get_weight(),
            PostList::Xor(pl) => pl.get_weight(),
            PostList::AndMaybe(pl) => pl.get_weight(),
            PostList::Synonym(pl) => pl.get_weight(),
            PostList::PositionFilter(pl) => pl.get_weight(),
            PostList::ValueRange(_) => Ok(0.0),
            PostList::External(pl) => pl.get_weight(),
        }
    }

    /// Length of the current document.
    pub fn get_doclength(&mut self) -> Result<u64> {
        match self {
            PostList::Empty(_) => Ok(0),
            PostList::Decayed => Err(decayed()),
            PostList::Leaf(pl) => pl.get_doclength(),
            PostList::AllDocs(pl) => pl.get_doclength(),
            PostList::Or(pl) => pl.get_doclength(),
            PostList::And(pl) => pl.get_doclength(),
            PostList::AndNot(pl) => pl.get_doclength(),
            PostList::Xor(pl) => pl.get_doclength(),
            PostList::AndMaybe(pl) => pl.get_doclength(),
            PostList::Synonym(pl) => pl.get_doclength(),
            PostList::PositionFilter(pl) => pl.get_doclength(),
            PostList::ValueRange(pl) => pl.get_doclength(),
            PostList::External(_) => Err(NautexError::Unimplemented(
                "document length of a remote result set".into(),
            )),
        }
    }

    /// Wdf of the current document (summed over matching branches).
    pub fn get_wdf(&mut self) -> Result<u32> {
        match self {
            PostList::Empty(_) => Ok(0),
            PostList::Decayed => Err(decayed()),
            PostList::Leaf(pl) => pl.get_wdf(),
            PostList::AllDocs(pl) => pl.get_wdf(),
            PostList::Or(pl) => pl.get_wdf(),
            PostList::And(pl) => pl.get_wdf(),
            PostList::AndNot(pl) => pl.get_wdf(),
            PostList::Xor(pl) => pl.get_wdf(),
            PostList::AndMaybe(pl) => pl.get_wdf(),
            PostList::Synonym(pl) => pl.get_wdf(),
            PostList::PositionFilter(pl) => pl.get_wdf(),
            PostList::ValueRange(_) => Ok(0),
            PostList::External(_) => Err(NautexError::Unimplemented(
                "wdf of a remote result set".into(),
            )),
        }
    }

    /// How many leaf subqueries match at the current document, for
    /// percent-of-query statistics.
    pub fn count_matching_subqs(&self) -> u32 {
        match self {
            PostList::Empty(_) | PostList::Decayed => 0,
            PostList::Leaf(_) | PostList::AllDocs(_) => 1,
            PostList::Or(pl) => pl.count_matching_subqs(),
            PostList::And(pl) => pl.count_matching_subqs(),
            PostList::AndNot(pl) => pl.count_matching_subqs(),
            PostList::Xor(pl) => pl.count_matching_subqs(),
            PostList::AndMaybe(pl) => pl.count_matching_subqs(),
            PostList::Synonym(_) => 1,
            PostList::PositionFilter(pl) => pl.count_matching_subqs(),
            PostList::ValueRange(_) => 1,
            PostList::External(_) => 1,
        }
    }

    /// Decoded position list for the current document; meaningful only
    /// on term leaves.
    pub fn read_position_list(&mut self) -> Result<PositionList> {
        match self {
            PostList::Leaf(pl) => pl.read_position_list(),
            PostList::AllDocs(_) => Err(NautexError::InvalidOperation(
                "position list of the all-documents list".into(),
            )),
            PostList::Decayed => Err(decayed()),
            _ => Err(NautexError::InvalidOperation(
                "position list of a non-leaf posting list".into(),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use tempfile::TempDir;

    use super::leaf::LeafPostList;
    use super::weight::{Bm25Params, Bm25Weight, WeightStats};
    use super::{next_handling_prune, MatchContext, PostList};
    use crate::db::{Database, DatabaseSettings, Document, TableSet, WritableDatabase};

    /// Three documents: "the quick brown fox", "the lazy dog",
    /// "fox and dog", with positions.
    pub fn sample_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
        for text in ["the quick brown fox", "the lazy dog", "fox and dog"] {
            let mut doc = Document::new();
            for (i, word) in text.split_whitespace().enumerate() {
                doc.add_posting(word.as_bytes(), i as u32 + 1, 1).unwrap();
            }
            w.add_document(&doc).unwrap();
        }
        w.commit().unwrap();
        w.close();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    pub fn leaf<'a>(tables: &'a TableSet, db: &Database, term: &[u8]) -> PostList<'a> {
        let weight = Bm25Weight::new(
            Bm25Params::default(),
            &WeightStats {
                collection_size: db.doc_count().unwrap(),
                avg_length: db.avg_length().unwrap(),
                term_freq: db.term_freq(term).unwrap(),
                wqf: 1,
            },
            1.0,
        );
        LeafPostList::open(tables, term, Box::new(weight)).unwrap()
    }

    /// Exhaust a posting list with no weight pressure, collecting docids.
    pub fn walk_docids(pl: PostList<'_>) -> Vec<u32> {
        let mut pl = Box::new(pl);
        let mut ctx = MatchContext::default();
        let mut out = Vec::new();
        loop {
            next_handling_prune(&mut pl, 0.0, &mut ctx).unwrap();
            if pl.at_end() {
                break;
            }
            out.push(pl.get_docid());
        }
        out
    }
}
