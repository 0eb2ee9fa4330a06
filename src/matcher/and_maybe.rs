//! AND MAYBE: every document of the required branch, with the optional
//! branch's weight added when it matches the same document.
//!
//! When the weight floor exceeds what the required branch can supply
//! alone, the optional branch stops being optional and the node decays
//! to AND; when the optional branch runs dry the node decays to the
//! bare required branch.

use tracing::debug;

use super::{
    next_handling_prune, skip_to_handling_prune, take_child, AndPostList, MatchContext, PostList,
};
use crate::error::Result;

pub struct AndMaybePostList<'a> {
    l: Box<PostList<'a>>,
    r: Box<PostList<'a>>,
    lhead: u32,
    rhead: u32,
    rdry: bool,
    lmax: f64,
    rmax: f64,
    dbsize: u32,
    finished: bool,
}

impl<'a> AndMaybePostList<'a> {
    pub fn new(l: Box<PostList<'a>>, r: Box<PostList<'a>>, dbsize: u32) -> AndMaybePostList<'a> {
        Self::with_heads(l, r, 0, 0, dbsize)
    }

    /// Used when an OR decays with both branches already positioned.
    pub fn with_heads(
        l: Box<PostList<'a>>,
        r: Box<PostList<'a>>,
        lhead: u32,
        rhead: u32,
        dbsize: u32,
    ) -> AndMaybePostList<'a> {
        AndMaybePostList {
            l,
            r,
            lhead,
            rhead,
            rdry: false,
            lmax: 0.0,
            rmax: 0.0,
            dbsize,
            finished: false,
        }
    }

    fn decay_to_and(
        &mut self,
        target: Option<u32>,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Box<PostList<'a>>> {
        debug!("AND MAYBE -> AND");
        let l = take_child(&mut self.l);
        let r = take_child(&mut self.r);
        let mut ret = Box::new(PostList::And(AndPostList::new(l, r, self.dbsize)));
        let resume = match target {
            Some(did) => did.max(self.lhead.saturating_add(1)).max(self.rhead),
            None => self.lhead.saturating_add(1).max(self.rhead),
        };
        skip_to_handling_prune(&mut ret, resume, w_min, ctx)?;
        Ok(ret)
    }

    /// After moving the required branch, bring the optional one level.
    fn align_optional(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if self.l.at_end() {
            self.finished = true;
            return Ok(None);
        }
        self.lhead = self.l.get_docid();
        if !self.rdry && self.rhead < self.lhead {
            skip_to_handling_prune(&mut self.r, self.lhead, w_min - self.lmax, ctx)?;
            if self.r.at_end() {
                self.rdry = true;
                // The optional branch can never add weight again.
                return Ok(Some(take_child(&mut self.l)));
            }
            self.rhead = self.r.get_docid();
        }
        Ok(None)
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.lmax {
            return self.decay_to_and(None, w_min, ctx).map(Some);
        }
        next_handling_prune(&mut self.l, w_min - self.rmax, ctx)?;
        self.align_optional(w_min, ctx)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.lmax {
            return self.decay_to_and(Some(did), w_min, ctx).map(Some);
        }
        if self.lhead != 0 && did <= self.lhead {
            return Ok(None);
        }
        skip_to_handling_prune(&mut self.l, did, w_min - self.rmax, ctx)?;
        self.align_optional(w_min, ctx)
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(self.lhead != 0);
        self.lhead
    }

    pub fn at_end(&self) -> bool {
        self.finished
    }

    // Matches are exactly the required branch's documents.

    pub fn get_termfreq_min(&self) -> u32 {
        self.l.get_termfreq_min()
    }

    pub fn get_termfreq_est(&self) -> u32 {
        self.l.get_termfreq_est()
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.l.get_termfreq_max()
    }

    pub fn get_maxweight(&self) -> f64 {
        self.lmax + self.rmax
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.lmax = self.l.recalc_maxweight();
        self.rmax = self.r.recalc_maxweight();
        self.get_maxweight()
    }

    fn optional_matches(&self) -> bool {
        !self.rdry && self.rhead == self.lhead
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        let mut weight = self.l.get_weight()?;
        if self.optional_matches() {
            weight += self.r.get_weight()?;
        }
        Ok(weight)
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        self.l.get_doclength()
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        let mut wdf = self.l.get_wdf()?;
        if self.optional_matches() {
            wdf += self.r.get_wdf()?;
        }
        Ok(wdf)
    }

    pub fn count_matching_subqs(&self) -> u32 {
        let mut count = self.l.count_matching_subqs();
        if self.optional_matches() {
            count += self.r.count_matching_subqs();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{leaf, sample_db, walk_docids};
    use super::super::{MatchContext, PostList};
    use super::*;

    #[test]
    fn test_and_maybe_emits_required_docs_only() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        // the {1,2} MAYBE dog {2,3} -> {1,2}.
        let pl = PostList::AndMaybe(AndMaybePostList::new(
            Box::new(leaf(tables, &db, b"the")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        assert_eq!(walk_docids(pl), vec![1, 2]);
    }

    #[test]
    fn test_and_maybe_adds_optional_weight() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut pl = PostList::AndMaybe(AndMaybePostList::new(
            Box::new(leaf(tables, &db, b"the")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        pl.recalc_maxweight();
        let mut ctx = MatchContext::default();
        pl.next(0.0, &mut ctx).unwrap();
        let w1 = pl.get_weight().unwrap(); // doc 1: "the" only
        assert_eq!(pl.count_matching_subqs(), 1);
        pl.next(0.0, &mut ctx).unwrap();
        let w2 = pl.get_weight().unwrap(); // doc 2: "the" + "dog"
        assert_eq!(pl.count_matching_subqs(), 2);
        assert!(w2 > w1);
    }

    #[test]
    fn test_and_maybe_decays_to_and_under_pressure() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut l = Box::new(leaf(tables, &db, b"the"));
        let lmax = l.recalc_maxweight();
        let mut pl = AndMaybePostList::new(
            l,
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        );
        pl.recalc_maxweight();
        let mut ctx = MatchContext::default();
        let replacement = pl.next(lmax + 1e-6, &mut ctx).unwrap();
        let replacement = replacement.expect("must decay to AND");
        assert!(matches!(replacement.as_ref(), PostList::And(_)));
        // The AND lands on doc 2, the only doc with both terms.
        assert_eq!(replacement.get_docid(), 2);
    }
}
