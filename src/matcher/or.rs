//! OR of two posting lists.
//!
//! Emits the union in docid order, summing weights where both sides
//! match. When the caller's minimum useful weight rises above what one
//! or both branches can supply alone, the node rewrites itself: both
//! branches required becomes AND, one branch required becomes AND_MAYBE.
//! The replacement is handed back through `next`/`skip_to` for the
//! parent to substitute.

use tracing::debug;

use super::{
    next_handling_prune, skip_to_handling_prune, take_child, AndMaybePostList, AndPostList,
    MatchContext, PostList,
};
use crate::error::Result;

pub struct OrPostList<'a> {
    l: Box<PostList<'a>>,
    r: Box<PostList<'a>>,
    lhead: u32,
    rhead: u32,
    lmax: f64,
    rmax: f64,
    minmax: f64,
    dbsize: u32,
}

impl<'a> OrPostList<'a> {
    /// `l` should be the branch with the higher term frequency estimate.
    pub fn new(l: Box<PostList<'a>>, r: Box<PostList<'a>>, dbsize: u32) -> OrPostList<'a> {
        OrPostList {
            l,
            r,
            lhead: 0,
            rhead: 0,
            lmax: 0.0,
            rmax: 0.0,
            minmax: 0.0,
            dbsize,
        }
    }

    /// Build the node replacing this OR once `w_min` exceeds what a
    /// single branch can contribute, positioned ready to continue.
    fn decay(
        &mut self,
        target: Option<u32>,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Box<PostList<'a>>> {
        let l = take_child(&mut self.l);
        let r = take_child(&mut self.r);
        if w_min > self.lmax && w_min > self.rmax {
            debug!("OR -> AND");
            let mut ret = Box::new(PostList::And(AndPostList::new(l, r, self.dbsize)));
            // For next(), everything up to the emitted min(head) is done
            // with; for skip_to(), the caller's target governs but can
            // never fall below where both branches already stand.
            let did = match target {
                None => self.lhead.max(self.rhead).saturating_add(1),
                Some(did) => did.max(self.lhead.max(self.rhead)),
            };
            skip_to_handling_prune(&mut ret, did, w_min, ctx)?;
            Ok(ret)
        } else if w_min > self.lmax {
            debug!("OR -> AND MAYBE (left branch starved)");
            let mut ret = Box::new(PostList::AndMaybe(AndMaybePostList::with_heads(
                r,
                l,
                self.rhead,
                self.lhead,
                self.dbsize,
            )));
            match target {
                Some(did) => skip_to_handling_prune(&mut ret, did.max(self.rhead), w_min, ctx)?,
                None => next_handling_prune(&mut ret, w_min, ctx)?,
            }
            Ok(ret)
        } else {
            // w_min > rmax, since w_min > minmax but not > lmax.
            debug!("OR -> AND MAYBE (right branch starved)");
            let mut ret = Box::new(PostList::AndMaybe(AndMaybePostList::with_heads(
                l,
                r,
                self.lhead,
                self.rhead,
                self.dbsize,
            )));
            match target {
                Some(did) => skip_to_handling_prune(&mut ret, did.max(self.lhead), w_min, ctx)?,
                None => next_handling_prune(&mut ret, w_min, ctx)?,
            }
            Ok(ret)
        }
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.minmax {
            return self.decay(None, w_min, ctx).map(Some);
        }

        let mut ldry = false;
        let mut rnext = false;

        if self.lhead <= self.rhead {
            // Also advance r on a tie, else it would repeat the docid.
            if self.lhead == self.rhead {
                rnext = true;
            }
            next_handling_prune(&mut self.l, w_min - self.rmax, ctx)?;
            if self.l.at_end() {
                ldry = true;
            }
        } else {
            rnext = true;
        }

        if rnext {
            next_handling_prune(&mut self.r, w_min - self.lmax, ctx)?;
            if self.r.at_end() {
                return Ok(Some(take_child(&mut self.l)));
            }
            self.rhead = self.r.get_docid();
        }

        if !ldry {
            self.lhead = self.l.get_docid();
            return Ok(None);
        }
        Ok(Some(take_child(&mut self.r)))
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.minmax {
            return self.decay(Some(did), w_min, ctx).map(Some);
        }

        let mut ldry = false;
        if self.lhead < did {
            skip_to_handling_prune(&mut self.l, did, w_min - self.rmax, ctx)?;
            ldry = self.l.at_end();
        }

        if self.rhead < did {
            skip_to_handling_prune(&mut self.r, did, w_min - self.lmax, ctx)?;
            if self.r.at_end() {
                return Ok(Some(take_child(&mut self.l)));
            }
            self.rhead = self.r.get_docid();
        }

        if !ldry {
            self.lhead = self.l.get_docid();
            return Ok(None);
        }
        Ok(Some(take_child(&mut self.r)))
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(self.lhead != 0 && self.rhead != 0);
        self.lhead.min(self.rhead)
    }

    pub fn at_end(&self) -> bool {
        // next/skip_to replace this node before either branch can end.
        false
    }

    pub fn get_termfreq_min(&self) -> u32 {
        self.l.get_termfreq_min().max(self.r.get_termfreq_min())
    }

    pub fn get_termfreq_est(&self) -> u32 {
        // Estimate assuming independence:
        // P(l or r) = P(l) + P(r) - P(l) . P(r)
        let lest = self.l.get_termfreq_est() as f64;
        let rest = self.r.get_termfreq_est() as f64;
        let est = lest + rest - (lest * rest / self.dbsize.max(1) as f64);
        (est + 0.5) as u32
    }

    pub fn get_termfreq_max(&self) -> u32 {
        (self.l.get_termfreq_max() as u64 + self.r.get_termfreq_max() as u64)
            .min(self.dbsize as u64) as u32
    }

    pub fn get_maxweight(&self) -> f64 {
        self.lmax + self.rmax
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.lmax = self.l.recalc_maxweight();
        self.rmax = self.r.recalc_maxweight();
        self.minmax = self.lmax.min(self.rmax);
        self.get_maxweight()
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        debug_assert!(self.lhead != 0 && self.rhead != 0);
        if self.lhead < self.rhead {
            self.l.get_weight()
        } else if self.lhead > self.rhead {
            self.r.get_weight()
        } else {
            Ok(self.l.get_weight()? + self.r.get_weight()?)
        }
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        if self.lhead > self.rhead {
            self.r.get_doclength()
        } else {
            self.l.get_doclength()
        }
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        if self.lhead < self.rhead {
            self.l.get_wdf()
        } else if self.lhead > self.rhead {
            self.r.get_wdf()
        } else {
            Ok(self.l.get_wdf()? + self.r.get_wdf()?)
        }
    }

    pub fn count_matching_subqs(&self) -> u32 {
        if self.lhead < self.rhead {
            self.l.count_matching_subqs()
        } else if self.lhead > self.rhead {
            self.r.count_matching_subqs()
        } else {
            self.l.count_matching_subqs() + self.r.count_matching_subqs()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{leaf, sample_db, walk_docids};
    use super::super::{MatchContext, PostList};
    use super::*;

    #[test]
    fn test_or_unions_in_docid_order() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let pl = PostList::Or(OrPostList::new(
            Box::new(leaf(tables, &db, b"fox")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        assert_eq!(walk_docids(pl), vec![1, 2, 3]);
    }

    #[test]
    fn test_or_weight_sums_on_tie() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut pl = PostList::Or(OrPostList::new(
            Box::new(leaf(tables, &db, b"fox")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        let mut ctx = MatchContext::default();
        pl.recalc_maxweight();
        // doc 3 holds both "fox" and "dog".
        pl.next(0.0, &mut ctx).unwrap();
        pl.next(0.0, &mut ctx).unwrap();
        pl.next(0.0, &mut ctx).unwrap();
        assert_eq!(pl.get_docid(), 3);
        assert_eq!(pl.count_matching_subqs(), 2);
        let both = pl.get_weight().unwrap();

        let mut single = leaf(tables, &db, b"fox");
        single.skip_to(3, 0.0, &mut ctx).unwrap();
        assert!(both > single.get_weight().unwrap());
    }

    #[test]
    fn test_or_rewrites_to_and_under_pressure() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut l = Box::new(leaf(tables, &db, b"fox"));
        let mut r = Box::new(leaf(tables, &db, b"dog"));
        let lmax = l.recalc_maxweight();
        let rmax = r.recalc_maxweight();
        let mut or = OrPostList::new(l, r, db.doc_count().unwrap());
        or.recalc_maxweight();
        let mut ctx = MatchContext::default();

        // Demand more weight than either branch alone can give: the OR
        // must hand back a replacement, and it must be an AND.
        let w_min = lmax.max(rmax) + 0.001;
        let replacement = or.next(w_min, &mut ctx).unwrap();
        let replacement = replacement.expect("OR must decay under pressure");
        match replacement.as_ref() {
            PostList::And(_) => {}
            _ => panic!("expected AND replacement"),
        }
        // Only doc 3 has both terms.
        assert_eq!(replacement.get_docid(), 3);
    }

    #[test]
    fn test_or_rewrites_to_and_maybe_when_one_branch_starves() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut l = Box::new(leaf(tables, &db, b"fox"));
        let r = Box::new(leaf(tables, &db, b"dog"));
        let lmax = l.recalc_maxweight();
        let mut or = OrPostList::new(l, r, db.doc_count().unwrap());
        let total = or.recalc_maxweight();
        let mut ctx = MatchContext::default();

        // More than the left branch alone, less than both together.
        let w_min = lmax + (total - lmax) * 0.5;
        let replacement = or.next(w_min, &mut ctx).unwrap();
        let replacement = replacement.expect("OR must decay");
        assert!(matches!(replacement.as_ref(), PostList::AndMaybe(_)));
    }

    #[test]
    fn test_or_prunes_to_survivor_when_branch_ends() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        // "lazy" appears only in doc 2, "the" in docs 1 and 2.
        let mut pl = Box::new(PostList::Or(OrPostList::new(
            Box::new(leaf(tables, &db, b"the")),
            Box::new(leaf(tables, &db, b"lazy")),
            db.doc_count().unwrap(),
        )));
        let mut ctx = MatchContext::default();
        let mut seen = Vec::new();
        loop {
            next_handling_prune(&mut pl, 0.0, &mut ctx).unwrap();
            if pl.at_end() {
                break;
            }
            seen.push(pl.get_docid());
        }
        assert_eq!(seen, vec![1, 2]);
        // After "lazy" ran dry the node collapsed to the bare "the" leaf.
        assert!(matches!(pl.as_ref(), PostList::Leaf(_)));
    }
}
