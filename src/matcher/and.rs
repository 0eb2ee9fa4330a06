//! AND of two posting lists: zig-zag intersection.
//!
//! Each advance moves one branch and then lets the branches chase each
//! other's head docid with `skip_to` until they agree. The weight budget
//! passed to a branch is reduced by the most the other can contribute.

use super::{next_handling_prune, skip_to_handling_prune, MatchContext, PostList};
use crate::error::Result;

pub struct AndPostList<'a> {
    l: Box<PostList<'a>>,
    r: Box<PostList<'a>>,
    lmax: f64,
    rmax: f64,
    head: u32,
    dbsize: u32,
    finished: bool,
}

impl<'a> AndPostList<'a> {
    pub fn new(l: Box<PostList<'a>>, r: Box<PostList<'a>>, dbsize: u32) -> AndPostList<'a> {
        AndPostList {
            l,
            r,
            lmax: 0.0,
            rmax: 0.0,
            head: 0,
            dbsize,
            finished: false,
        }
    }

    /// After moving `l`, pull both branches to a common docid.
    fn find_match(&mut self, w_min: f64, ctx: &mut MatchContext) -> Result<()> {
        loop {
            if self.l.at_end() {
                self.finished = true;
                return Ok(());
            }
            let ldid = self.l.get_docid();
            skip_to_handling_prune(&mut self.r, ldid, w_min - self.lmax, ctx)?;
            if self.r.at_end() {
                self.finished = true;
                return Ok(());
            }
            let rdid = self.r.get_docid();
            if rdid == ldid {
                self.head = ldid;
                return Ok(());
            }
            skip_to_handling_prune(&mut self.l, rdid, w_min - self.rmax, ctx)?;
        }
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        next_handling_prune(&mut self.l, w_min - self.rmax, ctx)?;
        self.find_match(w_min, ctx)?;
        Ok(None)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if self.head != 0 && did <= self.head {
            return Ok(None);
        }
        skip_to_handling_prune(&mut self.l, did, w_min - self.rmax, ctx)?;
        self.find_match(w_min, ctx)?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(self.head != 0);
        self.head
    }

    pub fn at_end(&self) -> bool {
        self.finished
    }

    pub fn get_termfreq_min(&self) -> u32 {
        // Inclusion-exclusion floor.
        let sum = self.l.get_termfreq_min() as u64 + self.r.get_termfreq_min() as u64;
        sum.saturating_sub(self.dbsize as u64) as u32
    }

    pub fn get_termfreq_est(&self) -> u32 {
        let lest = self.l.get_termfreq_est() as f64;
        let rest = self.r.get_termfreq_est() as f64;
        ((lest * rest / self.dbsize.max(1) as f64) + 0.5) as u32
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.l.get_termfreq_max().min(self.r.get_termfreq_max())
    }

    pub fn get_maxweight(&self) -> f64 {
        self.lmax + self.rmax
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.lmax = self.l.recalc_maxweight();
        self.rmax = self.r.recalc_maxweight();
        self.get_maxweight()
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        Ok(self.l.get_weight()? + self.r.get_weight()?)
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        self.l.get_doclength()
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        Ok(self.l.get_wdf()? + self.r.get_wdf()?)
    }

    pub fn count_matching_subqs(&self) -> u32 {
        self.l.count_matching_subqs() + self.r.count_matching_subqs()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{leaf, sample_db, walk_docids};
    use super::super::{MatchContext, PostList};
    use super::*;

    #[test]
    fn test_and_intersects() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let pl = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"fox")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        assert_eq!(walk_docids(pl), vec![3]);
    }

    #[test]
    fn test_and_empty_when_disjoint() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let pl = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"quick")),
            Box::new(leaf(tables, &db, b"lazy")),
            db.doc_count().unwrap(),
        ));
        assert_eq!(walk_docids(pl), Vec::<u32>::new());
    }

    #[test]
    fn test_and_weight_is_sum() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let mut pl = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"fox")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        let mut ctx = MatchContext::default();
        let maxw = pl.recalc_maxweight();
        pl.next(0.0, &mut ctx).unwrap();
        let w = pl.get_weight().unwrap();
        assert!(w > 0.0 && w <= maxw + 1e-9);
        assert_eq!(pl.count_matching_subqs(), 2);
    }

    #[test]
    fn test_and_skip_to() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        // "the" in docs 1,2; "dog" in 2,3 -> intersection {2}.
        let mut pl = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"the")),
            Box::new(leaf(tables, &db, b"dog")),
            db.doc_count().unwrap(),
        ));
        let mut ctx = MatchContext::default();
        pl.skip_to(2, 0.0, &mut ctx).unwrap();
        assert_eq!(pl.get_docid(), 2);
        pl.next(0.0, &mut ctx).unwrap();
        assert!(pl.at_end());
    }
}
