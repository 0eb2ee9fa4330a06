//! AND NOT: documents matching the left branch and not the right.
//!
//! The right branch is a pure filter: it contributes no weight and its
//! exhaustion prunes the node down to the bare left branch.

use super::{next_handling_prune, skip_to_handling_prune, take_child, MatchContext, PostList};
use crate::error::Result;

pub struct AndNotPostList<'a> {
    l: Box<PostList<'a>>,
    r: Box<PostList<'a>>,
    lhead: u32,
    rhead: u32,
    lmax: f64,
    dbsize: u32,
    finished: bool,
}

impl<'a> AndNotPostList<'a> {
    pub fn new(l: Box<PostList<'a>>, r: Box<PostList<'a>>, dbsize: u32) -> AndNotPostList<'a> {
        Self::with_heads(l, r, 0, 0, dbsize)
    }

    /// Used when another node decays into this one with both branches
    /// already positioned.
    pub fn with_heads(
        l: Box<PostList<'a>>,
        r: Box<PostList<'a>>,
        lhead: u32,
        rhead: u32,
        dbsize: u32,
    ) -> AndNotPostList<'a> {
        AndNotPostList {
            l,
            r,
            lhead,
            rhead,
            lmax: 0.0,
            dbsize,
            finished: false,
        }
    }

    /// With `l` freshly moved, find the next unfiltered document.
    fn find_next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        loop {
            if self.l.at_end() {
                self.finished = true;
                return Ok(None);
            }
            let ldid = self.l.get_docid();
            if !self.r.at_end() && self.rhead < ldid {
                skip_to_handling_prune(&mut self.r, ldid, 0.0, ctx)?;
                if !self.r.at_end() {
                    self.rhead = self.r.get_docid();
                }
            }
            if self.r.at_end() {
                // Nothing left to filter out: decay to the left branch.
                self.lhead = ldid;
                return Ok(Some(take_child(&mut self.l)));
            }
            if self.rhead != ldid {
                self.lhead = ldid;
                return Ok(None);
            }
            next_handling_prune(&mut self.l, w_min, ctx)?;
        }
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        next_handling_prune(&mut self.l, w_min, ctx)?;
        self.find_next(w_min, ctx)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if self.lhead != 0 && did <= self.lhead {
            return Ok(None);
        }
        skip_to_handling_prune(&mut self.l, did, w_min, ctx)?;
        self.find_next(w_min, ctx)
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(self.lhead != 0);
        self.lhead
    }

    pub fn at_end(&self) -> bool {
        self.finished
    }

    pub fn get_termfreq_min(&self) -> u32 {
        self.l
            .get_termfreq_min()
            .saturating_sub(self.r.get_termfreq_max())
    }

    pub fn get_termfreq_est(&self) -> u32 {
        let lest = self.l.get_termfreq_est() as f64;
        let rest = self.r.get_termfreq_est() as f64;
        let est = lest * (1.0 - rest / self.dbsize.max(1) as f64);
        (est.max(0.0) + 0.5) as u32
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.l.get_termfreq_max()
    }

    pub fn get_maxweight(&self) -> f64 {
        self.lmax
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.lmax = self.l.recalc_maxweight();
        self.r.recalc_maxweight();
        self.lmax
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        self.l.get_weight()
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        self.l.get_doclength()
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        self.l.get_wdf()
    }

    pub fn count_matching_subqs(&self) -> u32 {
        self.l.count_matching_subqs()
    }
}
