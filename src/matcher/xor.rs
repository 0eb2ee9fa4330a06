//! XOR: documents matching exactly one of the two branches.
//!
//! When the weight floor rises past one branch's maximum, documents
//! matching only that branch can no longer qualify, so the node decays
//! into AND NOT of the other branch; past both maxima nothing at all
//! can qualify.

use tracing::debug;

use super::{
    next_handling_prune, skip_to_handling_prune, take_child, AndNotPostList, MatchContext,
    PostList,
};
use crate::error::Result;

pub struct XorPostList<'a> {
    l: Box<PostList<'a>>,
    r: Box<PostList<'a>>,
    lhead: u32,
    rhead: u32,
    ldry: bool,
    rdry: bool,
    lmax: f64,
    rmax: f64,
    minmax: f64,
    dbsize: u32,
    finished: bool,
}

impl<'a> XorPostList<'a> {
    pub fn new(l: Box<PostList<'a>>, r: Box<PostList<'a>>, dbsize: u32) -> XorPostList<'a> {
        XorPostList {
            l,
            r,
            lhead: 0,
            rhead: 0,
            ldry: false,
            rdry: false,
            lmax: 0.0,
            rmax: 0.0,
            minmax: 0.0,
            dbsize,
            finished: false,
        }
    }

    fn decay(
        &mut self,
        target: Option<u32>,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.lmax && w_min > self.rmax {
            // A document matches exactly one branch, so its weight is
            // bounded by that branch's max: nothing can qualify.
            self.finished = true;
            return Ok(None);
        }
        let l = take_child(&mut self.l);
        let r = take_child(&mut self.r);
        let mut ret = if w_min > self.lmax {
            debug!("XOR -> AND NOT (left starved)");
            Box::new(PostList::AndNot(AndNotPostList::with_heads(
                r,
                l,
                self.rhead,
                self.lhead,
                self.dbsize,
            )))
        } else {
            debug!("XOR -> AND NOT (right starved)");
            Box::new(PostList::AndNot(AndNotPostList::with_heads(
                l,
                r,
                self.lhead,
                self.rhead,
                self.dbsize,
            )))
        };
        match target {
            Some(did) => skip_to_handling_prune(&mut ret, did, w_min, ctx)?,
            None => next_handling_prune(&mut ret, w_min, ctx)?,
        }
        Ok(Some(ret))
    }

    /// Advance whichever branches sit at (or before) the last emitted
    /// docid, looping past positions where both branches coincide.
    fn resolve(
        &mut self,
        mut lnext: bool,
        mut rnext: bool,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        loop {
            if lnext && !self.ldry {
                next_handling_prune(&mut self.l, w_min, ctx)?;
                if self.l.at_end() {
                    self.ldry = true;
                } else {
                    self.lhead = self.l.get_docid();
                }
            }
            if rnext && !self.rdry {
                next_handling_prune(&mut self.r, w_min, ctx)?;
                if self.r.at_end() {
                    self.rdry = true;
                } else {
                    self.rhead = self.r.get_docid();
                }
            }
            match (self.ldry, self.rdry) {
                (true, true) => {
                    self.finished = true;
                    return Ok(None);
                }
                (true, false) => return Ok(Some(take_child(&mut self.r))),
                (false, true) => return Ok(Some(take_child(&mut self.l))),
                (false, false) => {
                    if self.lhead != self.rhead {
                        return Ok(None);
                    }
                    // Both sides match: excluded, move past it.
                    lnext = true;
                    rnext = true;
                }
            }
        }
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.minmax {
            return self.decay(None, w_min, ctx);
        }
        let lnext = self.lhead <= self.rhead;
        let rnext = self.rhead <= self.lhead;
        self.resolve(lnext, rnext, w_min, ctx)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        if w_min > self.minmax {
            return self.decay(Some(did), w_min, ctx);
        }
        if self.lhead < did {
            skip_to_handling_prune(&mut self.l, did, w_min, ctx)?;
            if self.l.at_end() {
                self.ldry = true;
            } else {
                self.lhead = self.l.get_docid();
            }
        }
        if self.rhead < did {
            skip_to_handling_prune(&mut self.r, did, w_min, ctx)?;
            if self.r.at_end() {
                self.rdry = true;
            } else {
                self.rhead = self.r.get_docid();
            }
        }
        // No advancement needed unless the branches now coincide.
        self.resolve(false, false, w_min, ctx)
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(!self.finished);
        if self.ldry {
            self.rhead
        } else if self.rdry {
            self.lhead
        } else {
            self.lhead.min(self.rhead)
        }
    }

    pub fn at_end(&self) -> bool {
        self.finished
    }

    fn current_is_left(&self) -> bool {
        !self.ldry && (self.rdry || self.lhead < self.rhead)
    }

    pub fn get_termfreq_min(&self) -> u32 {
        let a = self
            .l
            .get_termfreq_min()
            .saturating_sub(self.r.get_termfreq_max());
        let b = self
            .r
            .get_termfreq_min()
            .saturating_sub(self.l.get_termfreq_max());
        a.max(b)
    }

    pub fn get_termfreq_est(&self) -> u32 {
        let lest = self.l.get_termfreq_est() as f64;
        let rest = self.r.get_termfreq_est() as f64;
        let est = lest + rest - 2.0 * lest * rest / self.dbsize.max(1) as f64;
        (est.max(0.0) + 0.5) as u32
    }

    pub fn get_termfreq_max(&self) -> u32 {
        (self.l.get_termfreq_max() as u64 + self.r.get_termfreq_max() as u64)
            .min(self.dbsize as u64) as u32
    }

    pub fn get_maxweight(&self) -> f64 {
        self.lmax.max(self.rmax)
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.lmax = self.l.recalc_maxweight();
        self.rmax = self.r.recalc_maxweight();
        self.minmax = self.lmax.min(self.rmax);
        self.get_maxweight()
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        if self.current_is_left() {
            self.l.get_weight()
        } else {
            self.r.get_weight()
        }
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        if self.current_is_left() {
            self.l.get_doclength()
        } else {
            self.r.get_doclength()
        }
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        if self.current_is_left() {
            self.l.get_wdf()
        } else {
            self.r.get_wdf()
        }
    }

    pub fn count_matching_subqs(&self) -> u32 {
        if self.current_is_left() {
            self.l.count_matching_subqs()
        } else {
            self.r.count_matching_subqs()
        }
    }
}
