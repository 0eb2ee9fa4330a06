//! SYNONYM: a union scored as if it were a single term.
//!
//! The inner tree (an OR over the expansion, carrying no weight of its
//! own) supplies docids and a combined wdf; this node applies one weight
//! to that, so ten spelling variants rank like one term, not like ten.

use super::weight::Weight;
use super::{next_handling_prune, skip_to_handling_prune, MatchContext, PostList};
use crate::error::Result;

pub struct SynonymPostList<'a> {
    inner: Box<PostList<'a>>,
    weight: Box<dyn Weight>,
    max_part: f64,
}

impl<'a> SynonymPostList<'a> {
    pub fn new(inner: Box<PostList<'a>>, weight: Box<dyn Weight>) -> SynonymPostList<'a> {
        let max_part = weight.max_part();
        SynonymPostList {
            inner,
            weight,
            max_part,
        }
    }

    pub fn next(&mut self, ctx: &mut MatchContext) -> Result<Option<Box<PostList<'a>>>> {
        // The subtree's own weights are all zero; never give it a floor
        // that would make it rewrite itself on bogus grounds.
        next_handling_prune(&mut self.inner, 0.0, ctx)?;
        Ok(None)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        skip_to_handling_prune(&mut self.inner, did, 0.0, ctx)?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        self.inner.get_docid()
    }

    pub fn at_end(&self) -> bool {
        self.inner.at_end()
    }

    pub fn get_termfreq_min(&self) -> u32 {
        self.inner.get_termfreq_min()
    }

    pub fn get_termfreq_est(&self) -> u32 {
        self.inner.get_termfreq_est()
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.inner.get_termfreq_max()
    }

    pub fn get_maxweight(&self) -> f64 {
        self.max_part
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.inner.recalc_maxweight();
        self.max_part
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        let wdf = self.inner.get_wdf()?;
        let doclen = self.inner.get_doclength()?;
        Ok(self.weight.sum_part(wdf, doclen))
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        self.inner.get_doclength()
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        self.inner.get_wdf()
    }
}
