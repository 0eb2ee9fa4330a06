//! PHRASE and NEAR: positional filtering over an intersection.
//!
//! The inner tree intersects the terms by docid; each candidate is then
//! accepted only if the terms' positions fit the window. PHRASE demands
//! the terms in order within `window` consecutive positions (so a
//! window equal to the term count means a contiguous run); NEAR accepts
//! any order with a position spread of at most `window`.

use super::{next_handling_prune, skip_to_handling_prune, MatchContext, PostList};
use crate::btree::Table;
use crate::error::Result;
use crate::store::position::read_positions;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PositionFilterKind {
    Phrase,
    Near,
}

pub struct PositionFilterPostList<'a> {
    kind: PositionFilterKind,
    window: u32,
    terms: Vec<Vec<u8>>,
    inner: Box<PostList<'a>>,
    position_table: &'a Table,
}

impl<'a> PositionFilterPostList<'a> {
    pub fn new(
        kind: PositionFilterKind,
        window: u32,
        terms: Vec<Vec<u8>>,
        inner: Box<PostList<'a>>,
        position_table: &'a Table,
    ) -> PositionFilterPostList<'a> {
        PositionFilterPostList {
            kind,
            window: window.max(terms.len() as u32),
            terms,
            inner,
            position_table,
        }
    }

    fn window_matches(&self, did: u32) -> Result<bool> {
        let mut lists = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let positions = read_positions(self.position_table, did, term)?;
            if positions.is_empty() {
                // No positional data recorded: cannot confirm the window.
                return Ok(false);
            }
            lists.push(positions);
        }
        Ok(match self.kind {
            PositionFilterKind::Phrase => phrase_within(&lists, self.window),
            PositionFilterKind::Near => near_within(&lists, self.window),
        })
    }

    fn settle(&mut self, w_min: f64, ctx: &mut MatchContext) -> Result<()> {
        while !self.inner.at_end() {
            let did = self.inner.get_docid();
            if self.window_matches(did)? {
                return Ok(());
            }
            next_handling_prune(&mut self.inner, w_min, ctx)?;
        }
        Ok(())
    }

    pub fn next(
        &mut self,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        next_handling_prune(&mut self.inner, w_min, ctx)?;
        self.settle(w_min, ctx)?;
        Ok(None)
    }

    pub fn skip_to(
        &mut self,
        did: u32,
        w_min: f64,
        ctx: &mut MatchContext,
    ) -> Result<Option<Box<PostList<'a>>>> {
        skip_to_handling_prune(&mut self.inner, did, w_min, ctx)?;
        self.settle(w_min, ctx)?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        self.inner.get_docid()
    }

    pub fn at_end(&self) -> bool {
        self.inner.at_end()
    }

    pub fn get_termfreq_min(&self) -> u32 {
        // The window can reject every intersection candidate.
        0
    }

    pub fn get_termfreq_est(&self) -> u32 {
        (self.inner.get_termfreq_est() / 2).max(1)
    }

    pub fn get_termfreq_max(&self) -> u32 {
        self.inner.get_termfreq_max()
    }

    pub fn get_maxweight(&self) -> f64 {
        self.inner.get_maxweight()
    }

    pub fn recalc_maxweight(&mut self) -> f64 {
        self.inner.recalc_maxweight()
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        self.inner.get_weight()
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        self.inner.get_doclength()
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        self.inner.get_wdf()
    }

    pub fn count_matching_subqs(&self) -> u32 {
        self.inner.count_matching_subqs()
    }
}

/// Ordered window check: positions strictly increasing list-to-list,
/// all within `window` consecutive slots.
fn phrase_within(lists: &[Vec<u32>], window: u32) -> bool {
    'starts: for &start in &lists[0] {
        let mut prev = start;
        for list in &lists[1..] {
            // Smallest position after the previous term's.
            let idx = list.partition_point(|&p| p <= prev);
            let Some(&q) = list.get(idx) else {
                continue 'starts;
            };
            prev = q;
        }
        if prev - start < window {
            return true;
        }
    }
    false
}

/// Unordered window check: one position from each list, with spread at
/// most `window`.
fn near_within(lists: &[Vec<u32>], window: u32) -> bool {
    let mut idx = vec![0usize; lists.len()];
    loop {
        let mut min = u32::MAX;
        let mut max = 0u32;
        let mut min_list = 0;
        for (k, list) in lists.iter().enumerate() {
            let p = list[idx[k]];
            if p < min {
                min = p;
                min_list = k;
            }
            max = max.max(p);
        }
        if max - min <= window {
            return true;
        }
        // Only moving the minimum can shrink the spread.
        idx[min_list] += 1;
        if idx[min_list] >= lists[min_list].len() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{leaf, sample_db, walk_docids};
    use super::super::{AndPostList, PostList};
    use super::*;

    #[test]
    fn test_phrase_within() {
        // "quick brown": positions 2 and 3.
        assert!(phrase_within(&[vec![2], vec![3]], 2));
        // Wrong order.
        assert!(!phrase_within(&[vec![3], vec![2]], 2));
        // Too far apart for the window.
        assert!(!phrase_within(&[vec![2], vec![9]], 2));
        assert!(phrase_within(&[vec![2], vec![9]], 8));
        // Three terms, one consecutive run among decoys.
        assert!(phrase_within(&[vec![1, 10], vec![11, 40], vec![2, 12]], 3));
    }

    #[test]
    fn test_near_within() {
        // Order does not matter for NEAR.
        assert!(near_within(&[vec![3], vec![2]], 2));
        assert!(!near_within(&[vec![2], vec![9]], 3));
        assert!(near_within(&[vec![5, 20], vec![18]], 3));
    }

    #[test]
    fn test_phrase_postlist_filters_by_position() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        // "quick brown" is a phrase in doc 1 only.
        let inner = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"quick")),
            Box::new(leaf(tables, &db, b"brown")),
            db.doc_count().unwrap(),
        ));
        let pl = PostList::PositionFilter(PositionFilterPostList::new(
            PositionFilterKind::Phrase,
            2,
            vec![b"quick".to_vec(), b"brown".to_vec()],
            Box::new(inner),
            &tables.position,
        ));
        assert_eq!(walk_docids(pl), vec![1]);
    }

    #[test]
    fn test_phrase_rejects_wrong_order() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        // Both words occur in doc 1, but not as "brown quick".
        let inner = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"brown")),
            Box::new(leaf(tables, &db, b"quick")),
            db.doc_count().unwrap(),
        ));
        let pl = PostList::PositionFilter(PositionFilterPostList::new(
            PositionFilterKind::Phrase,
            2,
            vec![b"brown".to_vec(), b"quick".to_vec()],
            Box::new(inner),
            &tables.position,
        ));
        assert_eq!(walk_docids(pl), Vec::<u32>::new());
    }

    #[test]
    fn test_near_accepts_either_order() {
        let (_dir, db) = sample_db();
        let tables = db.tables().unwrap();
        let inner = PostList::And(AndPostList::new(
            Box::new(leaf(tables, &db, b"brown")),
            Box::new(leaf(tables, &db, b"quick")),
            db.doc_count().unwrap(),
        ));
        let pl = PostList::PositionFilter(PositionFilterPostList::new(
            PositionFilterKind::Near,
            2,
            vec![b"brown".to_vec(), b"quick".to_vec()],
            Box::new(inner),
            &tables.position,
        ));
        assert_eq!(walk_docids(pl), vec![1]);
    }
}
