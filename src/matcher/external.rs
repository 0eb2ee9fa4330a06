//! Posting list over an externally computed result set, and the
//! non-blocking preparation handshake used for remote sub-matches.
//!
//! A remote peer runs its share of the match elsewhere and sends back a
//! ranked set; locally it is replayed as a docid-ordered posting list
//! with pinned weights. Statistics exchange happens before matching: a
//! scheduler calls `prepare(nowait = true)` and retries while the reply
//! has not arrived, instead of blocking a thread on the wire.

use super::PostList;
use crate::error::{NautexError, Result};

/// Outcome of a non-blocking prepare step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrepareState {
    /// Statistics are in; the sub-match can be built.
    Ready,
    /// Reply not yet arrived; reschedule and try again.
    NotReady,
}

/// A remote sub-match: statistics arrive asynchronously, then the
/// prefetched result set becomes a posting list.
pub struct RemoteMatch {
    items: Vec<(u32, f64)>,
    stats_arrived: bool,
}

impl RemoteMatch {
    /// `items` are (docid, weight) pairs as returned by the remote end.
    pub fn new(items: Vec<(u32, f64)>) -> RemoteMatch {
        RemoteMatch {
            items,
            stats_arrived: false,
        }
    }

    /// Mark the statistics reply as delivered (the transport layer calls
    /// this when the message lands).
    pub fn stats_delivered(&mut self) {
        self.stats_arrived = true;
    }

    /// Prepare the sub-match. With `nowait` set this never blocks: it
    /// reports `NotReady` until [`RemoteMatch::stats_delivered`] has
    /// run. Without `nowait` the statistics must already be there (the
    /// blocking transport delivers them before returning).
    pub fn prepare(&mut self, nowait: bool) -> Result<PrepareState> {
        if self.stats_arrived {
            return Ok(PrepareState::Ready);
        }
        if nowait {
            return Ok(PrepareState::NotReady);
        }
        Err(NautexError::Network(
            "blocking prepare without a statistics reply".into(),
        ))
    }

    /// Consume the prefetched set as a posting list.
    pub fn into_postlist(self) -> Result<ExternalPostList> {
        if !self.stats_arrived {
            return Err(NautexError::InvalidOperation(
                "remote sub-match used before prepare completed".into(),
            ));
        }
        Ok(ExternalPostList::new(self.items))
    }
}

/// Replays a prefetched (docid, weight) set in docid order.
pub struct ExternalPostList {
    items: Vec<(u32, f64)>,
    idx: usize,
    started: bool,
    max_weight: f64,
}

impl ExternalPostList {
    pub fn new(mut items: Vec<(u32, f64)>) -> ExternalPostList {
        items.sort_by_key(|&(did, _)| did);
        items.dedup_by_key(|&mut (did, _)| did);
        let max_weight = items.iter().map(|&(_, w)| w).fold(0.0, f64::max);
        ExternalPostList {
            items,
            idx: 0,
            started: false,
            max_weight,
        }
    }

    pub fn next(&mut self) -> Result<Option<Box<PostList<'static>>>> {
        if !self.started {
            self.started = true;
        } else if self.idx < self.items.len() {
            self.idx += 1;
        }
        Ok(None)
    }

    pub fn skip_to(&mut self, did: u32) -> Result<Option<Box<PostList<'static>>>> {
        self.started = true;
        while self.idx < self.items.len() && self.items[self.idx].0 < did {
            self.idx += 1;
        }
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        debug_assert!(self.started && !self.at_end());
        self.items[self.idx].0
    }

    pub fn at_end(&self) -> bool {
        self.started && self.idx >= self.items.len()
    }

    pub fn get_termfreq(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn get_maxweight(&self) -> f64 {
        self.max_weight
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        Ok(self.items[self.idx].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_handshake() {
        let mut remote = RemoteMatch::new(vec![(3, 1.5), (1, 2.0)]);
        assert_eq!(remote.prepare(true).unwrap(), PrepareState::NotReady);
        assert_eq!(remote.prepare(true).unwrap(), PrepareState::NotReady);
        remote.stats_delivered();
        assert_eq!(remote.prepare(true).unwrap(), PrepareState::Ready);
        let pl = remote.into_postlist().unwrap();
        assert_eq!(pl.get_termfreq(), 2);
    }

    #[test]
    fn test_blocking_prepare_without_stats_is_an_error() {
        let mut remote = RemoteMatch::new(vec![]);
        assert!(matches!(
            remote.prepare(false),
            Err(NautexError::Network(_))
        ));
    }

    #[test]
    fn test_external_iterates_in_docid_order() {
        let mut pl = ExternalPostList::new(vec![(9, 0.5), (2, 1.25), (5, 0.75)]);
        let mut seen = Vec::new();
        pl.next().unwrap();
        while !pl.at_end() {
            seen.push((pl.get_docid(), pl.get_weight().unwrap()));
            pl.next().unwrap();
        }
        assert_eq!(seen, vec![(2, 1.25), (5, 0.75), (9, 0.5)]);
        assert_eq!(pl.get_maxweight(), 1.25);
    }

    #[test]
    fn test_external_skip_to() {
        let mut pl = ExternalPostList::new(vec![(2, 0.1), (5, 0.2), (9, 0.3)]);
        pl.skip_to(4).unwrap();
        assert_eq!(pl.get_docid(), 5);
        pl.skip_to(100).unwrap();
        assert!(pl.at_end());
    }
}
