//! Ranking weights.
//!
//! A `Weight` scores one (document, term) pairing from the wdf and the
//! document length, and bounds its own maximum so the matcher can prune.
//! `Bm25Weight` is the default scheme (BM25+ with the usual k1/b plus a
//! delta floor); `BoolWeight` scores zero everywhere and turns matching
//! into pure filtering.

use serde::{Deserialize, Serialize};

/// BM25+ parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter
    pub k1: f64,
    /// Length normalization parameter
    pub b: f64,
    /// BM25+ delta parameter (avoids zero scores for high-frequency terms)
    pub delta: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params {
            k1: 1.2,
            b: 0.75,
            delta: 1.0,
        }
    }
}

/// Collection-level statistics a weight is initialised from.
#[derive(Clone, Copy, Debug)]
pub struct WeightStats {
    /// Documents in the collection.
    pub collection_size: u32,
    /// Average document length.
    pub avg_length: f64,
    /// Documents containing the term being weighted.
    pub term_freq: u32,
    /// Occurrences of the term in the query.
    pub wqf: u32,
}

/// Per-term document scorer.
pub trait Weight: Send + Sync {
    /// Upper bound on `sum_part` over any document.
    fn max_part(&self) -> f64;

    /// Score contribution for a document with the given wdf and length.
    fn sum_part(&self, wdf: u32, doclen: u64) -> f64;

    /// Upper bound on `sum_extra`.
    fn max_extra(&self) -> f64 {
        0.0
    }

    /// Document-level (term-independent) contribution.
    fn sum_extra(&self, _doclen: u64) -> f64 {
        0.0
    }
}

/// BM25+ scoring.
#[derive(Clone, Debug)]
pub struct Bm25Weight {
    params: Bm25Params,
    idf: f64,
    avg_length: f64,
    wqf: f64,
    /// Scale factor applied to everything (used by weight-scaled query
    /// subtrees; zero makes this equivalent to a boolean filter).
    factor: f64,
}

impl Bm25Weight {
    pub fn new(params: Bm25Params, stats: &WeightStats, factor: f64) -> Bm25Weight {
        let n = stats.collection_size as f64;
        let tf = stats.term_freq as f64;
        // Robust idf; never negative even for terms in most documents.
        let idf = ((n - tf + 0.5) / (tf + 0.5) + 1.0).ln();
        Bm25Weight {
            params,
            idf,
            avg_length: stats.avg_length.max(f64::MIN_POSITIVE),
            wqf: stats.wqf.max(1) as f64,
            factor,
        }
    }

    fn scale(&self) -> f64 {
        self.factor * self.wqf * self.idf
    }
}

impl Weight for Bm25Weight {
    fn max_part(&self) -> f64 {
        // tf' / (tf' + k1 * norm) < 1, and norm >= 1 - b.
        self.scale() * (self.params.k1 + 1.0 + self.params.delta)
    }

    fn sum_part(&self, wdf: u32, doclen: u64) -> f64 {
        if wdf == 0 {
            return 0.0;
        }
        let tf = wdf as f64;
        let norm = 1.0 - self.params.b + self.params.b * (doclen as f64 / self.avg_length);
        let core = (tf * (self.params.k1 + 1.0)) / (tf + self.params.k1 * norm);
        self.scale() * (core + self.params.delta)
    }
}

/// Weight which is zero everywhere: pure boolean retrieval.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoolWeight;

impl Weight for BoolWeight {
    fn max_part(&self) -> f64 {
        0.0
    }

    fn sum_part(&self, _wdf: u32, _doclen: u64) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(n: u32, tf: u32) -> WeightStats {
        WeightStats {
            collection_size: n,
            avg_length: 10.0,
            term_freq: tf,
            wqf: 1,
        }
    }

    #[test]
    fn test_bm25_orders_by_wdf() {
        let w = Bm25Weight::new(Bm25Params::default(), &stats(100, 5), 1.0);
        let one = w.sum_part(1, 10);
        let five = w.sum_part(5, 10);
        assert!(five > one);
        assert!(one > 0.0);
    }

    #[test]
    fn test_bm25_penalises_long_documents() {
        let w = Bm25Weight::new(Bm25Params::default(), &stats(100, 5), 1.0);
        assert!(w.sum_part(2, 5) > w.sum_part(2, 50));
    }

    #[test]
    fn test_bm25_rare_terms_weigh_more() {
        let rare = Bm25Weight::new(Bm25Params::default(), &stats(1000, 2), 1.0);
        let common = Bm25Weight::new(Bm25Params::default(), &stats(1000, 900), 1.0);
        assert!(rare.sum_part(1, 10) > common.sum_part(1, 10));
    }

    #[test]
    fn test_max_part_bounds_sum_part() {
        let w = Bm25Weight::new(Bm25Params::default(), &stats(100, 5), 1.0);
        for wdf in [1u32, 2, 10, 1000] {
            for doclen in [1u64, 5, 50, 5000] {
                assert!(w.sum_part(wdf, doclen) <= w.max_part() + 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_factor_is_boolean() {
        let w = Bm25Weight::new(Bm25Params::default(), &stats(100, 5), 0.0);
        assert_eq!(w.sum_part(3, 10), 0.0);
        assert_eq!(w.max_part(), 0.0);
    }

    #[test]
    fn test_bool_weight_is_zero() {
        let w = BoolWeight;
        assert_eq!(w.sum_part(7, 3), 0.0);
        assert_eq!(w.max_part(), 0.0);
        assert_eq!(w.sum_extra(10), 0.0);
    }
}
