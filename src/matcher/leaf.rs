//! Leaf posting lists: a single term's postings, and the all-documents
//! list (the empty term, whose "wdf" is the document length).

use super::weight::Weight;
use super::PostList;
use crate::db::TableSet;
use crate::error::{NautexError, Result};
use crate::store::position::PositionList;
use crate::store::postlist::PostlistIterator;

pub struct LeafPostList<'a> {
    term: Vec<u8>,
    it: PostlistIterator<'a>,
    /// Lazily-opened reader over the all-docs list, used to find the
    /// current document's length for weighting. Leaf advancement is
    /// monotonic, so one forward iterator serves the whole match.
    doclen_it: Option<PostlistIterator<'a>>,
    tables: &'a TableSet,
    weight: Box<dyn Weight>,
    max_part: f64,
}

impl<'a> LeafPostList<'a> {
    /// Open a leaf for `term`; an unindexed term yields the empty node.
    pub fn open(
        tables: &'a TableSet,
        term: &[u8],
        weight: Box<dyn Weight>,
    ) -> Result<PostList<'a>> {
        match PostlistIterator::open(&tables.postlist, term)? {
            Some(it) => {
                let max_part = weight.max_part();
                Ok(PostList::Leaf(LeafPostList {
                    term: term.to_vec(),
                    it,
                    doclen_it: None,
                    tables,
                    weight,
                    max_part,
                }))
            }
            None => Ok(PostList::empty()),
        }
    }

    pub fn next(&mut self) -> Result<Option<Box<PostList<'a>>>> {
        self.it.next()?;
        Ok(None)
    }

    pub fn skip_to(&mut self, did: u32) -> Result<Option<Box<PostList<'a>>>> {
        self.it.skip_to(did)?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        self.it.docid()
    }

    pub fn at_end(&self) -> bool {
        self.it.at_end()
    }

    pub fn get_termfreq(&self) -> u32 {
        self.it.term_freq()
    }

    pub fn get_maxweight(&self) -> f64 {
        self.max_part
    }

    pub fn get_weight(&mut self) -> Result<f64> {
        let wdf = self.it.wdf();
        let doclen = self.get_doclength()?;
        Ok(self.weight.sum_part(wdf, doclen))
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        let did = self.it.docid();
        if self.doclen_it.is_none() {
            self.doclen_it = PostlistIterator::open(&self.tables.postlist, b"")?;
        }
        let Some(doclen_it) = self.doclen_it.as_mut() else {
            return Err(NautexError::corrupt("all-documents list missing"));
        };
        doclen_it.skip_to(did)?;
        if doclen_it.at_end() || doclen_it.docid() != did {
            return Err(NautexError::corrupt(format!(
                "document {} posted but absent from the all-documents list",
                did
            )));
        }
        Ok(doclen_it.wdf() as u64)
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        Ok(self.it.wdf())
    }

    pub fn read_position_list(&mut self) -> Result<PositionList> {
        PositionList::open(&self.tables.position, self.it.docid(), &self.term)
    }
}

/// The all-documents list: every docid once, wdf 1, length on tap.
pub struct AllDocsPostList<'a> {
    it: PostlistIterator<'a>,
    doc_count: u32,
}

impl<'a> AllDocsPostList<'a> {
    pub fn open(tables: &'a TableSet) -> Result<PostList<'a>> {
        match PostlistIterator::open(&tables.postlist, b"")? {
            Some(it) => {
                let doc_count = it.term_freq();
                Ok(PostList::AllDocs(AllDocsPostList { it, doc_count }))
            }
            None => Ok(PostList::empty()),
        }
    }

    pub fn next(&mut self) -> Result<Option<Box<PostList<'a>>>> {
        self.it.next()?;
        Ok(None)
    }

    pub fn skip_to(&mut self, did: u32) -> Result<Option<Box<PostList<'a>>>> {
        self.it.skip_to(did)?;
        Ok(None)
    }

    pub fn get_docid(&self) -> u32 {
        self.it.docid()
    }

    pub fn at_end(&self) -> bool {
        self.it.at_end()
    }

    pub fn get_termfreq(&self) -> u32 {
        self.doc_count
    }

    pub fn get_maxweight(&self) -> f64 {
        0.0
    }

    pub fn get_doclength(&mut self) -> Result<u64> {
        // The stored "wdf" of the all-docs list is the document length.
        Ok(self.it.wdf() as u64)
    }

    pub fn get_wdf(&mut self) -> Result<u32> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseSettings, Document, WritableDatabase};
    use crate::matcher::weight::{Bm25Params, Bm25Weight, WeightStats};
    use crate::matcher::MatchContext;
    use tempfile::TempDir;

    fn sample_db(dir: &TempDir) -> Database {
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
        Database::open(dir.path()).unwrap()
    }

    fn bm25(db: &Database, term: &[u8]) -> Box<dyn crate::matcher::weight::Weight> {
        Box::new(Bm25Weight::new(
            Bm25Params::default(),
            &WeightStats {
                collection_size: db.doc_count().unwrap(),
                avg_length: db.avg_length().unwrap(),
                term_freq: db.term_freq(term).unwrap(),
                wqf: 1,
            },
            1.0,
        ))
    }

    #[test]
    fn test_leaf_iterates_postings() {
        let dir = TempDir::new().unwrap();
        let db = sample_db(&dir);
        let weight = bm25(&db, b"fox");
        let mut pl = LeafPostList::open(db.tables().unwrap(), b"fox", weight).unwrap();
        let mut ctx = MatchContext::default();
        pl.next(0.0, &mut ctx).unwrap();
        assert_eq!(pl.get_docid(), 1);
        assert!(pl.get_weight().unwrap() > 0.0);
        assert_eq!(pl.get_doclength().unwrap(), 4);
        pl.next(0.0, &mut ctx).unwrap();
        assert_eq!(pl.get_docid(), 3);
        assert_eq!(pl.get_doclength().unwrap(), 3);
        pl.next(0.0, &mut ctx).unwrap();
        assert!(pl.at_end());
    }

    #[test]
    fn test_absent_term_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = sample_db(&dir);
        let weight = bm25(&db, b"unicorn");
        let pl = LeafPostList::open(db.tables().unwrap(), b"unicorn", weight).unwrap();
        assert!(pl.at_end());
        assert_eq!(pl.get_termfreq_max(), 0);
    }

    #[test]
    fn test_leaf_positions() {
        let dir = TempDir::new().unwrap();
        let db = sample_db(&dir);
        let weight = bm25(&db, b"fox");
        let mut pl = LeafPostList::open(db.tables().unwrap(), b"fox", weight).unwrap();
        let mut ctx = MatchContext::default();
        pl.next(0.0, &mut ctx).unwrap();
        let mut positions = pl.read_position_list().unwrap();
        positions.next();
        assert_eq!(positions.position(), 4); // "the quick brown fox"
    }

    #[test]
    fn test_alldocs_list() {
        let dir = TempDir::new().unwrap();
        let db = sample_db(&dir);
        let mut pl = AllDocsPostList::open(db.tables().unwrap()).unwrap();
        let mut ctx = MatchContext::default();
        assert_eq!(pl.get_termfreq_est(), 3);
        pl.next(0.0, &mut ctx).unwrap();
        assert_eq!(pl.get_docid(), 1);
        assert_eq!(pl.get_wdf().unwrap(), 1);
        assert_eq!(pl.get_doclength().unwrap(), 4);
        assert!(pl.read_position_list().is_err());
    }
}
