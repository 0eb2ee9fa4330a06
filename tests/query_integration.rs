//! Parse-then-match integration: the parser's output evaluated against
//! a real database, plus the database-assisted parser features
//! (wildcards, spelling correction, synonyms).

use std::sync::Arc;

use nautex::queryparser::{
    FLAG_DEFAULT, FLAG_PARTIAL, FLAG_SPELLING_CORRECTION, FLAG_SYNONYM, FLAG_WILDCARD,
};
use nautex::{
    Database, DatabaseSettings, Document, Enquire, Query, QueryParser,
    StringValueRangeProcessor, WritableDatabase,
};
use tempfile::TempDir;

fn build_db(dir: &TempDir) -> Database {
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    for (text, value) in [
        ("the quick brown fox", "kilo"),
        ("the lazy dog", "mike"),
        ("fox and dog", "victor"),
    ] {
        let mut doc = Document::new();
        for (i, word) in text.split_whitespace().enumerate() {
            doc.add_posting(word.as_bytes(), i as u32 + 1, 1).unwrap();
        }
        doc.set_value(0, value.as_bytes()).unwrap();
        w.add_document(&doc).unwrap();
    }
    w.commit().unwrap();
    w.close();
    Database::open(dir.path()).unwrap()
}

#[test]
fn test_parse_and_match_boolean() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    let query = qp.parse_query("fox AND dog", FLAG_DEFAULT).unwrap();

    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    let mset = enquire.get_mset(0, 10).unwrap();
    assert_eq!(mset.docids(), vec![3]);

    let query = qp.parse_query("fox OR dog", FLAG_DEFAULT).unwrap();
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    let mset = enquire.get_mset(0, 10).unwrap();
    assert_eq!(mset.len(), 3);
    assert_eq!(mset.items[0].docid, 3);
}

#[test]
fn test_parse_and_match_phrase() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);

    let query = qp.parse_query("\"quick brown\"", FLAG_DEFAULT).unwrap();
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    assert_eq!(enquire.get_mset(0, 10).unwrap().docids(), vec![1]);

    // Reversed order must not match as a phrase.
    let query = qp.parse_query("\"brown quick\"", FLAG_DEFAULT).unwrap();
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    assert!(enquire.get_mset(0, 10).unwrap().is_empty());
}

#[test]
fn test_filter_prefix_with_hate() {
    // site:example.com quick -brown with a boolean filter prefix H.
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    qp.add_boolean_prefix("site", "H").unwrap();
    let query = qp
        .parse_query("site:example.com quick -brown", FLAG_DEFAULT)
        .unwrap();
    assert_eq!(
        query,
        Query::AndNot(
            Box::new(Query::Filter(
                Box::new(Query::term_at("quick", 1)),
                Box::new(Query::term("Hexample.com")),
            )),
            Box::new(Query::term_at("brown", 2)),
        )
    );
}

#[test]
fn test_value_range_parse_and_match() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    qp.add_value_range_processor(Arc::new(StringValueRangeProcessor::new(0)));
    let query = qp.parse_query("hello..world", FLAG_DEFAULT).unwrap();
    assert_eq!(
        query,
        Query::ScaleWeight {
            factor: 0.0,
            subquery: Box::new(Query::ValueRange {
                slot: 0,
                lo: b"hello".to_vec(),
                hi: b"world".to_vec(),
            }),
        }
    );

    // Values kilo/mike/victor: kilo and mike fall inside [hello, world].
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    let mset = enquire.get_mset(0, 10).unwrap();
    assert_eq!(mset.docids(), vec![1, 2]);
    assert!(mset.items.iter().all(|i| i.weight == 0.0));
}

#[test]
fn test_wildcard_expansion() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    let query = qp
        .parse_query("qu*", FLAG_DEFAULT | FLAG_WILDCARD)
        .unwrap();
    // Only "quick" starts with qu.
    assert_eq!(query, Query::Synonym(vec![Query::term_at("quick", 1)]));

    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    assert_eq!(enquire.get_mset(0, 10).unwrap().docids(), vec![1]);
}

#[test]
fn test_partial_term_prefers_exact_form() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    let query = qp.parse_query("fox", FLAG_DEFAULT | FLAG_PARTIAL).unwrap();
    match query {
        Query::Or(subs) => {
            assert_eq!(subs.len(), 2);
            assert!(matches!(&subs[0], Query::Synonym(_)));
            assert!(matches!(&subs[1], Query::Synonym(_)));
        }
        other => panic!("expected OR of synonyms, got {}", other),
    }
}

#[test]
fn test_spelling_correction() {
    let dir = TempDir::new().unwrap();
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"search", 1).unwrap();
    w.add_document(&doc).unwrap();
    w.add_spelling(b"search", 10).unwrap();
    w.commit().unwrap();
    w.close();
    let db = Database::open(dir.path()).unwrap();

    let mut qp = QueryParser::new();
    qp.set_database(&db);
    let query = qp
        .parse_query("serch", FLAG_DEFAULT | FLAG_SPELLING_CORRECTION)
        .unwrap();
    // The parsed tree keeps the typed term; the corrected string is
    // reported alongside.
    assert_eq!(query, Query::term_at("serch", 1));
    assert_eq!(qp.get_corrected_query_string(), "search");
}

#[test]
fn test_spelling_correction_preserves_surroundings() {
    let dir = TempDir::new().unwrap();
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"search", 1).unwrap();
    doc.add_term(b"engine", 1).unwrap();
    w.add_document(&doc).unwrap();
    w.add_spelling(b"search", 10).unwrap();
    w.add_spelling(b"engine", 10).unwrap();
    w.commit().unwrap();
    w.close();
    let db = Database::open(dir.path()).unwrap();

    let mut qp = QueryParser::new();
    qp.set_database(&db);
    qp.parse_query("serch enginee", FLAG_DEFAULT | FLAG_SPELLING_CORRECTION)
        .unwrap();
    assert_eq!(qp.get_corrected_query_string(), "search engine");
}

#[test]
fn test_explicit_synonym_operator() {
    let dir = TempDir::new().unwrap();
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"car", 1).unwrap();
    w.add_document(&doc).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"automobile", 1).unwrap();
    w.add_document(&doc).unwrap();
    w.add_synonym(b"car", b"automobile").unwrap();
    w.commit().unwrap();
    w.close();
    let db = Database::open(dir.path()).unwrap();

    let mut qp = QueryParser::new();
    qp.set_database(&db);
    let query = qp
        .parse_query("~car", FLAG_DEFAULT | FLAG_SYNONYM)
        .unwrap();
    assert_eq!(
        query,
        Query::Synonym(vec![
            Query::term_at("car", 1),
            Query::term_at("automobile", 1),
        ])
    );

    // The synonym group matches documents containing either form.
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    assert_eq!(enquire.get_mset(0, 10).unwrap().len(), 2);
}

#[test]
fn test_boolean_weighting_filter_only_query() {
    let dir = TempDir::new().unwrap();
    let db = build_db(&dir);
    let mut qp = QueryParser::new();
    qp.set_database(&db);
    qp.add_boolean_prefix("kind", "K").unwrap();
    // No probabilistic part: the filter becomes the query at weight 0.
    let query = qp.parse_query("kind:anything", FLAG_DEFAULT).unwrap();
    let mut enquire = Enquire::new(&db);
    enquire.set_query(query);
    // No document carries Kanything, so the result is empty, but the
    // query must evaluate rather than error.
    assert!(enquire.get_mset(0, 10).unwrap().is_empty());
}
