//! Single-writer enforcement across handles.

use nautex::{Database, DatabaseSettings, Document, NautexError, WritableDatabase};
use tempfile::TempDir;

#[test]
fn test_second_writer_is_locked_out_until_close() {
    let dir = TempDir::new().unwrap();
    let mut first = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"hello", 1).unwrap();
    first.add_document(&doc).unwrap();
    first.commit().unwrap();

    match WritableDatabase::open(dir.path()) {
        Err(NautexError::DatabaseLocked(_)) => {}
        Ok(_) => panic!("second writer must not open while the first is live"),
        Err(other) => panic!("expected DatabaseLocked, got {}", other),
    }

    first.close();

    // Retried after close, the second open succeeds.
    let second = WritableDatabase::open(dir.path()).unwrap();
    assert_eq!(second.doc_count().unwrap(), 1);
}

#[test]
fn test_dropping_writer_releases_lock() {
    let dir = TempDir::new().unwrap();
    {
        let _w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    }
    let _again = WritableDatabase::open(dir.path()).unwrap();
}

#[test]
fn test_readers_are_not_locked_out() {
    let dir = TempDir::new().unwrap();
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"hello", 1).unwrap();
    w.add_document(&doc).unwrap();
    w.commit().unwrap();

    // Readers open freely while the writer holds the lock, and see the
    // committed revision.
    let r1 = Database::open(dir.path()).unwrap();
    let r2 = Database::open(dir.path()).unwrap();
    assert_eq!(r1.doc_count().unwrap(), 1);
    assert_eq!(r2.doc_count().unwrap(), 1);
}

#[test]
fn test_writer_close_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let mut w = WritableDatabase::create(dir.path(), DatabaseSettings::default()).unwrap();
    let mut doc = Document::new();
    doc.add_term(b"committed", 1).unwrap();
    w.add_document(&doc).unwrap();
    w.commit().unwrap();

    let mut doc2 = Document::new();
    doc2.add_term(b"uncommitted", 1).unwrap();
    w.add_document(&doc2).unwrap();
    w.close();

    let db = Database::open(dir.path()).unwrap();
    assert!(db.term_exists(b"committed").unwrap());
    assert!(!db.term_exists(b"uncommitted").unwrap());
}
