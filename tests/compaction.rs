//! Compaction scenarios, through the library and the CLI binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use nautex::{
    CompactOptions, Compactor, Database, DatabaseSettings, Document, WritableDatabase,
};
use tempfile::TempDir;

/// Ten documents of one word each, starting at `first_docid`.
fn build_source(path: &Path, word: &str, first_docid: u32, count: u32) {
    let mut w = WritableDatabase::create(path, DatabaseSettings::default()).unwrap();
    for i in 0..count {
        let mut doc = Document::new();
        doc.add_posting(word.as_bytes(), 1, 1).unwrap();
        doc.set_data(format!("{} {}", word, i).as_bytes().to_vec());
        w.replace_document(first_docid + i, &doc).unwrap();
    }
    w.commit().unwrap();
    w.close();
}

fn three_disjoint_sources(dir: &TempDir) -> Vec<PathBuf> {
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let c = dir.path().join("c");
    build_source(&a, "alpha", 1, 10); // docids 1..10
    build_source(&b, "beta", 11, 10); // docids 11..20
    build_source(&c, "gamma", 21, 10); // docids 21..30
    vec![a, b, c]
}

#[test]
fn test_no_renumber_preserves_disjoint_ranges() {
    let dir = TempDir::new().unwrap();
    let sources = three_disjoint_sources(&dir);
    let dest = dir.path().join("out");

    let options = CompactOptions {
        renumber: false,
        ..Default::default()
    };
    Compactor::new(options).compact(&sources, &dest).unwrap();

    let db = Database::open(&dest).unwrap();
    assert_eq!(db.doc_count().unwrap(), 30);
    assert_eq!(db.last_docid().unwrap(), 30);
    // Each source's documents kept their original ids and data.
    assert_eq!(db.get_document(1).unwrap().data(), b"alpha 0");
    assert_eq!(db.get_document(15).unwrap().data(), b"beta 4");
    assert_eq!(db.get_document(30).unwrap().data(), b"gamma 9");
    assert_eq!(
        db.postings(b"beta").unwrap(),
        (11..=20).map(|d| (d, 1)).collect::<Vec<_>>()
    );
}

#[test]
fn test_overlapping_ranges_rejected_without_renumber() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    build_source(&a, "alpha", 1, 10);
    build_source(&b, "beta", 5, 10); // overlaps 5..10
    let dest = dir.path().join("out");

    let options = CompactOptions {
        renumber: false,
        ..Default::default()
    };
    assert!(Compactor::new(options)
        .compact(&[a, b], &dest)
        .is_err());
}

fn compact_cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nautex-compact"))
}

#[test]
fn test_cli_no_renumber_success() {
    let dir = TempDir::new().unwrap();
    let sources = three_disjoint_sources(&dir);
    let dest = dir.path().join("out");

    let status = compact_cli()
        .arg("--no-renumber")
        .args(&sources)
        .arg(&dest)
        .status()
        .unwrap();
    assert!(status.success());

    let db = Database::open(&dest).unwrap();
    assert_eq!(db.doc_count().unwrap(), 30);
}

#[test]
fn test_cli_overlap_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    build_source(&a, "alpha", 1, 10);
    build_source(&b, "beta", 5, 10);
    let dest = dir.path().join("out");

    let output = compact_cli()
        .arg("--no-renumber")
        .arg(&a)
        .arg(&b)
        .arg(&dest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_cli_bad_blocksize_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    build_source(&a, "alpha", 1, 2);
    let dest = dir.path().join("out");

    // 3000 is not a power of two.
    let output = compact_cli()
        .arg("-b")
        .arg("3000")
        .arg(&a)
        .arg(&dest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_cli_blocksize_k_suffix() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    build_source(&a, "alpha", 1, 3);
    let dest = dir.path().join("out");

    let status = compact_cli()
        .arg("-b")
        .arg("4K")
        .arg(&a)
        .arg(&dest)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(Database::open(&dest).unwrap().doc_count().unwrap(), 3);
}

#[test]
fn test_cli_version_and_help_exit_zero() {
    assert!(compact_cli().arg("--version").status().unwrap().success());
    assert!(compact_cli().arg("--help").status().unwrap().success());
}

#[test]
fn test_spelling_and_synonym_merge() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    {
        let mut w = WritableDatabase::create(&a, DatabaseSettings::default()).unwrap();
        let mut doc = Document::new();
        doc.add_term(b"one", 1).unwrap();
        w.add_document(&doc).unwrap();
        w.add_spelling(b"shared", 3).unwrap();
        w.add_synonym(b"car", b"auto").unwrap();
        w.commit().unwrap();
    }
    {
        let mut w = WritableDatabase::create(&b, DatabaseSettings::default()).unwrap();
        let mut doc = Document::new();
        doc.add_term(b"two", 1).unwrap();
        w.add_document(&doc).unwrap();
        w.add_spelling(b"shared", 4).unwrap();
        w.add_synonym(b"car", b"automobile").unwrap();
        w.add_synonym(b"car", b"auto").unwrap();
        w.commit().unwrap();
    }
    let dest = dir.path().join("out");
    Compactor::new(CompactOptions::default())
        .compact(&[a, b], &dest)
        .unwrap();

    let db = Database::open(&dest).unwrap();
    // Frequencies summed; expansion lists unioned without duplicates.
    assert_eq!(db.get_spelling_suggestion(b"sharde").unwrap().unwrap(), b"shared");
    assert_eq!(
        db.synonyms(b"car").unwrap(),
        vec![b"auto".to_vec(), b"automobile".to_vec()]
    );
}

#[test]
fn test_compacted_database_searches_identically() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    {
        let mut w = WritableDatabase::create(&a, DatabaseSettings::default()).unwrap();
        for text in ["the quick brown fox", "the lazy dog", "fox and dog"] {
            let mut doc = Document::new();
            for (i, word) in text.split_whitespace().enumerate() {
                doc.add_posting(word.as_bytes(), i as u32 + 1, 1).unwrap();
            }
            w.add_document(&doc).unwrap();
        }
        w.commit().unwrap();
    }
    let dest = dir.path().join("out");
    Compactor::new(CompactOptions::default())
        .compact(&[a.clone()], &dest)
        .unwrap();

    let orig = Database::open(&a).unwrap();
    let compacted = Database::open(&dest).unwrap();
    for term in orig.allterms_with_prefix(b"").unwrap() {
        assert_eq!(
            orig.postings(&term).unwrap(),
            compacted.postings(&term).unwrap(),
            "postings differ for {:?}",
            String::from_utf8_lossy(&term)
        );
    }
    assert_eq!(orig.total_length().unwrap(), compacted.total_length().unwrap());
    use nautex::{Enquire, Query};
    let mut e1 = Enquire::new(&orig);
    e1.set_query(Query::And(vec![Query::term("fox"), Query::term("dog")]));
    let mut e2 = Enquire::new(&compacted);
    e2.set_query(Query::And(vec![Query::term("fox"), Query::term("dog")]));
    assert_eq!(
        e1.get_mset(0, 10).unwrap().docids(),
        e2.get_mset(0, 10).unwrap().docids()
    );
}
