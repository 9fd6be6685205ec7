use std::fs;
use std::path::Path;

use crate::context::ParseContext;
use crate::export::{EXPORT_MARKER_FILE, ExportOptions, SNAPSHOT_FILE};
use crate::pipeline::{BuildOptions, Pipeline};
use crate::resolver::{Confidence, StressLookup, Token};
use crate::snapshot::{LoadMode, Snapshot};
use crate::source::binary::write_entry;
use crate::source::{Source, SourceKind, SourceSpec};
use crate::variant::VariantType;
use crate::word::Upos;

const STRESS_TXT: &str = include_str!("resources/stress.txt");
const ZAMOK_JSONL: &str = include_str!("resources/zamok.jsonl");

fn sources(dir: &Path) -> Vec<Box<dyn Source>> {
    let txt = dir.join("stress.txt");
    fs::write(&txt, STRESS_TXT).unwrap();
    let jsonl = dir.join("zamok.jsonl");
    fs::write(&jsonl, ZAMOK_JSONL).unwrap();

    let bin = dir.join("trie.bin");
    let mut buf = vec![];
    write_entry(&mut buf, "мама", &[2]).unwrap();
    write_entry(&mut buf, "перевиконувати", &[8]).unwrap();
    fs::write(&bin, buf).unwrap();

    vec![
        SourceSpec::new(SourceKind::Text, txt).open(),
        SourceSpec::new(SourceKind::Kaikki, jsonl).open(),
        SourceSpec::new(SourceKind::Binary, bin).open(),
    ]
}

#[test]
fn test_full_build_and_resolve() {
    let tmp = tempfile::tempdir().unwrap();
    let sources = sources(tmp.path());
    let out = tmp.path().join("out");
    let pipeline = Pipeline::new(
        tmp.path().join("cache"),
        ParseContext::default(),
        BuildOptions::default().spill_threshold(3),
    )
    .unwrap();

    let report = pipeline
        .full_build(&sources, &out, &ExportOptions::default())
        .unwrap();
    assert_eq!(report.sources.len(), 3);
    assert!(report.sources.iter().all(|s| !s.cache_hit));
    assert_eq!(report.sources[1].outcome.skipped, 1);
    assert!(!report.merged.cache_hit());
    assert!(!report.export.cache_hit);
    assert!(out.join(EXPORT_MARKER_FILE).exists());

    let snapshot = Snapshot::from_path(out.join(SNAPSHOT_FILE), LoadMode::Validate).unwrap();
    assert_eq!(snapshot.variant("атлас").unwrap(), Some(VariantType::GrammaticalHomonym));
    assert_eq!(snapshot.variant("замок").unwrap(), Some(VariantType::MorphologicalVariant));
    assert_eq!(snapshot.variant("мама").unwrap(), Some(VariantType::Single));

    let lookup = StressLookup::new(snapshot);

    let res = lookup
        .resolve(&Token::new("Замок").pos(Upos::Noun).feat("Case", "Nom").feat("Number", "Sing"))
        .unwrap();
    assert_eq!(res.position, Some(0));
    assert_eq!(res.confidence, Confidence::Exact);
    assert_eq!(res.display, "За\u{301}мок");

    let res = lookup.resolve(&Token::new("замку")).unwrap();
    assert_eq!(res.confidence, Confidence::Exact);
    assert_eq!(res.display, "за\u{301}мку");

    let res = lookup.resolve(&Token::new("Мама")).unwrap();
    assert_eq!(res.position, Some(0));
    assert_eq!(res.display, "Ма\u{301}ма");

    let res = lookup.resolve(&Token::new("перевиконувати")).unwrap();
    assert_eq!(res.position, Some(3));

    let res = lookup.resolve(&Token::new("атлас")).unwrap();
    assert_eq!(res.position, Some(0));
    assert_eq!(res.confidence, Confidence::Fallback);

    let res = lookup.resolve(&Token::new("ляля")).unwrap();
    assert_eq!(res.confidence, Confidence::None);
    assert_eq!(res.display, "ляля");

    let res = lookup.resolve(&Token::new("мʼята")).unwrap();
    assert_eq!(res.display, "мʼя\u{301}та");
}

#[test]
fn test_rebuild_is_a_cache_hit() {
    let tmp = tempfile::tempdir().unwrap();
    let sources = sources(tmp.path());
    let out = tmp.path().join("out");
    let pipeline = Pipeline::new(
        tmp.path().join("cache"),
        ParseContext::default(),
        BuildOptions::default(),
    )
    .unwrap();
    let opts = ExportOptions::default();

    let first = pipeline.full_build(&sources, &out, &opts).unwrap();
    let second = pipeline.full_build(&sources, &out, &opts).unwrap();
    assert!(second.sources.iter().all(|s| s.cache_hit));
    assert!(second.merged.cache_hit());
    assert!(second.export.cache_hit);
    assert_eq!(first.export.marker, second.export.marker);
    assert_eq!(first.merged.hash, second.merged.hash);
}

#[test]
fn test_export_is_reproducible() {
    let tmp = tempfile::tempdir().unwrap();
    let sources = sources(tmp.path());
    let pipeline = Pipeline::new(
        tmp.path().join("cache"),
        ParseContext::default(),
        BuildOptions::default(),
    )
    .unwrap();
    let opts = ExportOptions::default().relational(false);

    let a = pipeline.full_build(&sources, tmp.path().join("a"), &opts).unwrap();
    let b = pipeline.full_build(&sources, tmp.path().join("b"), &opts).unwrap();
    assert_eq!(a.export.marker.entries, b.export.marker.entries);
    assert_eq!(
        fs::read(tmp.path().join("a").join(SNAPSHOT_FILE)).unwrap(),
        fs::read(tmp.path().join("b").join(SNAPSHOT_FILE)).unwrap()
    );
}
