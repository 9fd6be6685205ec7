//! スナップショットの検索ベンチマーク
//!
//! 合成した辞書からスナップショットを作成し、
//! 読み込み、語形による検索、ストレス解決の速度を計測します。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use naholos::resolver::{StressLookup, Token};
use naholos::snapshot::{LoadMode, Snapshot, SnapshotBuilder};
use naholos::word::{LinguisticEntry, Upos, WordForm};
use tempfile::TempDir;

const SYLLABLES: &[&str] = &["ма", "ро", "ку", "ле", "ві", "на", "то", "за"];

struct BencherContext {
    _dir: TempDir,
    path: PathBuf,
    words: Vec<String>,
}

impl BencherContext {
    fn new() -> Self {
        let mut entries = BTreeMap::new();
        for a in SYLLABLES {
            for b in SYLLABLES {
                for c in SYLLABLES {
                    let word = format!("{a}{b}{c}");
                    let mut nom = WordForm::new(word.clone(), vec![0], Upos::Noun);
                    nom.feats.insert("Case".into(), "Nom".into());
                    let mut acc = WordForm::new(word.clone(), vec![2], Upos::Noun);
                    acc.feats.insert("Case".into(), "Acc".into());
                    entries.insert(word.clone(), LinguisticEntry::from_forms(word, vec![nom, acc]));
                }
            }
        }
        let words: Vec<String> = entries.keys().cloned().collect();

        let mut builder = SnapshotBuilder::new("bench");
        for entry in entries.into_values() {
            builder.push(entry);
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.nsnap");
        let wtr = BufWriter::new(File::create(&path).unwrap());
        builder.build().unwrap().write(wtr).unwrap();

        Self {
            _dir: dir,
            path,
            words,
        }
    }
}

fn bench_lookup(c: &mut Criterion) {
    let ctx = BencherContext::new();

    let mut group = c.benchmark_group("load");
    group.bench_function("from_path/validate", |b| {
        b.iter(|| Snapshot::from_path(&ctx.path, LoadMode::Validate).unwrap())
    });
    group.bench_function("from_path/trust_cache", |b| {
        b.iter(|| Snapshot::from_path(&ctx.path, LoadMode::TrustCache).unwrap())
    });
    group.finish();

    let snapshot = Snapshot::from_path(&ctx.path, LoadMode::Validate).unwrap();
    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(ctx.words.len() as u64));
    group.bench_function("lookup", |b| {
        b.iter(|| {
            for word in &ctx.words {
                std::hint::black_box(snapshot.lookup(word).unwrap());
            }
        })
    });

    let lookup = StressLookup::new(snapshot);
    let tokens: Vec<Token> = ctx
        .words
        .iter()
        .map(|w| Token::new(w.to_uppercase()).pos(Upos::Noun).feat("Case", "Acc"))
        .collect();
    group.bench_function("resolve", |b| {
        b.iter(|| {
            for token in &tokens {
                std::hint::black_box(lookup.resolve(token).unwrap());
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
