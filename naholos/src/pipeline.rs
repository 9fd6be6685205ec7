//! ビルドパイプライン
//!
//! ソースごとのストアの並列構築、マージ、エクスポートを内容アドレス方式の
//! キャッシュの上でつなぎます。入力が変わっていない段は再実行されません。
//!
//! # 例
//!
//! ```no_run
//! use naholos::context::ParseContext;
//! use naholos::export::ExportOptions;
//! use naholos::pipeline::{BuildOptions, Pipeline};
//! use naholos::source::{SourceKind, SourceSpec};
//!
//! let pipeline = Pipeline::new("cache", ParseContext::default(), BuildOptions::default())?;
//! let sources = vec![
//!     SourceSpec::new(SourceKind::Text, "stress.txt").open(),
//!     SourceSpec::new(SourceKind::Kaikki, "kaikki.jsonl").open(),
//! ];
//! let report = pipeline.full_build(&sources, "out", &ExportOptions::default())?;
//! println!("{} entries", report.export.marker.entries);
//! # Ok::<(), naholos::errors::NaholosError>(())
//! ```

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::HashSet;

use crate::cache::{CacheDir, MERGED_TAG, merged_hash, source_hash};
use crate::context::ParseContext;
use crate::errors::{NaholosError, Result};
use crate::export::{ExportOptions, ExportReport, Exporter};
use crate::merge::{MergeReport, merge_stores};
use crate::source::{BatchOutcome, Source};
use crate::store::{self, StoreBuilder, StoreManifest};

/// ソースのタグが一意で、マージ済みストアのタグと衝突しないことを確認します。
///
/// キャッシュのエントリはタグごとに一つだけ残されるため、
/// 同じタグのソースは互いのストアを削除してしまいます。
fn check_tags(sources: &[Box<dyn Source>]) -> Result<()> {
    let mut seen = HashSet::with_capacity(sources.len());
    for source in sources {
        let tag = source.tag();
        if tag == MERGED_TAG {
            return Err(NaholosError::invalid_argument(
                "sources",
                format!("tag {tag} is reserved for the merged store"),
            ));
        }
        if !seen.insert(tag) {
            return Err(NaholosError::invalid_argument(
                "sources",
                format!(
                    "duplicate source tag {tag} ({}); give each source its own tag with kind:TAG:path",
                    source.path().display()
                ),
            ));
        }
    }
    Ok(())
}

/// 構築の設定
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub(crate) batch_size: usize,
    pub(crate) spill_threshold: usize,
    pub(crate) progress_interval: u64,
    pub(crate) sample_limit: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            spill_threshold: 200_000,
            progress_interval: 10_000,
            sample_limit: 8,
        }
    }
}

impl BuildOptions {
    /// ストアの一つのフレームにコミットするエントリ数を設定します。
    ///
    /// # パニック
    ///
    /// 0を指定した場合にパニックします。
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        self.batch_size = batch_size;
        self
    }

    /// メモリ上に保持する組の上限を設定します。超えた分は一時ストアに書き出されます。
    ///
    /// # パニック
    ///
    /// 0を指定した場合にパニックします。
    pub fn spill_threshold(mut self, spill_threshold: usize) -> Self {
        assert!(spill_threshold > 0, "spill_threshold must be positive");
        self.spill_threshold = spill_threshold;
        self
    }

    /// 進捗を通知するレコード数の間隔を設定します。
    ///
    /// # パニック
    ///
    /// 0を指定した場合にパニックします。
    pub fn progress_interval(mut self, progress_interval: u64) -> Self {
        assert!(progress_interval > 0, "progress_interval must be positive");
        self.progress_interval = progress_interval;
        self
    }

    /// 保持する解析失敗例の上限を設定します。
    pub fn sample_limit(mut self, sample_limit: usize) -> Self {
        self.sample_limit = sample_limit;
        self
    }
}

/// ワーカーからの進捗通知
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    /// ソースのタグ
    pub tag: String,
    /// 処理したレコード数
    pub processed: u64,
}

/// ソースごとの構築結果
#[derive(Clone, Debug)]
pub struct SourceSummary {
    /// タグ
    pub tag: String,
    /// 内容ハッシュ
    pub hash: String,
    /// ストアディレクトリ
    pub path: PathBuf,
    /// ストアのエントリ数
    pub entries: u64,
    /// 解析の集計。キャッシュヒットの場合は空です。
    pub outcome: BatchOutcome,
    /// キャッシュを再利用したかどうか
    pub cache_hit: bool,
    /// 所要時間
    pub elapsed: Duration,
}

/// マージ済みストア
#[derive(Clone, Debug)]
pub struct MergedStore {
    /// 入力ハッシュから決まるハッシュ
    pub hash: String,
    /// ストアディレクトリ
    pub path: PathBuf,
    /// マニフェスト
    pub manifest: StoreManifest,
    /// マージの結果。キャッシュヒットの場合は`None`です。
    pub report: Option<MergeReport>,
}

impl MergedStore {
    /// キャッシュを再利用したかどうかを返します。
    pub fn cache_hit(&self) -> bool {
        self.report.is_none()
    }
}

/// 全段の結果
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub sources: Vec<SourceSummary>,
    pub merged: MergedStore,
    pub export: ExportReport,
    pub elapsed: Duration,
}

fn panic_message(e: Box<dyn Any + Send>) -> String {
    if let Some(s) = e.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// ビルドパイプライン
pub struct Pipeline {
    cache: CacheDir,
    ctx: ParseContext,
    opts: BuildOptions,
}

impl Pipeline {
    /// 新しいパイプラインを作成します。
    ///
    /// # 引数
    ///
    /// * `cache_root` - ストアを保存するキャッシュディレクトリ
    /// * `ctx` - 解析の設定
    /// * `opts` - 構築の設定
    pub fn new<P: AsRef<Path>>(cache_root: P, ctx: ParseContext, opts: BuildOptions) -> Result<Self> {
        Ok(Self {
            cache: CacheDir::new(cache_root)?,
            ctx,
            opts,
        })
    }

    /// キャッシュディレクトリを返します。
    pub fn cache(&self) -> &CacheDir {
        &self.cache
    }

    /// 一つのソースのストアを構築します。
    ///
    /// 同じ内容ハッシュの完成したストアがあればそれを再利用します。
    /// 構築に成功すると、同じタグの古いストアは削除されます。
    ///
    /// # 引数
    ///
    /// * `source` - 辞書ソース
    /// * `progress` - 進捗の送信先。満杯の場合、通知は捨てられます。
    ///
    /// # エラー
    ///
    /// ソースを開けない場合や、ストアの書き込みに失敗した場合、エラーが返されます。
    /// 不正なレコードはエラーにならず、集計に数えられます。
    pub fn build_source(
        &self,
        source: &dyn Source,
        progress: Option<&SyncSender<Progress>>,
    ) -> Result<SourceSummary> {
        let start = Instant::now();
        let tag = source.tag().to_string();
        let hash = source_hash(source, &self.ctx)?;
        let path = self.cache.entry(&tag, &hash)?;

        if store::is_complete(&path) {
            let manifest = StoreManifest::load(&path)?;
            log::debug!("cache hit for {tag}: {}", path.display());
            return Ok(SourceSummary {
                tag,
                hash,
                path,
                entries: manifest.entries,
                outcome: BatchOutcome::new(self.opts.sample_limit),
                cache_hit: true,
                elapsed: start.elapsed(),
            });
        }

        log::info!("parsing {tag} from {}", source.path().display());
        let mut builder = StoreBuilder::new(&self.ctx, &self.opts);
        let mut outcome = BatchOutcome::new(self.opts.sample_limit);
        for rec in source.records(&self.ctx)? {
            match rec {
                Ok(parsed) => {
                    outcome.record_ok();
                    builder.push(parsed)?;
                }
                Err(e) => outcome.record_skip(&e),
            }
            if outcome.processed() % self.opts.progress_interval == 0
                && let Some(tx) = progress
            {
                let _ = tx.try_send(Progress {
                    tag: tag.clone(),
                    processed: outcome.processed(),
                });
            }
        }
        let runs = builder.num_runs();
        let manifest = builder.finish(&path)?;
        let pruned = self.cache.prune_stale(&tag, &hash)?;

        let elapsed = start.elapsed();
        log::info!(
            "{tag}: {} pairs, {} skipped, {} headwords ({runs} runs) in {elapsed:.2?}",
            outcome.ok,
            outcome.skipped,
            manifest.entries
        );
        for sample in &outcome.samples {
            log::warn!("{tag}: skipped {sample}");
        }
        if manifest.entries == 0 {
            log::warn!("{tag}: source produced no entries");
        }
        if pruned > 0 {
            log::debug!("{tag}: removed {pruned} stale stores");
        }

        Ok(SourceSummary {
            tag,
            hash,
            path,
            entries: manifest.entries,
            outcome,
            cache_hit: false,
            elapsed,
        })
    }

    /// すべてのソースのストアを並列に構築します。
    ///
    /// ソースごとに一つのスレッドで解析し、進捗は`on_progress`に渡されます。
    /// ワーカーからは集計だけが返され、解析結果はストアを通して受け渡されます。
    ///
    /// # 戻り値
    ///
    /// 入力と同じ順序の構築結果
    ///
    /// # エラー
    ///
    /// - タグが重複している場合、またはマージ済みストアのタグと衝突する場合、
    ///   ワーカーを起動する前に[`NaholosError::InvalidArgument`]が返されます。
    /// - いずれかのソースの構築が失敗した場合、最初のエラーが返されます。
    /// - ワーカーがパニックした場合、[`NaholosError::ThreadPanic`]が返されます。
    pub fn build_sources<F>(
        &self,
        sources: &[Box<dyn Source>],
        mut on_progress: F,
    ) -> Result<Vec<SourceSummary>>
    where
        F: FnMut(&Progress),
    {
        check_tags(sources)?;
        let (progress_tx, progress_rx) = mpsc::sync_channel(sources.len().max(1) * 4);
        let (result_tx, result_rx) = mpsc::channel();

        let panicked = thread::scope(|s| {
            let mut handles = Vec::with_capacity(sources.len());
            for (i, source) in sources.iter().enumerate() {
                let progress_tx = progress_tx.clone();
                let result_tx = result_tx.clone();
                handles.push(s.spawn(move || {
                    let summary = self.build_source(source.as_ref(), Some(&progress_tx));
                    let _ = result_tx.send((i, summary));
                }));
            }
            drop(progress_tx);
            drop(result_tx);

            for p in progress_rx.iter() {
                on_progress(&p);
            }

            let mut panicked = None;
            for handle in handles {
                if let Err(e) = handle.join() {
                    panicked.get_or_insert(panic_message(e));
                }
            }
            panicked
        });
        if let Some(msg) = panicked {
            return Err(NaholosError::ThreadPanic(msg));
        }

        let mut results: Vec<_> = result_rx.iter().collect();
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, summary)| summary).collect()
    }

    /// ソースのストアをマージします。
    ///
    /// マージ済みストアのハッシュは入力ハッシュの集合から決まり、
    /// 同じ入力のマージ済みストアがあればそれを再利用します。
    ///
    /// # エラー
    ///
    /// 入力ストアが欠落している場合、[`NaholosError::SourceMissing`]が返されます。
    pub fn merge(&self, sources: &[SourceSummary]) -> Result<MergedStore> {
        let hashes: Vec<&str> = sources.iter().map(|s| s.hash.as_str()).collect();
        let hash = merged_hash(&hashes);
        let path = self.cache.entry(MERGED_TAG, &hash)?;

        if store::is_complete(&path) {
            log::debug!("cache hit for merged store: {}", path.display());
            let manifest = StoreManifest::load(&path)?;
            return Ok(MergedStore {
                hash,
                path,
                manifest,
                report: None,
            });
        }

        let inputs: Vec<PathBuf> = sources.iter().map(|s| s.path.clone()).collect();
        let report = merge_stores(&inputs, &path, self.opts.batch_size)?;
        self.cache.prune_stale(MERGED_TAG, &hash)?;
        Ok(MergedStore {
            hash,
            path,
            manifest: report.manifest.clone(),
            report: Some(report),
        })
    }

    /// 構築、マージ、エクスポートを順に実行します。
    ///
    /// # 引数
    ///
    /// * `sources` - 辞書ソース
    /// * `out_dir` - エクスポート先
    /// * `export` - エクスポートの設定
    pub fn full_build<P: AsRef<Path>>(
        &self,
        sources: &[Box<dyn Source>],
        out_dir: P,
        export: &ExportOptions,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let summaries = self.build_sources(sources, |p| {
            log::info!("{}: {} records", p.tag, p.processed);
        })?;
        let merged = self.merge(&summaries)?;
        let export = Exporter::new(export.clone()).export(&merged.path, out_dir)?;
        let elapsed = start.elapsed();
        log::info!(
            "full build finished in {elapsed:.2?}: {} sources ({} cached), {} headwords",
            summaries.len(),
            summaries.iter().filter(|s| s.cache_hit).count(),
            merged.manifest.entries
        );
        Ok(BuildReport {
            sources: summaries,
            merged,
            export,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use super::*;
    use crate::source::{SourceKind, SourceSpec};

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_build_source_cache_hit_and_prune() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write(tmp.path(), "a.txt", "ма\u{301}ма\nхліб\n");
        let pipeline = Pipeline::new(
            tmp.path().join("cache"),
            ParseContext::default(),
            BuildOptions::default(),
        )
        .unwrap();
        let source = SourceSpec::new(SourceKind::Text, &input).open();

        let first = pipeline.build_source(source.as_ref(), None).unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.entries, 1);
        assert_eq!(first.outcome.ok, 1);
        assert_eq!(first.outcome.skipped, 1);

        let second = pipeline.build_source(source.as_ref(), None).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.hash, first.hash);

        write(tmp.path(), "a.txt", "та\u{301}то\n");
        let third = pipeline.build_source(source.as_ref(), None).unwrap();
        assert!(!third.cache_hit);
        assert_ne!(third.hash, first.hash);
        assert!(!first.path.exists());
        assert!(third.path.exists());
    }

    #[test]
    fn test_build_sources_reports_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.txt", "ма\u{301}ма\nта\u{301}то\n");
        let b = write(tmp.path(), "b.txt", "во\u{301}да\n");
        let pipeline = Pipeline::new(
            tmp.path().join("cache"),
            ParseContext::default(),
            BuildOptions::default().progress_interval(1),
        )
        .unwrap();
        let sources = vec![
            SourceSpec::new(SourceKind::Text, &a).open(),
            SourceSpec {
                kind: SourceKind::Text,
                tag: "B".into(),
                path: b,
            }
            .open(),
        ];

        let mut seen = vec![];
        let summaries = pipeline
            .build_sources(&sources, |p| seen.push(p.clone()))
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].tag, "TXT");
        assert_eq!(summaries[0].entries, 2);
        assert_eq!(summaries[1].tag, "B");
        assert_eq!(summaries[1].entries, 1);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.processed > 0));

        let merged = pipeline.merge(&summaries).unwrap();
        assert!(!merged.cache_hit());
        assert_eq!(merged.manifest.entries, 3);
        assert!(pipeline.merge(&summaries).unwrap().cache_hit());
    }

    #[test]
    fn test_build_sources_propagates_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            tmp.path().join("cache"),
            ParseContext::default(),
            BuildOptions::default(),
        )
        .unwrap();
        let sources = vec![SourceSpec::new(SourceKind::Text, tmp.path().join("missing.txt")).open()];
        assert!(pipeline.build_sources(&sources, |_| ()).is_err());
    }

    #[test]
    fn test_duplicate_tags_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.txt", "ма\u{301}ма\n");
        let b = write(tmp.path(), "b.txt", "во\u{301}да\n");
        let pipeline = Pipeline::new(
            tmp.path().join("cache"),
            ParseContext::default(),
            BuildOptions::default(),
        )
        .unwrap();

        let sources = vec![
            SourceSpec::new(SourceKind::Text, &a).open(),
            SourceSpec::new(SourceKind::Text, &b).open(),
        ];
        let err = pipeline.build_sources(&sources, |_| ()).unwrap_err();
        assert!(matches!(err, NaholosError::InvalidArgument(_)));
        assert_eq!(fs::read_dir(pipeline.cache().root()).unwrap().count(), 0);

        let reserved = vec![
            SourceSpec {
                kind: SourceKind::Text,
                tag: MERGED_TAG.into(),
                path: a.clone(),
            }
            .open(),
        ];
        let err = pipeline.build_sources(&reserved, |_| ()).unwrap_err();
        assert!(matches!(err, NaholosError::InvalidArgument(_)));

        let tagged: Vec<_> = ["txt:ONE:", "txt:TWO:"]
            .iter()
            .zip([&a, &b])
            .map(|(prefix, path)| {
                format!("{prefix}{}", path.display())
                    .parse::<SourceSpec>()
                    .unwrap()
                    .open()
            })
            .collect();
        let summaries = pipeline.build_sources(&tagged, |_| ()).unwrap();
        assert!(summaries.iter().all(|s| s.path.exists()));
        assert_eq!(pipeline.merge(&summaries).unwrap().manifest.entries, 2);
    }

    #[test]
    #[should_panic]
    fn test_zero_batch_size_panics() {
        let _ = BuildOptions::default().batch_size(0);
    }
}
