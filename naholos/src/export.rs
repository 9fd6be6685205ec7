//! マージ済みストアのエクスポート
//!
//! マージ済みストアを読み込み、実行時の検索に使うスナップショットと、
//! 必要に応じてリレーショナル形式(SQLite)のデータベースを書き出します。
//!
//! 出力ディレクトリには次のファイルが作成されます:
//!
//! | ファイル | 内容 |
//! | --- | --- |
//! | [`SNAPSHOT_FILE`] | rkyvスナップショット |
//! | [`COMPRESSED_SNAPSHOT_FILE`] | Zstandard圧縮したスナップショット(任意) |
//! | [`RELATIONAL_FILE`] | リレーショナルデータベース(任意) |
//! | [`EXPORT_MARKER_FILE`] | 完了マーカー |
//!
//! 各ファイルは一時ファイルに書き込んだのちに置き換えられ、完了マーカーは最後に書かれます。
//! マーカーのハッシュとファイルサイズが一致する出力だけがキャッシュヒットとみなされます。

#[cfg(feature = "sql")]
pub mod sql;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::{NaholosError, Result};
use crate::snapshot::{LoadMode, Snapshot, SnapshotBuilder};
use crate::store::{StoreReader, decode_entry, write_json_atomic};
use crate::utils::unix_now;
use crate::variant::classify;

/// スナップショットのファイル名
pub const SNAPSHOT_FILE: &str = "stress.nsnap";

/// 圧縮したスナップショットのファイル名
pub const COMPRESSED_SNAPSHOT_FILE: &str = "stress.nsnap.zst";

/// リレーショナルデータベースのファイル名
pub const RELATIONAL_FILE: &str = "stress.sqlite";

/// 完了マーカーのファイル名
pub const EXPORT_MARKER_FILE: &str = "EXPORT.json";

const VERIFY_SAMPLES: usize = 16;

/// エクスポートの設定
#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub(crate) batch_size: usize,
    pub(crate) overwrite: bool,
    pub(crate) relational: bool,
    pub(crate) compress: bool,
    pub(crate) zstd_level: i32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            overwrite: false,
            relational: cfg!(feature = "sql"),
            compress: false,
            zstd_level: 19,
        }
    }
}

impl ExportOptions {
    /// リレーショナル出力でコミットする行数を設定します。
    ///
    /// # パニック
    ///
    /// `batch_size`が0の場合にパニックします。
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        self.batch_size = batch_size;
        self
    }

    /// 既存の出力が最新でも書き直すかどうかを設定します。
    pub fn overwrite(mut self, yes: bool) -> Self {
        self.overwrite = yes;
        self
    }

    /// リレーショナルデータベースを出力するかどうかを設定します。
    pub fn relational(mut self, yes: bool) -> Self {
        self.relational = yes;
        self
    }

    /// Zstandard圧縮したスナップショットも出力するかどうかを設定します。
    pub fn compress(mut self, yes: bool) -> Self {
        self.compress = yes;
        self
    }

    /// Zstandardの圧縮レベルを設定します。
    ///
    /// # パニック
    ///
    /// レベルが1から22の範囲外の場合にパニックします。
    pub fn zstd_level(mut self, level: i32) -> Self {
        assert!((1..=22).contains(&level), "zstd level must be in 1..=22");
        self.zstd_level = level;
        self
    }
}

/// リレーショナル出力の行数
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStats {
    pub lemma_entries: u64,
    pub word_forms: u64,
    pub features: u64,
    pub translations: u64,
    pub examples: u64,
    pub alt_definitions: u64,
    pub categories: u64,
    pub tags: u64,
    pub etymology_templates: u64,
    pub inflection_templates: u64,
    pub definitions: u64,
    pub etymology_texts: u64,
}

/// エクスポートの完了マーカー
///
/// 出力の検証に必要な件数とバイト数を記録します。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMarker {
    /// マージ済みストアの内容ハッシュ
    pub merged_hash: String,
    /// エントリ数
    pub entries: u64,
    /// 語形数
    pub forms: u64,
    /// 素性の総数
    pub features: u64,
    /// 異形の種類ごとのエントリ数
    pub labels: BTreeMap<String, u64>,
    /// 区別可能なエントリ数
    pub disambiguable: u64,
    /// デコードできずに読み飛ばしたレコード数
    pub skipped: u64,
    /// スナップショットのバイト数
    pub snapshot_bytes: u64,
    /// 圧縮したスナップショットのバイト数
    pub compressed_bytes: Option<u64>,
    /// リレーショナルデータベースのバイト数
    pub relational_bytes: Option<u64>,
    /// リレーショナル出力の行数
    pub rows: Option<RowStats>,
    /// 作成時刻(UNIX秒)
    pub created_at: u64,
}

impl ExportMarker {
    /// 出力ディレクトリから完了マーカーを読み込みます。
    pub fn load<P: AsRef<Path>>(out_dir: P) -> Result<Self> {
        let file = File::open(out_dir.as_ref().join(EXPORT_MARKER_FILE))?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// エクスポートの結果
#[derive(Clone, Debug)]
pub struct ExportReport {
    /// 完了マーカー
    pub marker: ExportMarker,
    /// 既存の出力を再利用したかどうか
    pub cache_hit: bool,
    /// 所要時間
    pub elapsed: Duration,
}

fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// 任意の成果物がマーカーの記録と要求の両方に一致するかどうかを返します。
///
/// 要求された成果物はマーカーに長さが記録され、同じ長さのファイルが存在する必要があります。
/// 要求されていない成果物はマーカーに記録されていてはいけません。
fn artifact_matches(path: &Path, wanted: bool, recorded: Option<u64>) -> bool {
    match (wanted, recorded) {
        (true, Some(len)) => file_len(path) == Some(len),
        (false, None) => true,
        _ => false,
    }
}

/// 既存の出力が最新で完全かどうかを確認します。
fn up_to_date(out_dir: &Path, merged_hash: &str, opts: &ExportOptions) -> Option<ExportMarker> {
    let marker = ExportMarker::load(out_dir).ok()?;
    if marker.merged_hash != merged_hash
        || file_len(&out_dir.join(SNAPSHOT_FILE)) != Some(marker.snapshot_bytes)
    {
        return None;
    }
    let compressed = out_dir.join(COMPRESSED_SNAPSHOT_FILE);
    if !artifact_matches(&compressed, opts.compress, marker.compressed_bytes) {
        return None;
    }
    let relational = out_dir.join(RELATIONAL_FILE);
    if !artifact_matches(&relational, opts.relational, marker.relational_bytes) {
        return None;
    }
    Some(marker)
}

/// エクスポータ
pub struct Exporter {
    opts: ExportOptions,
}

impl Exporter {
    /// 新しいエクスポータを作成します。
    pub fn new(opts: ExportOptions) -> Self {
        Self { opts }
    }

    /// マージ済みストアをエクスポートします。
    ///
    /// # 引数
    ///
    /// * `merged_dir` - マージ済みストアのディレクトリ
    /// * `out_dir` - 出力ディレクトリ
    ///
    /// # エラー
    ///
    /// - マージ済みストアが存在しない場合、[`NaholosError::SourceMissing`]が返されます。
    /// - `sql`フィーチャーなしでリレーショナル出力を要求した場合、
    ///   [`NaholosError::InvalidArgument`]が返されます。
    /// - 書き込みに失敗した場合、エラーが返されます。完了マーカーは書かれません。
    pub fn export<P, Q>(&self, merged_dir: P, out_dir: Q) -> Result<ExportReport>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let start = Instant::now();
        let out_dir = out_dir.as_ref();
        let reader = StoreReader::open(merged_dir)?;
        let merged_hash = reader.manifest().content_hash.clone();

        if self.opts.relational && !cfg!(feature = "sql") {
            return Err(NaholosError::invalid_argument(
                "relational",
                "relational export requires the `sql` feature",
            ));
        }

        fs::create_dir_all(out_dir)?;
        if !self.opts.overwrite
            && let Some(marker) = up_to_date(out_dir, &merged_hash, &self.opts)
        {
            log::info!("export in {} is up to date", out_dir.display());
            return Ok(ExportReport {
                marker,
                cache_hit: true,
                elapsed: start.elapsed(),
            });
        }

        let marker_path = out_dir.join(EXPORT_MARKER_FILE);
        if marker_path.exists() {
            fs::remove_file(&marker_path)?;
        }

        #[cfg(feature = "sql")]
        let mut sql = if self.opts.relational {
            Some(sql::SqlWriter::create(out_dir, self.opts.batch_size)?)
        } else {
            None
        };

        let mut builder = SnapshotBuilder::new(merged_hash.as_str());
        let mut skipped = 0;
        for rec in reader.iter() {
            let (key, value) = rec?;
            let entry = match decode_entry(value) {
                Ok(entry) => entry,
                Err(e) => {
                    skipped += 1;
                    log::warn!("skipping undecodable record {key:?}: {e}");
                    continue;
                }
            };
            let class = classify(&entry.forms);
            #[cfg(feature = "sql")]
            if let Some(sql) = sql.as_mut() {
                sql.write_entry(&entry, class)?;
            }
            builder.push_classified(entry, class);
        }
        drop(reader);

        let inner = builder.build()?;
        let meta = inner.meta().clone();
        log::info!(
            "writing snapshot: {} entries, {} forms, {} features",
            meta.entries,
            meta.forms,
            meta.features
        );

        let snapshot_path = out_dir.join(SNAPSHOT_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
        inner.write(BufWriter::new(tmp.as_file_mut()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&snapshot_path)?;
        drop(inner);
        let snapshot_bytes = fs::metadata(&snapshot_path)?.len();

        let compressed_path = out_dir.join(COMPRESSED_SNAPSHOT_FILE);
        let compressed_bytes = if self.opts.compress {
            let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
            {
                let mut encoder = zstd::Encoder::new(tmp.as_file_mut(), self.opts.zstd_level)?;
                io::copy(&mut File::open(&snapshot_path)?, &mut encoder)?;
                encoder.finish()?;
            }
            tmp.as_file().sync_all()?;
            tmp.persist(&compressed_path)?;
            let len = fs::metadata(&compressed_path)?.len();
            log::info!("compressed snapshot: {snapshot_bytes} -> {len} bytes");
            Some(len)
        } else {
            if compressed_path.exists() {
                fs::remove_file(&compressed_path)?;
            }
            None
        };

        #[cfg(feature = "sql")]
        let (relational_bytes, rows) = match sql {
            Some(sql) => {
                let report = sql.finish(&merged_hash, &meta)?;
                (Some(report.bytes), Some(report.rows))
            }
            None => (None, None),
        };
        #[cfg(not(feature = "sql"))]
        let (relational_bytes, rows): (Option<u64>, Option<RowStats>) = (None, None);
        let relational_path = out_dir.join(RELATIONAL_FILE);
        if relational_bytes.is_none() && relational_path.exists() {
            fs::remove_file(&relational_path)?;
        }

        let snapshot = Snapshot::from_path(&snapshot_path, LoadMode::Validate)?;
        let samples = snapshot.sample_forms(VERIFY_SAMPLES);
        let verify = snapshot.verify(&samples)?;
        if !verify.missing.is_empty() {
            log::warn!(
                "{} of {} sample words do not resolve: {:?}",
                verify.missing.len(),
                verify.checked,
                verify.missing
            );
        }

        let marker = ExportMarker {
            merged_hash,
            entries: meta.entries,
            forms: meta.forms,
            features: meta.features,
            labels: meta.labels,
            disambiguable: meta.disambiguable,
            skipped,
            snapshot_bytes,
            compressed_bytes,
            relational_bytes,
            rows,
            created_at: unix_now(),
        };
        write_json_atomic(&marker_path, &marker)?;

        let elapsed = start.elapsed();
        log::info!(
            "exported {} entries to {} in {:.2?} ({} skipped)",
            marker.entries,
            out_dir.display(),
            elapsed,
            skipped
        );
        for (label, count) in &marker.labels {
            log::info!("  {label}: {count}");
        }
        Ok(ExportReport {
            marker,
            cache_hit: false,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreWriter;
    use crate::word::{LinguisticEntry, Upos, WordForm};

    fn write_store(dir: &Path) {
        let mut castle = WordForm::new("замок", vec![0], Upos::Noun).with_source("A");
        castle.definition = Some("castle".into());
        let mut lock = WordForm::new("замок", vec![1], Upos::Noun).with_source("B");
        lock.definition = Some("lock".into());

        let mut wtr = StoreWriter::create(dir, 10).unwrap();
        wtr.append(&LinguisticEntry::from_forms("замок", vec![lock, castle]))
            .unwrap();
        wtr.append(&LinguisticEntry::from_forms("мама", vec![
            WordForm::new("мама", vec![0], Upos::Noun).with_source("A"),
        ]))
        .unwrap();
        wtr.seal().unwrap();
    }

    #[test]
    fn test_export_writes_marker_and_hits_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let merged = tmp.path().join("MERGED_x");
        write_store(&merged);
        let out = tmp.path().join("out");

        let opts = ExportOptions::default().relational(false).compress(true);
        let report = Exporter::new(opts.clone()).export(&merged, &out).unwrap();
        assert!(!report.cache_hit);
        assert_eq!(report.marker.entries, 2);
        assert_eq!(report.marker.forms, 3);
        assert_eq!(report.marker.labels["grammatical_homonym"], 1);
        assert_eq!(report.marker.labels["single"], 1);
        assert_eq!(report.marker.disambiguable, 1);
        assert!(report.marker.compressed_bytes.is_some());
        assert_eq!(ExportMarker::load(&out).unwrap(), report.marker);

        let again = Exporter::new(opts.clone()).export(&merged, &out).unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.marker, report.marker);

        let forced = Exporter::new(opts.overwrite(true))
            .export(&merged, &out)
            .unwrap();
        assert!(!forced.cache_hit);
        assert_eq!(forced.marker.snapshot_bytes, report.marker.snapshot_bytes);

        let snapshot = Snapshot::from_path(out.join(SNAPSHOT_FILE), LoadMode::Validate).unwrap();
        let forms = snapshot.lookup("замок").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[0].definition.as_deref(), Some("castle"));
    }

    #[test]
    fn test_truncated_output_is_not_a_cache_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let merged = tmp.path().join("MERGED_x");
        write_store(&merged);
        let out = tmp.path().join("out");
        let opts = ExportOptions::default().relational(false);
        Exporter::new(opts.clone()).export(&merged, &out).unwrap();

        let path = out.join(SNAPSHOT_FILE);
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() / 2]).unwrap();

        let report = Exporter::new(opts).export(&merged, &out).unwrap();
        assert!(!report.cache_hit);
        assert_eq!(file_len(&path), Some(report.marker.snapshot_bytes));
    }

    #[test]
    fn test_enabling_outputs_is_not_a_cache_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let merged = tmp.path().join("MERGED_x");
        write_store(&merged);
        let out = tmp.path().join("out");

        let plain = ExportOptions::default().relational(false);
        let report = Exporter::new(plain.clone()).export(&merged, &out).unwrap();
        assert!(report.marker.compressed_bytes.is_none());
        assert!(report.marker.relational_bytes.is_none());

        let opts = ExportOptions::default()
            .relational(cfg!(feature = "sql"))
            .compress(true);
        let report = Exporter::new(opts).export(&merged, &out).unwrap();
        assert!(!report.cache_hit);
        assert!(out.join(COMPRESSED_SNAPSHOT_FILE).exists());
        assert_eq!(
            file_len(&out.join(COMPRESSED_SNAPSHOT_FILE)),
            report.marker.compressed_bytes
        );
        if cfg!(feature = "sql") {
            assert!(out.join(RELATIONAL_FILE).exists());
            assert_eq!(
                file_len(&out.join(RELATIONAL_FILE)),
                report.marker.relational_bytes
            );
        }

        // Turning the outputs off again drops them instead of reusing the marker.
        let report = Exporter::new(plain).export(&merged, &out).unwrap();
        assert!(!report.cache_hit);
        assert!(!out.join(COMPRESSED_SNAPSHOT_FILE).exists());
        assert!(!out.join(RELATIONAL_FILE).exists());
    }

    #[test]
    fn test_missing_merged_store() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Exporter::new(ExportOptions::default())
            .export(tmp.path().join("nope"), tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, NaholosError::SourceMissing(_)));
    }
}
