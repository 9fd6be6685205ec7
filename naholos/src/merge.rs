//! ストアのマージ
//!
//! [`merge`]は二つのエントリを無損失にまとめる純粋関数です。
//! 結合的かつ可換で、同じエントリ同士のマージは冪等です。
//!
//! [`merge_readers`]は見出し語でソートされたN個のストアを、
//! 各ストアから一度に一件ずつだけ読み込むk-wayマージで一つのストアにまとめます。
//! メモリ使用量は入力の総サイズではなく、入力数と最大のエントリに比例します。

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::errors::Result;
use crate::store::{CompactionStats, StoreManifest, StoreReader, StoreWriter, compact, decode_entry};
use crate::word::LinguisticEntry;

/// 二つのエントリを無損失にマージします。
///
/// 語形は連結されたのち、ストレス位置と出所を除いて等しいものが一つにまとめられ、
/// ストレス位置の和集合がとられます。結果の語形は正準順序に並びます。
/// メタデータのキーが衝突した場合は辞書順で大きい値が残ります。
///
/// # 例
///
/// ```
/// use naholos::merge::merge;
/// use naholos::word::{LinguisticEntry, Upos, WordForm};
///
/// let a = LinguisticEntry::from_forms("мама", vec![WordForm::new("мама", vec![0], Upos::Noun)]);
/// let b = LinguisticEntry::from_forms("мама", vec![WordForm::new("мама", vec![1], Upos::Noun)]);
/// let merged = merge(a, b);
/// assert_eq!(merged.forms.len(), 1);
/// assert_eq!(merged.forms[0].stress_indices, vec![0, 1]);
/// ```
pub fn merge(a: LinguisticEntry, b: LinguisticEntry) -> LinguisticEntry {
    let mut meta = a.meta;
    for (key, value) in b.meta {
        match meta.get_mut(&key) {
            Some(existing) => {
                if value > *existing {
                    *existing = value;
                }
            }
            None => {
                meta.insert(key, value);
            }
        }
    }

    let mut forms = a.forms;
    forms.extend(b.forms);

    LinguisticEntry {
        headword: a.headword.min(b.headword),
        forms,
        possible_stress_indices: vec![],
        meta,
    }
    .normalized()
}

/// ストリーミングマージの統計
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// 入力ストアの数
    pub inputs: usize,
    /// 読み込んだレコードの数
    pub records_read: u64,
    /// 書き込んだ見出し語の数
    pub headwords: u64,
    /// デコードに失敗して読み飛ばしたレコードの数
    pub skipped: u64,
}

/// ソート済みのストアをk-wayマージして書き込みます。
///
/// 同じ見出し語のレコードは[`merge`]でまとめられ、`finalize`を通して書き込まれます。
/// デコードできないレコードは警告を出して読み飛ばします。
///
/// # 引数
///
/// * `readers` - 入力ストア
/// * `wtr` - 出力ストア
/// * `finalize` - 見出し語ごとのまとめが終わったエントリに適用する関数
///
/// # エラー
///
/// フレーム構造の破損や書き込みの失敗は致命的なエラーとして返されます。
pub fn merge_readers<F>(
    readers: &[StoreReader],
    wtr: &mut StoreWriter,
    mut finalize: F,
) -> Result<MergeStats>
where
    F: FnMut(LinguisticEntry) -> LinguisticEntry,
{
    let mut stats = MergeStats {
        inputs: readers.len(),
        ..Default::default()
    };
    let mut cursors: Vec<_> = readers.iter().map(StoreReader::iter).collect();
    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (i, cursor) in cursors.iter_mut().enumerate() {
        if let Some(rec) = cursor.next() {
            let (key, value) = rec?;
            heap.push(Reverse((key, i, value)));
        }
    }

    let mut group = Vec::with_capacity(readers.len());
    while let Some(Reverse((key, i, value))) = heap.pop() {
        group.clear();
        group.push((i, value));
        while heap
            .peek()
            .is_some_and(|Reverse((k, _, _))| *k == key)
        {
            if let Some(Reverse((_, j, v))) = heap.pop() {
                group.push((j, v));
            }
        }

        let mut merged: Option<LinguisticEntry> = None;
        for &(idx, value) in &group {
            stats.records_read += 1;
            match decode_entry(value) {
                Ok(entry) => {
                    merged = Some(match merged.take() {
                        Some(acc) => merge(acc, entry),
                        None => entry.normalized(),
                    });
                }
                Err(e) => {
                    stats.skipped += 1;
                    log::warn!(
                        "skipping undecodable record {key:?} in {}: {e}",
                        readers[idx].dir().display()
                    );
                }
            }
            if let Some(rec) = cursors[idx].next() {
                let (k, v) = rec?;
                heap.push(Reverse((k, idx, v)));
            }
        }

        if let Some(entry) = merged {
            wtr.append(&finalize(entry))?;
            stats.headwords += 1;
        }
    }
    Ok(stats)
}

/// ストアのマージ結果
#[derive(Clone, Debug)]
pub struct MergeReport {
    /// 出力ストアのマニフェスト(圧縮後)
    pub manifest: StoreManifest,
    /// マージの統計
    pub stats: MergeStats,
    /// 圧縮の結果
    pub compaction: CompactionStats,
    /// 所要時間
    pub elapsed: Duration,
}

/// ストアディレクトリ群をマージして新しいストアを作成し、封印して圧縮します。
///
/// # 引数
///
/// * `inputs` - 入力ストアディレクトリ
/// * `dest` - 出力ストアディレクトリ。既存の内容は置き換えられます。
/// * `batch_size` - コミットするフレームのエントリ数
///
/// # エラー
///
/// 入力ストアが欠落している、または封印されていない場合、
/// 何も書き込まずに[`crate::errors::NaholosError::SourceMissing`]を返します。
pub fn merge_stores<P: AsRef<Path>>(
    inputs: &[PathBuf],
    dest: P,
    batch_size: usize,
) -> Result<MergeReport> {
    let start = Instant::now();
    let dest = dest.as_ref();
    let readers = inputs
        .iter()
        .map(StoreReader::open)
        .collect::<Result<Vec<_>>>()?;

    let mut wtr = StoreWriter::create(dest, batch_size)?;
    let stats = merge_readers(&readers, &mut wtr, |entry| entry)?;
    wtr.seal()?;
    drop(readers);

    let compaction = compact(dest)?;
    let manifest = StoreManifest::load(dest)?;
    let elapsed = start.elapsed();

    log::info!(
        "merged {} stores into {}: {} headwords from {} records ({} skipped)",
        stats.inputs,
        dest.display(),
        stats.headwords,
        stats.records_read,
        stats.skipped
    );
    log::info!(
        "compacted merged store: {} -> {} bytes in {:.2?}",
        compaction.bytes_before,
        compaction.bytes_after,
        elapsed
    );

    Ok(MergeReport {
        manifest,
        stats,
        compaction,
        elapsed,
    })
}
