//! ソースごとのストアの構築
//!
//! 解析された組を見出し語ごとにメモリ上へ集め、しきい値を超えると
//! ソート済みの一時ストア(ラン)として書き出します。
//! 最後にランをストリーミングマージで一つにまとめ、封印して圧縮します。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::context::ParseContext;
use crate::errors::Result;
use crate::merge::merge_readers;
use crate::pipeline::BuildOptions;
use crate::source::Parsed;
use crate::store::{StoreManifest, StoreReader, StoreWriter, compact};
use crate::word::{LinguisticEntry, WordForm};

/// ソースごとのストアの構築器
pub struct StoreBuilder<'a> {
    ctx: &'a ParseContext,
    opts: &'a BuildOptions,
    groups: BTreeMap<String, Vec<WordForm>>,
    buffered: usize,
    scratch: Option<TempDir>,
    runs: Vec<PathBuf>,
}

impl<'a> StoreBuilder<'a> {
    /// 新しい構築器を作成します。
    pub fn new(ctx: &'a ParseContext, opts: &'a BuildOptions) -> Self {
        Self {
            ctx,
            opts,
            groups: BTreeMap::new(),
            buffered: 0,
            scratch: None,
            runs: vec![],
        }
    }

    /// 書き出したランの数を返します。
    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    /// 解析された組を追加します。
    ///
    /// # エラー
    ///
    /// ランの書き出しに失敗した場合、エラーが返されます。
    pub fn push(&mut self, parsed: Parsed) -> Result<()> {
        self.groups
            .entry(parsed.headword)
            .or_default()
            .push(parsed.form);
        self.buffered += 1;
        if self.buffered >= self.opts.spill_threshold {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.groups.is_empty() {
            return Ok(());
        }
        let scratch = match self.scratch.take() {
            Some(s) => s,
            None => tempfile::tempdir()?,
        };
        let path = scratch.path().join(format!("run-{:05}", self.runs.len()));
        self.scratch = Some(scratch);
        let mut wtr = StoreWriter::create(&path, self.opts.batch_size)?;
        for (headword, forms) in std::mem::take(&mut self.groups) {
            wtr.append(&LinguisticEntry::from_forms(headword, forms))?;
        }
        let manifest = wtr.seal()?;
        log::debug!(
            "spilled run {} ({} headwords, {} pairs)",
            path.display(),
            manifest.entries,
            self.buffered
        );
        self.runs.push(path);
        self.buffered = 0;
        Ok(())
    }

    /// 可変ストレスのポリシーを適用します。
    fn finalize(ctx: &ParseContext, entry: LinguisticEntry) -> LinguisticEntry {
        if ctx.allows_variable_stress(&entry.headword) {
            entry.combine_variable_stress()
        } else {
            entry
        }
    }

    /// ストアを書き出して封印し、圧縮します。
    ///
    /// # 引数
    ///
    /// * `dest` - ストアディレクトリ。既存の内容は置き換えられます。
    ///
    /// # 戻り値
    ///
    /// 圧縮後のマニフェスト
    pub fn finish<P: AsRef<Path>>(mut self, dest: P) -> Result<StoreManifest> {
        let dest = dest.as_ref();
        let ctx = self.ctx;
        let mut wtr = StoreWriter::create(dest, self.opts.batch_size)?;

        if self.runs.is_empty() {
            for (headword, forms) in std::mem::take(&mut self.groups) {
                let entry = Self::finalize(ctx, LinguisticEntry::from_forms(headword, forms));
                wtr.append(&entry)?;
            }
        } else {
            self.spill()?;
            let readers = self
                .runs
                .iter()
                .map(StoreReader::open)
                .collect::<Result<Vec<_>>>()?;
            merge_readers(&readers, &mut wtr, |entry| Self::finalize(ctx, entry))?;
        }

        wtr.seal()?;
        compact(dest)?;
        StoreManifest::load(dest)
    }
}
