//! サブコマンド共通の引数
//!
//! 解析の設定(見出し語の対応表、可変ストレスのリスト)と構築の設定を
//! コマンドライン引数から組み立てます。

use std::fs::File;
use std::path::PathBuf;

use clap::Args;
use naholos::context::{Normalizer, ParseContext, TableLemmatizer, VariableStressList};
use naholos::errors::NaholosError;
use naholos::pipeline::BuildOptions;

/// 解析と構築の設定
#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Directory in which per-source and merged stores are cached.
    #[clap(long, value_name = "DIR", default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Form-to-lemma table (`form<TAB>lemma` per line) used as headwords.
    #[clap(long, value_name = "FILE")]
    pub lemmas: Option<PathBuf>,

    /// Lemmas whose forms may carry several stress positions (one per line).
    #[clap(long, value_name = "FILE")]
    pub variable_stress: Option<PathBuf>,

    /// Number of entries committed per store frame.
    #[clap(long, default_value = "10000")]
    pub batch_size: usize,

    /// Number of parsed pairs kept in memory before spilling to a run store.
    #[clap(long, default_value = "200000")]
    pub spill_threshold: usize,
}

impl ContextArgs {
    /// 解析の設定を読み込みます。
    pub fn parse_context(&self) -> Result<ParseContext, NaholosError> {
        let normalizer = Normalizer::ukrainian();
        let mut ctx = ParseContext::new(normalizer.clone());
        if let Some(path) = &self.lemmas {
            let table = TableLemmatizer::from_reader(File::open(path)?, &normalizer)?;
            log::info!("loaded {} lemma mappings from {}", table.len(), path.display());
            ctx = ctx.lemmatizer(table);
        }
        if let Some(path) = &self.variable_stress {
            let list = VariableStressList::from_reader(File::open(path)?, &normalizer)?;
            log::info!("loaded {} variable-stress lemmas from {}", list.len(), path.display());
            ctx = ctx.stress_policy(list);
        }
        Ok(ctx)
    }

    /// 構築の設定を返します。
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions::default()
            .batch_size(self.batch_size.max(1))
            .spill_threshold(self.spill_threshold.max(1))
    }
}
