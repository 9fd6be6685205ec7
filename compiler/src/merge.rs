//! マージモジュール
//!
//! 見出し語でソートされたストアを一つのストアにマージします。

use std::path::PathBuf;

use clap::Parser;
use naholos::errors::NaholosError;
use naholos::merge::merge_stores;

/// マージコマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "merge", about = "Merges per-source stores into one store")]
pub struct Args {
    /// Input store directories.
    #[clap(short = 'i', long = "input", value_name = "DIR", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output store directory. Existing contents are replaced.
    #[clap(short = 'o', long, value_name = "DIR")]
    pub out: PathBuf,

    /// Number of entries committed per store frame.
    #[clap(long, default_value = "10000")]
    pub batch_size: usize,
}

/// マージ処理中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// 入力ストアが欠落している
    #[error("{0}; rebuild that source first")]
    SourceMissing(NaholosError),
    /// Naholosライブラリのエラー
    #[error(transparent)]
    Naholos(NaholosError),
}

impl From<NaholosError> for MergeError {
    fn from(e: NaholosError) -> Self {
        match e {
            NaholosError::SourceMissing(_) => Self::SourceMissing(e),
            e => Self::Naholos(e),
        }
    }
}

/// マージコマンドを実行する
///
/// # エラー
///
/// 入力ストアが欠落している場合、何も書き込まずに`MergeError::SourceMissing`を返します。
pub fn run(args: Args) -> Result<(), MergeError> {
    eprintln!("Merging {} stores...", args.inputs.len());
    let report = merge_stores(&args.inputs, &args.out, args.batch_size.max(1))?;
    println!(
        "{} headwords from {} records ({} skipped), {} -> {} bytes in {:.2?}",
        report.stats.headwords,
        report.stats.records_read,
        report.stats.skipped,
        report.compaction.bytes_before,
        report.compaction.bytes_after,
        report.elapsed
    );
    println!("content hash: {}", report.manifest.content_hash);
    Ok(())
}
