//! フルビルドモジュール
//!
//! ソースの解析、マージ、エクスポートの3つのステップを自動的に実行します。
//! 各ステップの成果物はキャッシュされ、入力が変わらない限り再利用されます。

use std::path::PathBuf;

use clap::Parser;
use naholos::errors::NaholosError;
use naholos::export::Exporter;
use naholos::pipeline::Pipeline;
use naholos::source::SourceSpec;

use crate::context::ContextArgs;
use crate::export::{self, ExportArgs};
use crate::parse;

/// フルビルドコマンドの引数
#[derive(Parser, Debug)]
#[clap(
    name = "full-build",
    about = "Builds the stress snapshot and all intermediate stores from the sources"
)]
pub struct Args {
    /// Sources given as `kind:path` or `kind:TAG:path`
    /// (kind: binary, text or kaikki).
    #[clap(short = 's', long = "source", value_name = "SPEC", required = true)]
    pub sources: Vec<SourceSpec>,

    /// Directory to which the exported artifacts are written.
    #[clap(short = 'o', long, value_name = "OUTPUT_DIR")]
    pub out_dir: PathBuf,

    #[clap(flatten)]
    pub context: ContextArgs,

    #[clap(flatten)]
    pub export: ExportArgs,
}

/// フルビルド処理中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum FullBuildError {
    /// 入出力エラー
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Naholosライブラリのエラー
    #[error(transparent)]
    Naholos(#[from] NaholosError),
}

/// フルビルドコマンドを実行する
///
/// 以下の3つのステップを順次実行します:
/// 1. ソースを並列に解析してソースごとのストアを構築
/// 2. ストアをマージ
/// 3. スナップショットとデータベースを書き出し
///
/// # エラー
///
/// 各ステップの処理やファイルの入出力に失敗した場合、`FullBuildError`を返します。
pub fn run(args: Args) -> Result<(), FullBuildError> {
    std::fs::create_dir_all(&args.out_dir)?;
    let pipeline = Pipeline::new(
        &args.context.cache_dir,
        args.context.parse_context()?,
        args.context.build_options(),
    )?;
    let sources: Vec<_> = args.sources.iter().map(SourceSpec::open).collect();

    println!("[1/3] Parsing {} sources...", sources.len());
    let summaries = pipeline.build_sources(&sources, |p| {
        eprintln!("  {}: {} records", p.tag, p.processed);
    })?;
    parse::print_summaries(&summaries);

    println!("[2/3] Merging stores...");
    let merged = pipeline.merge(&summaries)?;
    if merged.cache_hit() {
        println!("merged store is up to date ({} entries)", merged.manifest.entries);
    } else {
        println!("{} headwords in {}", merged.manifest.entries, merged.path.display());
    }

    println!("[3/3] Exporting...");
    let report = Exporter::new(args.export.options()).export(&merged.path, &args.out_dir)?;
    export::print_report(&report);

    println!("Successfully built all artifacts in {}", args.out_dir.display());
    Ok(())
}
