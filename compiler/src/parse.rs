//! 解析モジュール
//!
//! 辞書ソースを並列に解析し、ソースごとのストアをキャッシュディレクトリに構築します。
//! 内容が変わっていないソースはキャッシュが再利用されます。

use clap::Parser;
use naholos::errors::NaholosError;
use naholos::pipeline::{Pipeline, SourceSummary};
use naholos::source::SourceSpec;

use crate::context::ContextArgs;

/// 解析コマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "parse", about = "Parses dictionary sources into per-source stores")]
pub struct Args {
    /// Sources given as `kind:path` or `kind:TAG:path`
    /// (kind: binary, text or kaikki).
    #[clap(short = 's', long = "source", value_name = "SPEC", required = true)]
    pub sources: Vec<SourceSpec>,

    #[clap(flatten)]
    pub context: ContextArgs,
}

/// 解析処理中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 入出力エラー
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Naholosライブラリのエラー
    #[error(transparent)]
    Naholos(#[from] NaholosError),
}

/// ソースごとの結果を表示します。
pub fn print_summaries(summaries: &[SourceSummary]) {
    for s in summaries {
        if s.cache_hit {
            println!("{}: cached ({} entries) {}", s.tag, s.entries, s.path.display());
        } else {
            println!(
                "{}: {} entries from {} pairs, {} skipped in {:.2?} {}",
                s.tag,
                s.entries,
                s.outcome.ok,
                s.outcome.skipped,
                s.elapsed,
                s.path.display()
            );
        }
    }
}

/// 解析コマンドを実行する
///
/// # エラー
///
/// ソースを開けない場合や、ストアの書き込みに失敗した場合、`ParseError`を返します。
pub fn run(args: Args) -> Result<(), ParseError> {
    let pipeline = Pipeline::new(
        &args.context.cache_dir,
        args.context.parse_context()?,
        args.context.build_options(),
    )?;
    let sources: Vec<_> = args.sources.iter().map(SourceSpec::open).collect();

    eprintln!("Parsing {} sources...", sources.len());
    let summaries = pipeline.build_sources(&sources, |p| {
        eprintln!("  {}: {} records", p.tag, p.processed);
    })?;
    print_summaries(&summaries);
    Ok(())
}
