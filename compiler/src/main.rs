//! Naholos 辞書コンパイラのメインエントリーポイント
//!
//! このモジュールは、ストレス辞書をビルドするための様々なサブコマンドを提供します。
//! ソースの解析、ストアのマージ、スナップショットのエクスポート、
//! およびそれらを一度に実行するフルビルドを統合したCLIツールです。

mod context;
mod export;
mod full_build;
mod merge;
mod parse;

use clap::Parser;
use thiserror::Error;

use crate::{
    export::ExportError, full_build::FullBuildError, merge::MergeError, parse::ParseError,
};

/// コマンドライン引数の構造体
///
/// `clap`を使用してコマンドライン引数をパースします。
#[derive(Parser, Debug)]
#[clap(name = "compile", version)]
struct Cli {
    /// 実行するサブコマンド
    #[clap(subcommand)]
    command: Command,
}

/// 利用可能なサブコマンド
///
/// 各サブコマンドは辞書構築プロセスの異なる段に対応します。
#[derive(Parser, Debug)]
enum Command {
    /// ソースの解析からエクスポートまでをワンステップで実行します
    FullBuild(full_build::Args),

    /// ソースを解析してソースごとのストアを構築します
    Parse(parse::Args),

    /// ソースごとのストアをマージします
    Merge(merge::Args),

    /// マージ済みストアをスナップショットとデータベースに書き出します
    Export(export::Args),
}

/// コンパイラの実行中に発生する可能性のあるエラー
///
/// 各サブコマンドで発生したエラーをラップします。
#[derive(Debug, Error)]
pub enum CompileError {
    /// フルビルド実行中のエラー
    #[error(transparent)]
    FullBuild(#[from] FullBuildError),
    /// 解析中のエラー
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// マージ中のエラー
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// エクスポート中のエラー
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// メイン関数
///
/// ロガーを初期化し、コマンドライン引数をパースして指定されたサブコマンドを実行します。
/// ログの詳細度は`RUST_LOG`で変更できます(既定は`info`)。
///
/// # エラー
///
/// 各サブコマンドの実行中にエラーが発生した場合、そのエラーが返され、
/// プロセスは0以外の終了コードで終了します。
fn main() -> Result<(), CompileError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::FullBuild(args) => Ok(full_build::run(args)?),
        Command::Parse(args) => Ok(parse::run(args)?),
        Command::Merge(args) => Ok(merge::run(args)?),
        Command::Export(args) => Ok(export::run(args)?),
    }
}
