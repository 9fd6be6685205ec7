//! エクスポートモジュール
//!
//! マージ済みストアから実行時用のスナップショットと、
//! 必要に応じてリレーショナルデータベースを書き出します。

use std::path::PathBuf;

use clap::Parser;
use naholos::errors::NaholosError;
use naholos::export::{ExportOptions, ExportReport, Exporter};

/// エクスポートコマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "export", about = "Exports a merged store as a snapshot and a database")]
pub struct Args {
    /// Merged store directory.
    #[clap(short = 'i', long, value_name = "DIR")]
    pub merged: PathBuf,

    /// Directory to which the artifacts are written.
    #[clap(short = 'o', long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[clap(flatten)]
    pub export: ExportArgs,
}

/// エクスポートの設定
#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Number of word-form rows committed per database transaction.
    #[clap(long = "export-batch-size", default_value = "1000")]
    pub batch_size: usize,

    /// Rewrite the artifacts even if they are up to date.
    #[clap(long)]
    pub overwrite: bool,

    /// Skip the relational database.
    #[clap(long)]
    pub no_relational: bool,

    /// Also write a zstd-compressed copy of the snapshot.
    #[clap(long)]
    pub compress: bool,
}

impl ExportArgs {
    /// エクスポートの設定を返します。
    pub fn options(&self) -> ExportOptions {
        ExportOptions::default()
            .batch_size(self.batch_size.max(1))
            .overwrite(self.overwrite)
            .relational(!self.no_relational)
            .compress(self.compress)
    }
}

/// エクスポート処理中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// 入出力エラー
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Naholosライブラリのエラー
    #[error(transparent)]
    Naholos(#[from] NaholosError),
}

/// エクスポートの結果を表示します。
pub fn print_report(report: &ExportReport) {
    let m = &report.marker;
    if report.cache_hit {
        println!("export is up to date ({} entries)", m.entries);
        return;
    }
    println!(
        "{} entries, {} forms, {} features ({} skipped) in {:.2?}",
        m.entries, m.forms, m.features, m.skipped, report.elapsed
    );
    for (label, count) in &m.labels {
        println!("  {label}: {count}");
    }
    println!("  disambiguable: {}", m.disambiguable);
    println!("snapshot: {} bytes", m.snapshot_bytes);
    if let Some(bytes) = m.compressed_bytes {
        println!("compressed snapshot: {bytes} bytes");
    }
    if let Some(bytes) = m.relational_bytes {
        println!("database: {bytes} bytes");
    }
}

/// エクスポートコマンドを実行する
///
/// # エラー
///
/// マージ済みストアが存在しない場合や、書き込みに失敗した場合、`ExportError`を返します。
pub fn run(args: Args) -> Result<(), ExportError> {
    std::fs::create_dir_all(&args.out_dir)?;
    eprintln!("Exporting {}...", args.merged.display());
    let report = Exporter::new(args.export.options()).export(&args.merged, &args.out_dir)?;
    print_report(&report);
    Ok(())
}
