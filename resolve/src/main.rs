//! ストレスを解決するユーティリティ
//!
//! このバイナリは、標準入力から`surface<TAB>UPOS<TAB>Feat=Val|...`形式の行を読み込み、
//! スナップショットを引いてストレス記号を付けた語を、
//! 指定された出力形式(text、detail)で出力します。

use std::error::Error;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use naholos::resolver::{StressLookup, Token};
use naholos::snapshot::{LoadMode, Snapshot};

use clap::Parser;

/// 出力モード
#[derive(Clone, Debug)]
enum OutputMode {
    Text,
    Detail,
}

impl FromStr for OutputMode {
    type Err = &'static str;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "text" => Ok(Self::Text),
            "detail" => Ok(Self::Detail),
            _ => Err("Could not parse a mode"),
        }
    }
}

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "resolve", about = "Places stress marks on tokens")]
struct Args {
    /// Stress snapshot. Files ending in `.zst` are decompressed into the cache directory.
    #[clap(short = 'i', long)]
    snapshot: PathBuf,

    /// Output mode. Choices are text and detail.
    #[clap(short = 'O', long, default_value = "text")]
    output_mode: OutputMode,

    /// Skips validation when a proof from an earlier run exists.
    #[clap(long)]
    trust_cache: bool,

    /// Directory for decompressed snapshots.
    #[clap(long, default_value = ".cache")]
    cache_dir: PathBuf,
}

/// スナップショットを読み込みます。
fn load(args: &Args) -> Result<Snapshot, Box<dyn Error>> {
    let is_zstd = args
        .snapshot
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zst"));
    if is_zstd {
        std::fs::create_dir_all(&args.cache_dir)?;
        return Ok(Snapshot::from_zstd(&args.snapshot, &args.cache_dir)?);
    }
    let mode = if args.trust_cache {
        LoadMode::TrustCache
    } else {
        LoadMode::Validate
    };
    Ok(Snapshot::from_path(&args.snapshot, mode)?)
}

/// メイン関数
///
/// スナップショットをロードし、標準入力から読み込んだトークンのストレスを解決して、
/// 指定された形式で結果を標準出力に出力します。
/// 解析できない行は警告を出したうえでそのまま出力します。
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    eprintln!("Loading the snapshot...");
    let lookup = StressLookup::new(load(&args)?);
    eprintln!(
        "Ready to resolve {} entries ({} bytes)",
        lookup.snapshot().num_entries(),
        lookup.snapshot().byte_len()
    );

    let is_tty = atty::is(atty::Stream::Stdout);

    let out = std::io::stdout();
    let mut out = BufWriter::new(out.lock());
    let lines = std::io::stdin().lock().lines();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            out.write_all(b"\n")?;
            continue;
        }
        let token = match line.parse::<Token>() {
            Ok(token) => token,
            Err(e) => {
                log::warn!("{e}: {line}");
                writeln!(&mut out, "{line}")?;
                continue;
            }
        };
        let res = lookup.resolve(&token)?;
        match args.output_mode {
            OutputMode::Text => {
                out.write_all(res.display.as_bytes())?;
                out.write_all(b"\n")?;
            }
            OutputMode::Detail => {
                let position = res
                    .position
                    .map_or_else(|| "_".to_string(), |p| p.to_string());
                writeln!(
                    &mut out,
                    "{}\tposition={}\tconfidence={}\tscore={:.2}",
                    res.display, position, res.confidence, res.score,
                )?;
            }
        }
        if is_tty {
            out.flush()?;
        }
    }

    Ok(())
}
