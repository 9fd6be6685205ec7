//! 辞書ソースの解析
//!
//! 各ソース形式は[`Source`]を実装し、(見出し語, 語形)の組を遅延的に列挙します。
//! 列挙は何度でもやり直すことができ、同じソースからは同じ列が得られます。
//!
//! 不正なレコードは[`RecordError`]として値で返され、[`BatchOutcome`]に集計されます。
//! 一つの不正なレコードで解析が中断されることはありません。

pub mod binary;
pub mod kaikki;
pub mod text;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::context::ParseContext;
use crate::errors::{NaholosError, Result};
use crate::word::WordForm;

pub use binary::BinarySource;
pub use kaikki::KaikkiSource;
pub use text::TextSource;

/// 解析された一つの組
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed {
    /// 見出し語(検索キー)
    pub headword: String,
    /// 語形
    pub form: WordForm,
}

/// レコード単位の解析失敗
#[derive(Debug)]
pub enum RecordError {
    /// 不正なレコード。読み飛ばして解析を続けます。
    Malformed {
        /// 行番号またはレコード番号(1始まり)
        position: u64,
        /// 理由
        reason: String,
    },
    /// 読み込みの失敗。これ以降のレコードは得られません。
    Io(std::io::Error),
}

impl RecordError {
    pub(crate) fn malformed<S: Into<String>>(position: u64, reason: S) -> Self {
        Self::Malformed {
            position,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { position, reason } => write!(f, "record {position}: {reason}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// レコードの解析結果
pub type RecordResult = std::result::Result<Parsed, RecordError>;

/// 解析結果の集計
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 成功した組の数
    pub ok: u64,
    /// 読み飛ばしたレコードの数
    pub skipped: u64,
    /// 最初のいくつかの失敗の説明
    pub samples: Vec<String>,
    sample_limit: usize,
}

impl BatchOutcome {
    /// 保持する失敗例の上限を指定して作成します。
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            ..Default::default()
        }
    }

    /// 成功を記録します。
    #[inline(always)]
    pub fn record_ok(&mut self) {
        self.ok += 1;
    }

    /// 読み飛ばしを記録します。
    pub fn record_skip(&mut self, err: &RecordError) {
        self.skipped += 1;
        if self.samples.len() < self.sample_limit {
            self.samples.push(err.to_string());
        }
    }

    /// 処理したレコードの総数を返します。
    pub fn processed(&self) -> u64 {
        self.ok + self.skipped
    }

    /// 別の集計を取り込みます。
    pub fn absorb(&mut self, other: &BatchOutcome) {
        self.ok += other.ok;
        self.skipped += other.skipped;
        for s in &other.samples {
            if self.samples.len() >= self.sample_limit {
                break;
            }
            self.samples.push(s.clone());
        }
    }
}

/// 辞書ソース
pub trait Source: Send + Sync {
    /// キャッシュディレクトリ名に使われるタグ(例: `TRIE`)
    fn tag(&self) -> &str;

    /// パーサの識別子とフォーマットバージョン。内容ハッシュに含まれます。
    fn identity(&self) -> &'static str;

    /// ソースファイルのパス
    fn path(&self) -> &Path;

    /// ソースを開き、組を先頭から列挙します。
    ///
    /// # エラー
    ///
    /// ソースファイルを開けない場合、エラーが返されます。
    fn records<'a>(
        &'a self,
        ctx: &'a ParseContext,
    ) -> Result<Box<dyn Iterator<Item = RecordResult> + 'a>>;
}

/// ソースの形式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// 平坦化された圧縮バイナリ辞書
    Binary,
    /// 行指向のストレス付きテキスト辞書
    Text,
    /// 語義構造を持つJSONL辞書
    Kaikki,
}

impl SourceKind {
    /// 既定のタグを返します。
    pub const fn default_tag(&self) -> &'static str {
        match self {
            SourceKind::Binary => "TRIE",
            SourceKind::Text => "TXT",
            SourceKind::Kaikki => "KAIKKI",
        }
    }
}

impl FromStr for SourceKind {
    type Err = NaholosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "trie" => Ok(Self::Binary),
            "text" | "txt" => Ok(Self::Text),
            "kaikki" | "jsonl" => Ok(Self::Kaikki),
            _ => Err(NaholosError::invalid_argument(
                "kind",
                format!("unknown source kind: {s}"),
            )),
        }
    }
}

/// ソースの指定。`kind:path`または`kind:TAG:path`の形式で表記されます。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    /// 形式
    pub kind: SourceKind,
    /// タグ
    pub tag: String,
    /// パス
    pub path: PathBuf,
}

impl SourceSpec {
    /// 既定のタグでソース指定を作成します。
    pub fn new<P: Into<PathBuf>>(kind: SourceKind, path: P) -> Self {
        Self {
            kind,
            tag: kind.default_tag().to_string(),
            path: path.into(),
        }
    }

    /// ソースを開きます。
    pub fn open(&self) -> Box<dyn Source> {
        match self.kind {
            SourceKind::Binary => Box::new(BinarySource::new(&self.path).tag(&self.tag)),
            SourceKind::Text => Box::new(TextSource::new(&self.path).tag(&self.tag)),
            SourceKind::Kaikki => Box::new(KaikkiSource::new(&self.path).tag(&self.tag)),
        }
    }
}

/// タグとして使える文字列かどうかを返します。
fn is_tag(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `kind:TAG:path`の`TAG:path`部分がWindowsのドライブ付きパスかどうかを返します。
fn is_drive_path(head: &str, rest: &str) -> bool {
    head.len() == 1
        && head.chars().all(|c| c.is_ascii_alphabetic())
        && rest.starts_with(['\\', '/'])
}

/// `kind:path`または`kind:TAG:path`を解析します。
///
/// 二つ目の区切りの前がタグとして不正な場合や、`C:\dict.txt`のような
/// ドライブ付きパスの場合、`kind:`以降はすべてパスとして扱われます。
/// 一文字のタグに`/`または`\`で始まるパスが続く場合もドライブ付きパスとみなされるため、
/// タグは二文字以上にしてください。
impl FromStr for SourceSpec {
    type Err = NaholosError;

    fn from_str(s: &str) -> Result<Self> {
        let Some((kind, rest)) = s.split_once(':') else {
            return Err(NaholosError::invalid_argument(
                "source",
                "expected kind:path or kind:TAG:path",
            ));
        };
        let kind = kind.parse::<SourceKind>()?;
        if rest.is_empty() {
            return Err(NaholosError::invalid_argument("source", "empty path"));
        }
        match rest.split_once(':') {
            Some((tag, path)) if is_tag(tag) && !path.is_empty() && !is_drive_path(tag, path) => {
                Ok(Self {
                    kind,
                    tag: tag.to_ascii_uppercase(),
                    path: PathBuf::from(path),
                })
            }
            _ => Ok(Self::new(kind, rest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_outcome_samples_are_bounded() {
        let mut outcome = BatchOutcome::new(2);
        outcome.record_ok();
        for i in 0..5 {
            outcome.record_skip(&RecordError::malformed(i, "bad"));
        }
        assert_eq!(outcome.ok, 1);
        assert_eq!(outcome.skipped, 5);
        assert_eq!(outcome.processed(), 6);
        assert_eq!(outcome.samples, vec!["record 0: bad", "record 1: bad"]);
    }

    #[test]
    fn test_source_spec_from_str() {
        let spec: SourceSpec = "txt:dict/stress.txt".parse().unwrap();
        assert_eq!(spec.kind, SourceKind::Text);
        assert_eq!(spec.tag, "TXT");
        assert_eq!(spec.path, PathBuf::from("dict/stress.txt"));

        let spec: SourceSpec = "kaikki:wikt:data/uk.jsonl".parse().unwrap();
        assert_eq!(spec.kind, SourceKind::Kaikki);
        assert_eq!(spec.tag, "WIKT");

        assert!("foo:bar".parse::<SourceSpec>().is_err());
        assert!("txt".parse::<SourceSpec>().is_err());
        assert!("txt:".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn test_source_spec_paths_with_colons() {
        let spec: SourceSpec = r"txt:C:\dict\stress.txt".parse().unwrap();
        assert_eq!(spec.tag, "TXT");
        assert_eq!(spec.path, PathBuf::from(r"C:\dict\stress.txt"));

        let spec: SourceSpec = r"txt:OLD:C:\dict\stress.txt".parse().unwrap();
        assert_eq!(spec.tag, "OLD");
        assert_eq!(spec.path, PathBuf::from(r"C:\dict\stress.txt"));

        let spec: SourceSpec = "txt:a_b:x".parse().unwrap();
        assert_eq!(spec.tag, "TXT");
        assert_eq!(spec.path, PathBuf::from("a_b:x"));
    }
}
