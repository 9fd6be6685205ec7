//! # Naholos
//!
//! Naholosは、ウクライナ語の語ストレス(アクセント)辞書を構築し、
//! 実行時に文中の語のストレス位置を解決するライブラリです。
//!
//! ## 概要
//!
//! 形式の異なる複数の辞書ソースを解析して見出し語ごとのストアを作り、
//! 有界メモリのk-wayマージで無損失に統合したうえで、
//! 実行時の検索用スナップショットとリレーショナルデータベースに書き出します。
//! 各段の出力は入力の内容ハッシュで管理され、入力が変わらなければ再利用されます。
//!
//! ## 主な機能
//!
//! - **ソースの解析**: 平坦化したバイナリ辞書、ストレス付きテキスト、語義構造を持つJSONL
//! - **ストリーミングマージ**: 見出し語順のストアを一件ずつ読みながら統合
//! - **異形の分類**: 同綴異音語、形態的異形、自由変異の判別
//! - **エクスポート**: rkyvスナップショットとSQLite(`sql`フィーチャー有効時)
//! - **ストレス解決**: 品詞と形態素性による候補の選択
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use naholos::resolver::{Confidence, StressResolver, Token};
//! use naholos::word::{Upos, WordForm};
//!
//! let mut castle = WordForm::new("замок", vec![0], Upos::Noun);
//! castle.definition = Some("castle".into());
//! let mut lock = WordForm::new("замок", vec![1], Upos::Noun);
//! lock.definition = Some("lock".into());
//!
//! let resolver = StressResolver::default();
//! let token = Token::new("Замок").pos(Upos::Noun);
//! let res = resolver.resolve(&token, &[castle, lock]);
//! assert_eq!(res.position, Some(0));
//! assert_eq!(res.confidence, Confidence::Fallback);
//! assert_eq!(res.display, "За\u{301}мок");
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 内容アドレス方式のキャッシュ
pub mod cache;

/// 共通の定数
pub mod common;

/// テキストの正規化と解析の設定
pub mod context;

/// バイナリ辞書の値のデコード
pub mod decoder;

/// エラー型の定義
pub mod errors;

/// スナップショットとリレーショナル形式への書き出し
pub mod export;

/// ストアのマージ
pub mod merge;

/// ビルドパイプライン
pub mod pipeline;

/// ストレスの解決
pub mod resolver;

/// 読み込み済みのスナップショット
pub mod snapshot;

/// 辞書ソースの解析
pub mod source;

/// ソート済みのストア
pub mod store;

/// 内部ユーティリティ関数
pub mod utils;

/// 異形の分類
pub mod variant;

/// 語形とエントリのデータ構造
pub mod word;

#[cfg(test)]
mod tests;

// Re-exports
pub use context::{Normalizer, ParseContext};
pub use errors::{NaholosError, Result};
pub use pipeline::{BuildOptions, Pipeline};
pub use resolver::{StressLookup, StressResolver, Token};
pub use snapshot::{LoadMode, Snapshot};
pub use word::{LinguisticEntry, Upos, WordForm};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
