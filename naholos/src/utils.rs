//! ユーティリティ関数と型変換トレイトを提供するモジュール
//!
//! - `FromU32`: u32からの型変換トレイト
//! - ファイルメタデータのハッシュ計算
//! - 現在時刻の取得
//! - テスト用のマクロ

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// u32から他の型への変換を提供するトレイト
///
/// スナップショットのインデックスはu32で保存されるため、
/// 参照時にusizeへ変換する箇所で使用します。
pub trait FromU32 {
    /// u32値から実装型を生成する
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        // Since the pointer width is guaranteed to be 32 or 64,
        // the following process always succeeds.
        unsafe { Self::try_from(src).unwrap_unchecked() }
    }
}

/// ファイルメタデータからハッシュを計算します。
///
/// スナップショットの検証済みプルーフファイル名や、
/// zstd展開キャッシュのファイル名に使用します。
/// 内容ではなくメタデータを使うため、巨大なファイルでも即座に計算できます。
///
/// # 引数
///
/// * `meta` - 対象ファイルのメタデータ
///
/// # 戻り値
///
/// 16進数でエンコードされたSHA-256ハッシュ
pub(crate) fn compute_metadata_hash(meta: &Metadata) -> String {
    let mut hasher = Sha256::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        hasher.update(meta.dev().to_le_bytes());
        hasher.update(meta.ino().to_le_bytes());
        hasher.update(meta.size().to_le_bytes());
        hasher.update(meta.mtime().to_le_bytes());
        hasher.update(meta.mtime_nsec().to_le_bytes());
    }

    #[cfg(not(unix))]
    {
        hasher.update(meta.len().to_le_bytes());
        if let Ok(modified) = meta.modified()
            && let Ok(d) = modified.duration_since(UNIX_EPOCH)
        {
            hasher.update(d.as_secs().to_le_bytes());
            hasher.update(d.subsec_nanos().to_le_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

/// UNIXエポックからの経過秒数を返します。
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
/// 素性マップのリテラルを簡潔に記述するためのマクロ
///
/// # 例
///
/// ```ignore
/// let feats = feats! {
///     "Case" => "Nom",
///     "Number" => "Sing",
/// };
/// ```
macro_rules! feats {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = std::collections::BTreeMap::<String, String>::new();
            $(
                h.insert($k.to_string(), $v.to_string());
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        feats![$( $k => $v, )*]
    };
}

#[cfg(test)]
pub(crate) use feats;
