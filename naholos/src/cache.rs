//! 内容アドレス方式のキャッシュ
//!
//! ストアディレクトリは`{TAG}_{hash}`と命名されます。ハッシュは入力の内容から
//! 決まるため、入力が変わらなければ再構築は不要で、中断された構築は
//! 同じ場所に最初からやり直すだけで回復します。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::context::ParseContext;
use crate::errors::{NaholosError, Result};
use crate::source::Source;

/// マージ済みストアのタグ
pub const MERGED_TAG: &str = "MERGED";

const MERGE_IDENTITY: &str = "naholos/merge/1";

/// ソースの内容ハッシュを計算します。
///
/// パーサの識別子(形式のバージョンを含む)、タグ、解析設定、
/// ソースファイルの全バイトから計算されます。
///
/// # エラー
///
/// ソースファイルを読み込めない場合、エラーが返されます。
pub fn source_hash(source: &dyn Source, ctx: &ParseContext) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(source.identity().as_bytes());
    hasher.update([0]);
    hasher.update(source.tag().as_bytes());
    hasher.update([0]);
    hasher.update(ctx.fingerprint().as_bytes());
    hasher.update([0]);
    let mut file = File::open(source.path())?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// 入力ストアのハッシュからマージ済みストアのハッシュを計算します。
///
/// 入力の順序には依存しません。
pub fn merged_hash<S: AsRef<str>>(input_hashes: &[S]) -> String {
    let mut hashes: Vec<&str> = input_hashes.iter().map(AsRef::as_ref).collect();
    hashes.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(MERGE_IDENTITY.as_bytes());
    for h in hashes {
        hasher.update([0]);
        hasher.update(h.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// キャッシュのルートディレクトリ
#[derive(Clone, Debug)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    /// ルートディレクトリを作成して開きます。
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// ルートディレクトリを返します。
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// タグとハッシュに対応するストアディレクトリを返します。
    ///
    /// # エラー
    ///
    /// タグが英数字とハイフン以外を含む場合、エラーが返されます。
    pub fn entry(&self, tag: &str, hash: &str) -> Result<PathBuf> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(NaholosError::invalid_argument(
                "tag",
                format!("tag must be ASCII alphanumeric: {tag}"),
            ));
        }
        Ok(self.root.join(format!("{tag}_{hash}")))
    }

    /// 同じタグで別のハッシュを持つディレクトリを削除します。
    ///
    /// # 戻り値
    ///
    /// 削除したディレクトリの数
    pub fn prune_stale(&self, tag: &str, keep_hash: &str) -> Result<usize> {
        let prefix = format!("{tag}_");
        let mut removed = 0;
        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(hash) = name.strip_prefix(&prefix) else {
                continue;
            };
            if hash == keep_hash || hash.contains('_') || !dirent.file_type()?.is_dir() {
                continue;
            }
            fs::remove_dir_all(dirent.path())?;
            log::debug!("removed stale store {name}");
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::source::{SourceKind, SourceSpec, TextSource};

    #[test]
    fn test_source_hash_tracks_content_and_identity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("ма\u{301}ма\n".as_bytes()).unwrap();
        file.flush().unwrap();
        let ctx = ParseContext::default();

        let text = TextSource::new(file.path());
        let h1 = source_hash(&text, &ctx).unwrap();
        assert_eq!(h1, source_hash(&text, &ctx).unwrap());
        assert_eq!(h1.len(), 64);

        let binary = SourceSpec::new(SourceKind::Binary, file.path()).open();
        assert_ne!(h1, source_hash(binary.as_ref(), &ctx).unwrap());

        file.write_all("та\u{301}то\n".as_bytes()).unwrap();
        file.flush().unwrap();
        assert_ne!(h1, source_hash(&text, &ctx).unwrap());
    }

    #[test]
    fn test_merged_hash_is_order_independent() {
        assert_eq!(merged_hash(&["a", "b", "c"]), merged_hash(&["c", "a", "b"]));
        assert_ne!(merged_hash(&["a", "b"]), merged_hash(&["a", "c"]));
    }

    #[test]
    fn test_prune_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(tmp.path()).unwrap();
        for name in ["TXT_old", "TXT_new", "TRIE_old", "TXT_x_y"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }
        assert_eq!(cache.prune_stale("TXT", "new").unwrap(), 1);
        assert!(tmp.path().join("TXT_new").exists());
        assert!(!tmp.path().join("TXT_old").exists());
        assert!(tmp.path().join("TRIE_old").exists());
        assert!(tmp.path().join("TXT_x_y").exists());

        assert!(cache.entry("TXT", "abc").is_ok());
        assert!(cache.entry("T_X", "abc").is_err());
    }
}
