//! ソースごとのソート済みストア
//!
//! ストアは一つのディレクトリで、データファイル([`STORE_DATA_FILE`])と
//! 完了マーカーを兼ねるマニフェスト([`STORE_MANIFEST_FILE`])からなります。
//! マニフェストが存在しないディレクトリは書き込み途中とみなされ、読み込まれません。
//!
//! データファイルの形式:
//!
//! ```text
//! STORE_MAGIC
//! フレーム*:
//!     u32 LE レコード数 | u64 LE ペイロード長 | ペイロード | 4 KiB境界までのゼロ詰め
//! レコード:
//!     u32 LE キー長 | キー(UTF-8) | u32 LE 値長 | 値(bincodeの[`LinguisticEntry`])
//! ```
//!
//! キーは見出し語で、ファイル全体で厳密に昇順です。
//! 書き込みはフレーム単位でコミットされ、コミット済みのフレームは以後変更されません。
//! 一つのストアに同時に書き込めるのは一つの[`StoreWriter`]だけで、
//! [`StoreReader`]は封印済みのストアをメモリマップしてロックなしで読み込みます。

pub mod builder;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::{STORE_DATA_FILE, STORE_MAGIC, STORE_MANIFEST_FILE, bincode_config};
use crate::errors::{NaholosError, Result};
use crate::utils::unix_now;
use crate::word::LinguisticEntry;

pub use builder::StoreBuilder;

/// コミットされたフレームの境界
pub const FRAME_ALIGNMENT: u64 = 4096;

const FRAME_HEADER_LEN: usize = 4 + 8;

/// ストアのマニフェスト。完了マーカーを兼ねます。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// 見出し語の数
    pub entries: u64,
    /// データファイルのバイト数
    pub bytes: u64,
    /// フレームの数
    pub frames: u64,
    /// レコード列のSHA-256。フレーム分割に依存しません。
    pub content_hash: String,
    /// 封印時刻(UNIX秒)
    pub created_at: u64,
}

impl StoreManifest {
    /// ストアディレクトリからマニフェストを読み込みます。
    ///
    /// # エラー
    ///
    /// マニフェストが存在しない、または壊れている場合、エラーが返されます。
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let file = File::open(dir.as_ref().join(STORE_MANIFEST_FILE))?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// 値をJSONとして一時ファイルに書き、指定パスへ置き換えます。
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| NaholosError::invalid_argument("path", "path has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// ストアが封印済みで、空でなく、データファイルのサイズがマニフェストと一致するかを返します。
///
/// キャッシュヒットの判定に使用します。
pub fn is_complete<P: AsRef<Path>>(dir: P) -> bool {
    let dir = dir.as_ref();
    let Ok(manifest) = StoreManifest::load(dir) else {
        return false;
    };
    let Ok(meta) = fs::metadata(dir.join(STORE_DATA_FILE)) else {
        return false;
    };
    manifest.entries > 0 && meta.len() == manifest.bytes
}

/// レコードの値をデコードします。
///
/// # エラー
///
/// 値が壊れている場合、エラーが返されます。
pub fn decode_entry(value: &[u8]) -> Result<LinguisticEntry> {
    let (entry, _) = bincode::decode_from_slice(value, bincode_config())?;
    Ok(entry)
}

fn align_up(pos: u64) -> u64 {
    pos.div_ceil(FRAME_ALIGNMENT) * FRAME_ALIGNMENT
}

/// ストアの書き込み器。
///
/// キーが厳密に昇順となるようにエントリを追記し、
/// `batch_size`件ごとにフレームとしてコミットします。
pub struct StoreWriter {
    dir: PathBuf,
    wtr: BufWriter<File>,
    batch_size: usize,
    frame: Vec<u8>,
    frame_count: u32,
    last_key: Option<String>,
    hasher: Sha256,
    pos: u64,
    entries: u64,
    frames: u64,
}

impl StoreWriter {
    /// ストアディレクトリを作成して書き込みを開始します。
    ///
    /// 既存のディレクトリは削除されます。
    ///
    /// # 引数
    ///
    /// * `dir` - ストアディレクトリ
    /// * `batch_size` - 一つのフレームに含めるエントリ数
    ///
    /// # エラー
    ///
    /// ディレクトリやファイルを作成できない場合、エラーが返されます。
    pub fn create<P: AsRef<Path>>(dir: P, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(NaholosError::invalid_argument("batch_size", "must be positive"));
        }
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        let mut wtr = BufWriter::new(File::create(dir.join(STORE_DATA_FILE))?);
        wtr.write_all(STORE_MAGIC)?;
        Ok(Self {
            dir,
            wtr,
            batch_size,
            frame: Vec::new(),
            frame_count: 0,
            last_key: None,
            hasher: Sha256::new(),
            pos: STORE_MAGIC.len() as u64,
            entries: 0,
            frames: 0,
        })
    }

    /// ストアディレクトリを返します。
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 追記済みのエントリ数を返します。
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// エントリを追記します。
    ///
    /// # エラー
    ///
    /// 見出し語が直前のエントリ以下の場合、[`NaholosError::InvalidState`]が返されます。
    pub fn append(&mut self, entry: &LinguisticEntry) -> Result<()> {
        let value = bincode::encode_to_vec(entry, bincode_config())?;
        self.append_raw(&entry.headword, &value)
    }

    /// エンコード済みのレコードを追記します。
    pub(crate) fn append_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key
            && key <= last.as_str()
        {
            return Err(NaholosError::invalid_state(
                "store keys must be strictly increasing",
                format!("{key:?} after {last:?}"),
            ));
        }
        let start = self.frame.len();
        self.frame
            .extend_from_slice(&u32::try_from(key.len())?.to_le_bytes());
        self.frame.extend_from_slice(key.as_bytes());
        self.frame
            .extend_from_slice(&u32::try_from(value.len())?.to_le_bytes());
        self.frame.extend_from_slice(value);
        self.hasher.update(&self.frame[start..]);

        self.frame_count += 1;
        self.entries += 1;
        self.last_key = Some(key.to_string());

        if self.frame_count as usize >= self.batch_size {
            self.commit_frame()?;
        }
        Ok(())
    }

    /// 溜まっているレコードを一つのフレームとしてコミットします。
    fn commit_frame(&mut self) -> Result<()> {
        if self.frame_count == 0 {
            return Ok(());
        }
        self.wtr.write_all(&self.frame_count.to_le_bytes())?;
        self.wtr
            .write_all(&u64::try_from(self.frame.len())?.to_le_bytes())?;
        self.wtr.write_all(&self.frame)?;
        self.pos += (FRAME_HEADER_LEN + self.frame.len()) as u64;

        let padded = align_up(self.pos);
        let padding = usize::try_from(padded - self.pos)?;
        self.wtr.write_all(&vec![0; padding])?;
        self.pos = padded;

        self.wtr.flush()?;
        self.wtr.get_ref().sync_data()?;

        self.frame.clear();
        self.frame_count = 0;
        self.frames += 1;
        Ok(())
    }

    /// 残りのレコードをコミットし、マニフェストを書き込んでストアを封印します。
    ///
    /// # 戻り値
    ///
    /// 書き込まれたマニフェスト
    pub fn seal(mut self) -> Result<StoreManifest> {
        self.commit_frame()?;
        self.wtr.flush()?;
        self.wtr.get_ref().sync_all()?;

        let manifest = StoreManifest {
            entries: self.entries,
            bytes: self.pos,
            frames: self.frames,
            content_hash: hex::encode(self.hasher.finalize()),
            created_at: unix_now(),
        };
        write_json_atomic(&self.dir.join(STORE_MANIFEST_FILE), &manifest)?;
        Ok(manifest)
    }
}

/// 封印済みストアの読み込み器。
///
/// データファイルをメモリマップして保持します。複数のスレッドから共有できます。
pub struct StoreReader {
    dir: PathBuf,
    mmap: Mmap,
    manifest: StoreManifest,
}

impl StoreReader {
    /// 封印済みのストアを開きます。
    ///
    /// # エラー
    ///
    /// - ディレクトリまたはマニフェストが存在しない場合、
    ///   [`NaholosError::SourceMissing`]が返されます。
    /// - マジックバイトやファイルサイズが一致しない場合、
    ///   [`NaholosError::InvalidFormat`]が返されます。
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.join(STORE_MANIFEST_FILE).is_file() || !dir.join(STORE_DATA_FILE).is_file() {
            return Err(NaholosError::SourceMissing(dir));
        }
        let manifest = StoreManifest::load(&dir)?;
        let file = File::open(dir.join(STORE_DATA_FILE))?;

        // The data file is never modified in place once the manifest exists.
        let mmap = unsafe { Mmap::map(&file)? };

        if !mmap.starts_with(STORE_MAGIC) {
            return Err(NaholosError::invalid_format(
                "store",
                format!("magic mismatch in {}", dir.display()),
            ));
        }
        if mmap.len() as u64 != manifest.bytes {
            return Err(NaholosError::invalid_format(
                "store",
                format!(
                    "{}: data file has {} bytes, manifest says {}",
                    dir.display(),
                    mmap.len(),
                    manifest.bytes
                ),
            ));
        }
        Ok(Self {
            dir,
            mmap,
            manifest,
        })
    }

    /// ストアディレクトリを返します。
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// マニフェストを返します。
    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    /// 先頭からレコードを列挙するカーソルを返します。
    pub fn iter(&self) -> StoreIter<'_> {
        StoreIter {
            data: &self.mmap,
            pos: STORE_MAGIC.len(),
            remaining: 0,
            frame_end: STORE_MAGIC.len(),
            failed: false,
        }
    }

    /// 先頭からエントリをデコードして列挙します。
    pub fn entries(&self) -> impl Iterator<Item = Result<LinguisticEntry>> + '_ {
        self.iter()
            .map(|rec| rec.and_then(|(_, value)| decode_entry(value)))
    }

    /// 各フレームのペイロードを列挙します。
    fn payloads(&self) -> Result<Vec<(u32, &[u8])>> {
        let data: &[u8] = &self.mmap;
        let mut pos = STORE_MAGIC.len();
        let mut payloads = vec![];
        while pos < data.len() {
            let (count, len) = read_frame_header(data, pos)?;
            let start = pos + FRAME_HEADER_LEN;
            let end = start
                .checked_add(len)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| truncated(pos))?;
            payloads.push((count, &data[start..end]));
            pos = usize::try_from(align_up(end as u64))?.min(data.len());
        }
        Ok(payloads)
    }
}

fn truncated(pos: usize) -> NaholosError {
    NaholosError::invalid_format("store", format!("truncated frame at byte {pos}"))
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_frame_header(data: &[u8], pos: usize) -> Result<(u32, usize)> {
    let count = read_u32(data, pos).ok_or_else(|| truncated(pos))?;
    let len = data
        .get(pos + 4..pos + FRAME_HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| truncated(pos))?;
    Ok((count, usize::try_from(len)?))
}

/// ストアの前方カーソル。
///
/// `(キー, エンコード済みの値)`を返します。フレーム構造の破損は致命的なエラーで、
/// 一度エラーを返したカーソルはそれ以降何も返しません。
pub struct StoreIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u32,
    frame_end: usize,
    failed: bool,
}

impl<'a> StoreIter<'a> {
    fn next_record(&mut self) -> Result<Option<(&'a str, &'a [u8])>> {
        while self.remaining == 0 {
            if self.pos != self.frame_end {
                return Err(NaholosError::invalid_format(
                    "store",
                    format!("frame payload length mismatch at byte {}", self.pos),
                ));
            }
            if self.pos > STORE_MAGIC.len() {
                self.pos = usize::try_from(align_up(self.pos as u64))?;
            }
            if self.pos >= self.data.len() {
                return Ok(None);
            }
            let (count, len) = read_frame_header(self.data, self.pos)?;
            self.pos += FRAME_HEADER_LEN;
            self.frame_end = self
                .pos
                .checked_add(len)
                .filter(|&e| e <= self.data.len())
                .ok_or_else(|| truncated(self.pos))?;
            self.remaining = count;
        }

        let key_len = read_u32(self.data, self.pos).ok_or_else(|| truncated(self.pos))? as usize;
        self.pos += 4;
        let key = self
            .data
            .get(self.pos..self.pos + key_len)
            .filter(|_| self.pos + key_len <= self.frame_end)
            .ok_or_else(|| truncated(self.pos))?;
        let key = std::str::from_utf8(key)?;
        self.pos += key_len;

        let value_len = read_u32(self.data, self.pos).ok_or_else(|| truncated(self.pos))? as usize;
        self.pos += 4;
        let value = self
            .data
            .get(self.pos..self.pos + value_len)
            .filter(|_| self.pos + value_len <= self.frame_end)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos += value_len;

        self.remaining -= 1;
        Ok(Some((key, value)))
    }
}

impl<'a> Iterator for StoreIter<'a> {
    type Item = Result<(&'a str, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(rec) => rec.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// 圧縮の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionStats {
    /// 圧縮前のバイト数
    pub bytes_before: u64,
    /// 圧縮後のバイト数
    pub bytes_after: u64,
}

/// 封印済みのストアを一つのフレームに書き直し、ファイルを置き換えます。
///
/// 内容ハッシュとエントリ数は変わりません。
///
/// # エラー
///
/// ストアを開けない、またはフレーム構造が壊れている場合、エラーが返されます。
pub fn compact<P: AsRef<Path>>(dir: P) -> Result<CompactionStats> {
    let dir = dir.as_ref();
    let (mut manifest, tmp) = {
        let reader = StoreReader::open(dir)?;
        let payloads = reader.payloads()?;
        let count: u64 = payloads.iter().map(|&(c, _)| u64::from(c)).sum();
        let len: u64 = payloads.iter().map(|(_, p)| p.len() as u64).sum();

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut wtr = BufWriter::new(tmp.as_file_mut());
            wtr.write_all(STORE_MAGIC)?;
            if count > 0 {
                wtr.write_all(&u32::try_from(count)?.to_le_bytes())?;
                wtr.write_all(&len.to_le_bytes())?;
                for (_, payload) in &payloads {
                    wtr.write_all(payload)?;
                }
            }
            wtr.flush()?;
        }
        tmp.as_file().sync_all()?;
        (reader.manifest().clone(), tmp)
    };

    let bytes_before = manifest.bytes;
    let bytes_after = tmp.as_file().metadata()?.len();
    tmp.persist(dir.join(STORE_DATA_FILE))?;

    manifest.bytes = bytes_after;
    manifest.frames = u64::from(manifest.entries > 0);
    write_json_atomic(&dir.join(STORE_MANIFEST_FILE), &manifest)?;

    log::debug!(
        "compacted {}: {} -> {} bytes",
        dir.display(),
        bytes_before,
        bytes_after
    );
    Ok(CompactionStats {
        bytes_before,
        bytes_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::{Upos, WordForm};

    fn entry(headword: &str, stress: u8) -> LinguisticEntry {
        LinguisticEntry::from_forms(
            headword,
            vec![WordForm::new(headword, vec![stress], Upos::Noun).with_source("T")],
        )
    }

    fn write_store(dir: &Path, words: &[&str], batch_size: usize) -> StoreManifest {
        let mut wtr = StoreWriter::create(dir, batch_size).unwrap();
        for w in words {
            wtr.append(&entry(w, 0)).unwrap();
        }
        wtr.seal().unwrap()
    }

    #[test]
    fn test_write_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("S");
        let manifest = write_store(&dir, &["а", "б", "в", "г", "ґ"], 2);
        assert_eq!(manifest.entries, 5);
        assert_eq!(manifest.frames, 3);
        assert_eq!(manifest.bytes % FRAME_ALIGNMENT, 0);

        let reader = StoreReader::open(&dir).unwrap();
        let keys: Vec<_> = reader.iter().map(|r| r.unwrap().0.to_string()).collect();
        assert_eq!(keys, vec!["а", "б", "в", "г", "ґ"]);

        let entries: Vec<_> = reader.entries().map(|r| r.unwrap()).collect();
        assert_eq!(entries[2], entry("в", 0));
        assert!(is_complete(&dir));
    }

    #[test]
    fn test_keys_must_increase() {
        let tmp = tempfile::tempdir().unwrap();
        let mut wtr = StoreWriter::create(tmp.path().join("S"), 10).unwrap();
        wtr.append(&entry("б", 0)).unwrap();
        assert!(matches!(
            wtr.append(&entry("а", 0)),
            Err(NaholosError::InvalidState(_))
        ));
        assert!(matches!(
            wtr.append(&entry("б", 1)),
            Err(NaholosError::InvalidState(_))
        ));
    }

    #[test]
    fn test_unsealed_store_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("S");
        let mut wtr = StoreWriter::create(&dir, 1).unwrap();
        wtr.append(&entry("а", 0)).unwrap();
        drop(wtr);

        assert!(!is_complete(&dir));
        assert!(matches!(
            StoreReader::open(&dir),
            Err(NaholosError::SourceMissing(_))
        ));
    }

    #[test]
    fn test_empty_store_is_not_a_cache_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("S");
        let manifest = write_store(&dir, &[], 4);
        assert_eq!(manifest.entries, 0);
        assert!(!is_complete(&dir));
        let reader = StoreReader::open(&dir).unwrap();
        assert_eq!(reader.iter().count(), 0);
    }

    #[test]
    fn test_compact_preserves_content() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("S");
        let words = ["вода", "дім", "мама", "тато", "хліб"];
        let before = write_store(&dir, &words, 2);

        let stats = compact(&dir).unwrap();
        assert_eq!(stats.bytes_before, before.bytes);
        assert!(stats.bytes_after < stats.bytes_before);

        let after = StoreManifest::load(&dir).unwrap();
        assert_eq!(after.content_hash, before.content_hash);
        assert_eq!(after.entries, 5);
        assert_eq!(after.frames, 1);
        assert!(is_complete(&dir));

        let reader = StoreReader::open(&dir).unwrap();
        let keys: Vec<_> = reader.iter().map(|r| r.unwrap().0.to_string()).collect();
        assert_eq!(keys, words);
    }

    #[test]
    fn test_truncated_data_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("S");
        let mut manifest = write_store(&dir, &["а", "б"], 10);
        compact(&dir).unwrap();

        let path = dir.join(STORE_DATA_FILE);
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 3]).unwrap();
        manifest.bytes = (data.len() - 3) as u64;
        write_json_atomic(&dir.join(STORE_MANIFEST_FILE), &manifest).unwrap();

        let reader = StoreReader::open(&dir).unwrap();
        let results: Vec<_> = reader.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(NaholosError::InvalidFormat(_))));
    }
}
