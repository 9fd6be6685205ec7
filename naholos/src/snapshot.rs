//! エクスポートされたスナップショット
//!
//! マージ済みの全エントリと、見出し語・語形による検索索引をrkyvでアーカイブした
//! 読み取り専用のファイルです。実行時のストレス解決はこのファイルだけを参照します。
//!
//! # 読み込み方法
//!
//! - [`Snapshot::from_path`]: メモリマップで読み込む(推奨)
//! - [`Snapshot::read`]: リーダーから読み込む
//! - [`Snapshot::from_zstd`]: Zstandard圧縮されたスナップショットを展開して読み込む
//!
//! 読み込まれたスナップショットは不変で、ロックなしで複数のスレッドから参照できます。

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, create_dir_all};
use std::hash::{BuildHasherDefault, DefaultHasher};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use rkyv::rancor::Error;
use rkyv::util::AlignedVec;
use rkyv::{
    Archive, Deserialize, Serialize, access, access_unchecked, api::serialize_using,
    ser::Serializer, ser::allocator::Arena, ser::sharing::Share, ser::writer::IoWriter,
    util::with_arena,
};

use crate::common::SNAPSHOT_MAGIC;
use crate::context::Normalizer;
use crate::errors::{NaholosError, Result};
use crate::utils::{FromU32, compute_metadata_hash};
use crate::variant::{Classification, VariantType, classify};
use crate::word::{ArchivedLinguisticEntry, LinguisticEntry, WordForm};

const SNAPSHOT_MAGIC_LEN: usize = SNAPSHOT_MAGIC.len();
const RKYV_ALIGNMENT: usize = 16;
const PADDING_LEN: usize =
    (RKYV_ALIGNMENT - (SNAPSHOT_MAGIC_LEN % RKYV_ALIGNMENT)) % RKYV_ALIGNMENT;
const DATA_START: usize = SNAPSHOT_MAGIC_LEN + PADDING_LEN;

// Fixed-key hasher so that identical input serializes to identical bytes.
type IndexMap<K, V> = HashMap<K, V, BuildHasherDefault<DefaultHasher>>;

/// スナップショットの読み込みモード。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// 読み込むたびに完全な検証を実行します。
    Validate,
    /// 検証済みのプルーフファイルが存在する場合は検証をスキップします。
    ///
    /// プルーフファイルはスナップショットと同じディレクトリの`.cache`に、
    /// ファイルメタデータのハッシュを名前として作成されます。
    TrustCache,
}

/// 語形への参照
#[derive(Clone, Copy, Debug, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FormRef {
    /// エントリの位置
    pub entry: u32,
    /// エントリ内の語形の位置
    pub form: u32,
}

/// スナップショットのメタデータ
#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// マージ済みストアの内容ハッシュ
    pub merged_hash: String,
    /// エントリ数
    pub entries: u64,
    /// 語形数
    pub forms: u64,
    /// 素性(名前と値の組)の総数
    pub features: u64,
    /// 異形の種類ごとのエントリ数
    pub labels: BTreeMap<String, u64>,
    /// 区別可能なエントリ数
    pub disambiguable: u64,
}

/// スナップショットの内部データ
#[derive(Archive, Serialize, Deserialize)]
pub struct SnapshotInner {
    entries: Vec<LinguisticEntry>,
    variants: Vec<VariantType>,
    headwords: IndexMap<String, u32>,
    surfaces: IndexMap<String, Vec<FormRef>>,
    meta: SnapshotMeta,
}

impl SnapshotInner {
    /// メタデータを返します。
    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    /// スナップショットをライターにシリアライズします。
    ///
    /// マジックバイトと16バイト境界までのパディングに続けて、rkyvのアーカイブを書き込みます。
    ///
    /// # エラー
    ///
    /// 書き込み、またはrkyvのシリアライゼーションに失敗した場合、エラーが返されます。
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(SNAPSHOT_MAGIC)?;
        wtr.write_all(&[0xFF; PADDING_LEN])?;

        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, Error>(self, &mut serializer)
        })
        .map_err(|e| {
            NaholosError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;
        wtr.flush()?;
        Ok(())
    }
}

/// スナップショットの構築器
///
/// エントリは見出し語の昇順に追加する必要があります。
pub struct SnapshotBuilder {
    merged_hash: String,
    entries: Vec<LinguisticEntry>,
    variants: Vec<VariantType>,
    meta: SnapshotMeta,
}

impl SnapshotBuilder {
    /// 新しい構築器を作成します。
    pub fn new<S: Into<String>>(merged_hash: S) -> Self {
        Self {
            merged_hash: merged_hash.into(),
            entries: vec![],
            variants: vec![],
            meta: SnapshotMeta::default(),
        }
    }

    /// エントリを分類して追加します。
    pub fn push(&mut self, entry: LinguisticEntry) -> Classification {
        let class = classify(&entry.forms);
        self.push_classified(entry, class);
        class
    }

    /// 分類済みのエントリを追加します。
    pub fn push_classified(&mut self, entry: LinguisticEntry, class: Classification) {
        self.meta.forms += entry.forms.len() as u64;
        self.meta.features += entry.forms.iter().map(|f| f.feats.len() as u64).sum::<u64>();
        *self
            .meta
            .labels
            .entry(class.variant.as_str().to_string())
            .or_default() += 1;
        if class.is_disambiguable {
            self.meta.disambiguable += 1;
        }
        self.entries.push(entry);
        self.variants.push(class.variant);
    }

    /// 索引を作成してスナップショットを完成させます。
    ///
    /// # エラー
    ///
    /// エントリまたは語形の数が`u32`の範囲を超える場合、エラーが返されます。
    pub fn build(self) -> Result<SnapshotInner> {
        let mut headwords =
            IndexMap::with_capacity_and_hasher(self.entries.len(), Default::default());
        let mut surfaces: IndexMap<String, Vec<FormRef>> = IndexMap::default();
        for (i, entry) in self.entries.iter().enumerate() {
            let entry_idx = u32::try_from(i)?;
            headwords.insert(entry.headword.clone(), entry_idx);
            for (j, form) in entry.forms.iter().enumerate() {
                surfaces.entry(form.form.clone()).or_default().push(FormRef {
                    entry: entry_idx,
                    form: u32::try_from(j)?,
                });
            }
        }
        let mut meta = self.meta;
        meta.merged_hash = self.merged_hash;
        meta.entries = self.entries.len() as u64;
        Ok(SnapshotInner {
            entries: self.entries,
            variants: self.variants,
            headwords,
            surfaces,
            meta,
        })
    }
}

/// メモリバッファ(mmapまたはヒープ)
enum SnapshotBuffer {
    Mmap(Mmap),
    Aligned(AlignedVec<16>),
}

impl SnapshotBuffer {
    fn len(&self) -> usize {
        match self {
            Self::Mmap(mmap) => mmap.len(),
            Self::Aligned(bytes) => bytes.len(),
        }
    }
}

/// 読み込み済みのスナップショット
pub struct Snapshot {
    buffer: SnapshotBuffer,
    data: &'static ArchivedSnapshotInner,
    normalizer: Normalizer,
}

/// 検証の結果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// 検査した語の数
    pub checked: usize,
    /// 候補が見つかった語の数
    pub found: usize,
    /// 見つからなかった語
    pub missing: Vec<String>,
}

fn validation_failed(e: Error) -> NaholosError {
    NaholosError::invalid_state(
        "rkyv validation failed. The snapshot file may be corrupted or incompatible.".to_string(),
        e.to_string(),
    )
}

impl Snapshot {
    /// リーダーからスナップショットを読み込みます。
    ///
    /// 内容全体をメモリに読み込むため、`from_path`よりもメモリ効率が低くなります。
    ///
    /// # エラー
    ///
    /// データを読み込めない、またはマジックバイトや内容が無効な場合、エラーが返されます。
    pub fn read<R: Read>(mut rdr: R) -> Result<Self> {
        let mut magic = [0; SNAPSHOT_MAGIC_LEN];
        rdr.read_exact(&mut magic)?;
        if !magic.starts_with(SNAPSHOT_MAGIC) {
            return Err(NaholosError::invalid_argument(
                "rdr",
                "The magic number of the input snapshot mismatches.",
            ));
        }
        let mut padding_buf = [0; PADDING_LEN];
        rdr.read_exact(&mut padding_buf)?;

        let mut buffer = Vec::new();
        rdr.read_to_end(&mut buffer)?;
        let mut aligned_bytes = AlignedVec::with_capacity(buffer.len());
        aligned_bytes.extend_from_slice(&buffer);

        let archived =
            access::<ArchivedSnapshotInner, Error>(&aligned_bytes).map_err(validation_failed)?;

        // SAFETY: AlignedVec ensures correct alignment and is owned by the returned value.
        let data: &'static ArchivedSnapshotInner = unsafe { &*(archived as *const _) };
        Ok(Self {
            buffer: SnapshotBuffer::Aligned(aligned_bytes),
            data,
            normalizer: Normalizer::default(),
        })
    }

    /// メモリマップを使用してファイルからスナップショットを読み込みます。
    ///
    /// # 引数
    ///
    /// * `path` - スナップショットファイルのパス
    /// * `mode` - 検証戦略。[`LoadMode::TrustCache`]では、検証に成功すると
    ///   プルーフファイルを作成し、以降の読み込みでは検証を省略します。
    ///   **ファイルが悪意を持って置き換えられる可能性がある環境では
    ///   [`LoadMode::Validate`]を使用してください。**
    ///
    /// # エラー
    ///
    /// ファイルを開けない、マジックバイトが一致しない、または内容が無効な場合、
    /// エラーが返されます。
    pub fn from_path<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            NaholosError::invalid_argument("path", format!("Failed to open snapshot file: {e}"))
        })?;
        let meta = file.metadata()?;
        let mut magic = [0u8; SNAPSHOT_MAGIC_LEN];
        file.read_exact(&mut magic)?;
        if !magic.starts_with(SNAPSHOT_MAGIC) {
            return Err(NaholosError::invalid_argument(
                "path",
                "The magic number of the input snapshot mismatches.",
            ));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let Some(data_bytes) = mmap.get(DATA_START..) else {
            return Err(NaholosError::invalid_argument(
                "path",
                "Snapshot file too small or corrupted.",
            ));
        };

        let proof_dir = path.parent().map(|p| p.join(".cache"));
        let proof_path = proof_dir
            .as_ref()
            .map(|d| d.join(format!("{}.sha256", compute_metadata_hash(&meta))));

        if mode == LoadMode::TrustCache && proof_path.as_ref().is_some_and(|p| p.exists()) {
            let archived = unsafe { access_unchecked::<ArchivedSnapshotInner>(data_bytes) };
            let data: &'static ArchivedSnapshotInner = unsafe { &*(archived as *const _) };
            return Ok(Self {
                buffer: SnapshotBuffer::Mmap(mmap),
                data,
                normalizer: Normalizer::default(),
            });
        }

        match access::<ArchivedSnapshotInner, Error>(data_bytes) {
            Ok(archived) => {
                if mode == LoadMode::TrustCache
                    && let (Some(dir), Some(proof)) = (&proof_dir, &proof_path)
                {
                    create_dir_all(dir)?;
                    create_proof(proof)?;
                }
                let data: &'static ArchivedSnapshotInner = unsafe { &*(archived as *const _) };
                Ok(Self {
                    buffer: SnapshotBuffer::Mmap(mmap),
                    data,
                    normalizer: Normalizer::default(),
                })
            }
            Err(_) => {
                let mut aligned_bytes = AlignedVec::with_capacity(data_bytes.len());
                aligned_bytes.extend_from_slice(data_bytes);
                let archived = access::<ArchivedSnapshotInner, Error>(&aligned_bytes)
                    .map_err(validation_failed)?;
                let data: &'static ArchivedSnapshotInner = unsafe { &*(archived as *const _) };
                Ok(Self {
                    buffer: SnapshotBuffer::Aligned(aligned_bytes),
                    data,
                    normalizer: Normalizer::default(),
                })
            }
        }
    }

    /// Zstandard圧縮されたスナップショットを読み込みます。
    ///
    /// 展開結果は`cache_dir`に圧縮ファイルのメタデータハッシュを名前として保存され、
    /// 次回以降は展開済みのファイルを検証なしで読み込みます。
    ///
    /// # エラー
    ///
    /// 展開、キャッシュへの書き込み、または検証に失敗した場合、エラーが返されます。
    pub fn from_zstd<P, Q>(path: P, cache_dir: Q) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let zstd_file = File::open(path.as_ref())?;
        let hash = compute_metadata_hash(&zstd_file.metadata()?);
        let cache_dir = cache_dir.as_ref();
        let decompressed_path = cache_dir.join(format!("{hash}.nsnap"));

        if decompressed_path.exists() {
            return Self::from_path(decompressed_path, LoadMode::TrustCache);
        }
        create_dir_all(cache_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(cache_dir)?;
        {
            let mut decoder = zstd::Decoder::new(zstd_file)?;
            io::copy(&mut decoder, &mut temp_file)?;
            temp_file.as_file().sync_all()?;
        }
        temp_file.seek(SeekFrom::Start(0))?;

        let mut magic = [0; SNAPSHOT_MAGIC_LEN];
        temp_file.read_exact(&mut magic)?;
        if !magic.starts_with(SNAPSHOT_MAGIC) {
            return Err(NaholosError::invalid_argument(
                "path",
                "The magic number of the input snapshot mismatches.",
            ));
        }

        temp_file.seek(SeekFrom::Start(0))?;
        let mut data_bytes = Vec::new();
        temp_file.as_file_mut().read_to_end(&mut data_bytes)?;
        let mut aligned_bytes: AlignedVec = AlignedVec::with_capacity(data_bytes.len());
        aligned_bytes.extend_from_slice(&data_bytes);
        let Some(data_bytes) = aligned_bytes.get(DATA_START..) else {
            return Err(NaholosError::invalid_argument(
                "path",
                "Snapshot file too small or corrupted.",
            ));
        };
        access::<ArchivedSnapshotInner, Error>(data_bytes).map_err(validation_failed)?;

        temp_file.persist(&decompressed_path)?;

        let proof_dir = cache_dir.join(".cache");
        create_dir_all(&proof_dir)?;
        let decompressed_hash = compute_metadata_hash(&File::open(&decompressed_path)?.metadata()?);
        create_proof(&proof_dir.join(format!("{decompressed_hash}.sha256")))?;

        Self::from_path(decompressed_path, LoadMode::TrustCache)
    }

    /// 読み込んだバッファのバイト数を返します。
    ///
    /// メモリマップの場合はファイル全体、それ以外はアーカイブ部分の長さです。
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// 正規化器を差し替えます。
    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// 検索キーを作成します。ストレス記号は取り除かれます。
    fn key(&self, surface: &str) -> String {
        let stripped = self.normalizer.strip_stress(surface);
        self.normalizer.lookup_key(&stripped.form)
    }

    fn archived_entry(&self, idx: u32) -> Result<&ArchivedLinguisticEntry> {
        self.data
            .entries
            .get(usize::from_u32(idx))
            .ok_or_else(|| NaholosError::invalid_format("snapshot", format!("no entry {idx}")))
    }

    /// 語形の候補を検索します。
    ///
    /// 表層形を正規化して検索し、候補をストアの順序で返します。
    /// 見つからない場合は空のベクタです。
    ///
    /// # エラー
    ///
    /// 索引が壊れている場合、エラーが返されます。
    pub fn lookup(&self, surface: &str) -> Result<Vec<WordForm>> {
        let key = self.key(surface);
        let Some(refs) = self.data.surfaces.get(key.as_str()) else {
            return Ok(vec![]);
        };
        let mut forms = Vec::with_capacity(refs.len());
        for r in refs.iter() {
            let entry = self.archived_entry(r.entry.to_native())?;
            let idx = r.form.to_native();
            let form = entry.forms.get(usize::from_u32(idx)).ok_or_else(|| {
                NaholosError::invalid_format("snapshot", format!("no form {idx}"))
            })?;
            forms.push(rkyv::deserialize::<WordForm, Error>(form)?);
        }
        Ok(forms)
    }

    /// 見出し語のエントリを返します。
    pub fn entry(&self, headword: &str) -> Result<Option<LinguisticEntry>> {
        let key = self.key(headword);
        let Some(idx) = self.data.headwords.get(key.as_str()) else {
            return Ok(None);
        };
        let entry = self.archived_entry(idx.to_native())?;
        Ok(Some(rkyv::deserialize::<LinguisticEntry, Error>(entry)?))
    }

    /// 見出し語の異形の種類を返します。
    pub fn variant(&self, headword: &str) -> Result<Option<VariantType>> {
        let key = self.key(headword);
        let Some(idx) = self.data.headwords.get(key.as_str()) else {
            return Ok(None);
        };
        let archived = self
            .data
            .variants
            .get(usize::from_u32(idx.to_native()))
            .ok_or_else(|| NaholosError::invalid_format("snapshot", "variant index out of range"))?;
        Ok(Some(rkyv::deserialize::<VariantType, Error>(archived)?))
    }

    /// エントリ数を返します。
    pub fn num_entries(&self) -> usize {
        self.data.entries.len()
    }

    /// メタデータを返します。
    pub fn meta(&self) -> Result<SnapshotMeta> {
        Ok(rkyv::deserialize::<SnapshotMeta, Error>(&self.data.meta)?)
    }

    /// サンプルの語がすべて検索できるかを確認します。
    pub fn verify<S: AsRef<str>>(&self, samples: &[S]) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for s in samples {
            report.checked += 1;
            if self.lookup(s.as_ref())?.is_empty() {
                report.missing.push(s.as_ref().to_string());
            } else {
                report.found += 1;
            }
        }
        Ok(report)
    }

    /// 先頭から最大`n`個のエントリについて、最初の語形を返します。
    pub fn sample_forms(&self, n: usize) -> Vec<String> {
        self.data
            .entries
            .iter()
            .filter_map(|e| e.forms.first())
            .take(n)
            .map(|f| f.form.as_str().to_string())
            .collect()
    }
}

fn create_proof(path: &Path) -> Result<()> {
    match File::create_new(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::Upos;

    fn sample() -> SnapshotInner {
        let mut castle = WordForm::new("замок", vec![0], Upos::Noun);
        castle.definition = Some("castle".into());
        let mut lock = WordForm::new("замок", vec![1], Upos::Noun);
        lock.definition = Some("lock".into());
        let mut gen_sg = WordForm::new("замка", vec![1], Upos::Noun);
        gen_sg.feats.insert("Case".into(), "Gen".into());

        let mut builder = SnapshotBuilder::new("abc");
        builder.push(LinguisticEntry::from_forms("замок", vec![lock, castle, gen_sg]));
        builder.push(LinguisticEntry::from_forms(
            "мама",
            vec![WordForm::new("мама", vec![0], Upos::Noun)],
        ));
        builder.build().unwrap()
    }

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("stress.nsnap");
        let mut file = File::create(&path).unwrap();
        sample().write(&mut file).unwrap();
        path
    }

    #[test]
    fn test_read_and_lookup() {
        let mut buf = vec![];
        sample().write(&mut buf).unwrap();
        let snapshot = Snapshot::read(buf.as_slice()).unwrap();

        let forms = snapshot.lookup("Замок").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[0].stress_indices, vec![0]);
        assert_eq!(forms[0].definition.as_deref(), Some("castle"));
        assert_eq!(forms[1].stress_indices, vec![1]);

        assert_eq!(snapshot.lookup("замка").unwrap().len(), 1);
        assert_eq!(snapshot.lookup("за\u{301}мок").unwrap().len(), 2);
        assert!(snapshot.lookup("тато").unwrap().is_empty());

        let entry = snapshot.entry("замок").unwrap().unwrap();
        assert_eq!(entry.forms.len(), 3);
        assert_eq!(
            snapshot.variant("замок").unwrap(),
            Some(VariantType::MorphologicalVariant)
        );
        assert_eq!(snapshot.variant("мама").unwrap(), Some(VariantType::Single));
        assert_eq!(snapshot.num_entries(), 2);
        assert_eq!(snapshot.byte_len() + DATA_START, buf.len());
    }

    #[test]
    fn test_meta() {
        let meta = sample().meta().clone();
        assert_eq!(meta.merged_hash, "abc");
        assert_eq!(meta.entries, 2);
        assert_eq!(meta.forms, 4);
        assert_eq!(meta.features, 1);
        assert_eq!(meta.labels["single"], 1);
        assert_eq!(meta.disambiguable, 1);
    }

    #[test]
    fn test_from_path_modes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sample(tmp.path());

        let snapshot = Snapshot::from_path(&path, LoadMode::Validate).unwrap();
        assert_eq!(snapshot.meta().unwrap().entries, 2);
        assert_eq!(snapshot.byte_len() as u64, std::fs::metadata(&path).unwrap().len());
        assert!(!tmp.path().join(".cache").exists());

        let snapshot = Snapshot::from_path(&path, LoadMode::TrustCache).unwrap();
        assert_eq!(snapshot.lookup("мама").unwrap().len(), 1);
        assert!(tmp.path().join(".cache").read_dir().unwrap().next().is_some());

        let snapshot = Snapshot::from_path(&path, LoadMode::TrustCache).unwrap();
        assert_eq!(snapshot.sample_forms(5), vec!["замок", "мама"]);
    }

    #[test]
    fn test_bad_magic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.nsnap");
        std::fs::write(&path, b"NotASnapshotAtAllReally\n0123456789").unwrap();
        assert!(matches!(
            Snapshot::from_path(&path, LoadMode::Validate),
            Err(NaholosError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_zstd() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sample(tmp.path());
        let zst = tmp.path().join("stress.nsnap.zst");
        let mut encoder = zstd::Encoder::new(File::create(&zst).unwrap(), 3).unwrap();
        io::copy(&mut File::open(&path).unwrap(), &mut encoder).unwrap();
        encoder.finish().unwrap();

        let cache = tmp.path().join("cache");
        let snapshot = Snapshot::from_zstd(&zst, &cache).unwrap();
        assert_eq!(snapshot.lookup("замок").unwrap().len(), 2);

        let snapshot = Snapshot::from_zstd(&zst, &cache).unwrap();
        let report = snapshot.verify(&["мама", "тато"]).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.found, 1);
        assert_eq!(report.missing, vec!["тато".to_string()]);
    }
}
