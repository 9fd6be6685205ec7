//! 圧縮バイナリ辞書ソース
//!
//! 外部のトライ辞書を平坦化したキー・値の列を読み込みます。
//! 各レコードは次の形式です:
//!
//! ```text
//! u32 LE キー長 | キー(UTF-8) | u32 LE 値長 | 値
//! ```
//!
//! 値は[`ValueDecoder`]でデコードされます。

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::context::ParseContext;
use crate::decoder::ValueDecoder;
use crate::errors::Result;
use crate::source::{Parsed, RecordError, RecordResult, Source};
use crate::word::WordForm;

const IDENTITY: &str = "naholos/binary-source/1";

/// キー・値レコードを一つ書き込みます。
///
/// 平坦化ファイルの生成とテストに使います。
///
/// # エラー
///
/// キーまたは値が`u32`の範囲を超える場合、または書き込みに失敗した場合にエラーを返します。
pub fn write_entry<W: Write>(mut wtr: W, key: &str, value: &[u8]) -> Result<()> {
    wtr.write_all(&u32::try_from(key.len())?.to_le_bytes())?;
    wtr.write_all(key.as_bytes())?;
    wtr.write_all(&u32::try_from(value.len())?.to_le_bytes())?;
    wtr.write_all(value)?;
    Ok(())
}

/// 圧縮バイナリ辞書ソース
pub struct BinarySource {
    path: PathBuf,
    tag: String,
}

impl BinarySource {
    /// 新しいソースを作成します。
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tag: "TRIE".to_string(),
        }
    }

    /// タグを設定します。
    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }
}

impl Source for BinarySource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn records<'a>(
        &'a self,
        ctx: &'a ParseContext,
    ) -> Result<Box<dyn Iterator<Item = RecordResult> + 'a>> {
        let rdr = BufReader::new(File::open(&self.path)?);
        Ok(Box::new(BinaryRecords {
            rdr,
            ctx,
            tag: &self.tag,
            pending: VecDeque::new(),
            position: 0,
            done: false,
        }))
    }
}

struct BinaryRecords<'a, R> {
    rdr: R,
    ctx: &'a ParseContext,
    tag: &'a str,
    pending: VecDeque<Parsed>,
    position: u64,
    done: bool,
}

/// レコード先頭の長さを読みます。ファイル末尾なら`None`です。
fn read_len<R: Read>(rdr: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match rdr.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes(buf))),
        _ => Err(io::ErrorKind::UnexpectedEof.into()),
    }
}

fn read_bytes<R: Read>(rdr: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    rdr.take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(buf)
}

impl<R: Read> BinaryRecords<'_, R> {
    fn read_raw(&mut self) -> io::Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(key_len) = read_len(&mut self.rdr)? else {
            return Ok(None);
        };
        let key = read_bytes(&mut self.rdr, key_len)?;
        let value_len = read_len(&mut self.rdr)?.ok_or(io::ErrorKind::UnexpectedEof)?;
        let value = read_bytes(&mut self.rdr, value_len)?;
        Ok(Some((key, value)))
    }

    fn expand(&mut self, key: Vec<u8>, value: &[u8]) -> std::result::Result<(), RecordError> {
        let word = String::from_utf8(key)
            .map_err(|_| RecordError::malformed(self.position, "key is not valid UTF-8"))?;
        let normalizer = self.ctx.normalizer();
        let form = normalizer.lookup_key(&word);
        let headword = self.ctx.headword_for(&form);

        let decoder = ValueDecoder::new(normalizer);
        for record in decoder.decode(&word, value) {
            if record.stress.is_empty() {
                continue;
            }
            let pos = record.pos_or_x();
            let mut wf = WordForm::new(form.clone(), record.stress, pos).with_source(self.tag);
            wf.feats = record.feats;
            wf.lemma = Some(headword.clone());
            self.pending.push_back(Parsed {
                headword: headword.clone(),
                form: wf,
            });
        }
        if self.pending.is_empty() {
            return Err(RecordError::malformed(
                self.position,
                format!("no stress information for '{word}'"),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for BinaryRecords<'_, R> {
    type Item = RecordResult;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(parsed) = self.pending.pop_front() {
            return Some(Ok(parsed));
        }
        if self.done {
            return None;
        }
        self.position += 1;
        match self.read_raw() {
            Ok(Some((key, value))) => match self.expand(key, &value) {
                Ok(()) => self.pending.pop_front().map(Ok),
                Err(e) => Some(Err(e)),
            },
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.done = true;
                Some(Err(RecordError::malformed(self.position, "truncated record")))
            }
            Err(e) => {
                self.done = true;
                Some(Err(RecordError::Io(e)))
            }
        }
    }
}
