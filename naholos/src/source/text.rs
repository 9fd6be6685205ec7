//! 行指向のストレス付きテキスト辞書ソース
//!
//! 各行は`ストレス付きの語[TAB 語義]`です。`#`で始まる行はコメントです。
//! 一行に空白またはハイフンで区切られた複数の語がある場合、それぞれを独立に解析します。
//!
//! ```text
//! а́тлас	збірник карт
//! атла́с	тканина
//! обі´ді
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::context::ParseContext;
use crate::errors::Result;
use crate::source::{Parsed, RecordError, RecordResult, Source};
use crate::word::{Upos, WordForm};

const IDENTITY: &str = "naholos/text-source/1";

/// テキスト辞書ソース
pub struct TextSource {
    path: PathBuf,
    tag: String,
}

impl TextSource {
    /// 新しいソースを作成します。
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tag: "TXT".to_string(),
        }
    }

    /// タグを設定します。
    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }
}

impl Source for TextSource {
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
        let lines = BufReader::new(File::open(&self.path)?).lines();
        Ok(Box::new(TextRecords {
            lines,
            ctx,
            tag: &self.tag,
            pending: VecDeque::new(),
            line_no: 0,
        }))
    }
}

struct TextRecords<'a, B> {
    lines: Lines<B>,
    ctx: &'a ParseContext,
    tag: &'a str,
    pending: VecDeque<RecordResult>,
    line_no: u64,
}

impl<B: BufRead> TextRecords<'_, B> {
    /// 一行を解析して結果を`pending`に積みます。
    fn parse_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }
        let (words, definition) = match line.split_once('\t') {
            Some((w, d)) => (w.trim(), Some(d.trim()).filter(|d| !d.is_empty())),
            None => (line, None),
        };

        let normalizer = self.ctx.normalizer();
        for token in words.split(|c: char| c.is_whitespace() || c == '-') {
            if token.is_empty() {
                continue;
            }
            let stripped = normalizer.strip_stress(token);
            if stripped.stress.is_empty() {
                self.pending.push_back(Err(RecordError::malformed(
                    self.line_no,
                    format!("no stress mark in '{token}'"),
                )));
                continue;
            }
            let form = normalizer.lookup_key(&stripped.form);
            let headword = self.ctx.headword_for(&form);
            let mut wf = WordForm::new(form, stripped.stress, Upos::X).with_source(self.tag);
            wf.lemma = Some(headword.clone());
            wf.definition = definition.map(str::to_string);
            self.pending.push_back(Ok(Parsed { headword, form: wf }));
        }
    }
}

impl<B: BufRead> Iterator for TextRecords<'_, B> {
    type Item = RecordResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            self.line_no += 1;
            match self.lines.next()? {
                Ok(line) => self.parse_line(&line),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Some(Err(RecordError::malformed(self.line_no, "line is not valid UTF-8")));
                }
                Err(e) => return Some(Err(RecordError::Io(e))),
            }
        }
    }
}
