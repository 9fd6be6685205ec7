//! 解析コンテキスト
//!
//! ソースの解析とリゾルバで共有される、明示的に構築される設定オブジェクトです。
//! 母音集合やアポストロフィ正規化テーブル、見出し語化器、
//! 可変ストレス許可リストをまとめて保持します。
//! プロセス全体で共有されるグローバル状態は持ちません。

use std::io::{BufRead, BufReader, Read};

use hashbrown::{HashMap, HashSet};
use sha2::{Digest, Sha256};

use crate::errors::Result;

/// 結合アキュートアクセント(U+0301)。ストレス記号として母音の直後に置かれます。
pub const STRESS_MARK_COMBINING: char = '\u{0301}';

/// アキュートアクセント(U+00B4)。テキスト辞書でストレス記号として使われます。
pub const STRESS_MARK_ACUTE: char = '\u{00B4}';

/// 正規化後のアポストロフィ(U+02BC MODIFIER LETTER APOSTROPHE)。
pub const APOSTROPHE: char = '\u{02BC}';

const UKRAINIAN_VOWELS: &str = "аеєиіїоуюяАЕЄИІЇОУЮЯ";

const WRONG_APOSTROPHES: [char; 5] = ['\u{2019}', '\u{0027}', '\u{02BB}', '\u{0060}', '\u{00B4}'];

/// ストレス記号を取り除いた語形と、そのストレス位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedForm {
    /// ストレス記号を除去した語形
    pub form: String,
    /// 0始まりの母音インデックス(昇順、重複なし)
    pub stress: Vec<u8>,
}

/// 母音判定とテキスト正規化を行う構造体。
#[derive(Debug, Clone)]
pub struct Normalizer {
    vowels: HashSet<char>,
    apostrophes: HashSet<char>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::ukrainian()
    }
}

impl Normalizer {
    /// ウクライナ語の母音集合とアポストロフィ規則で正規化器を作成します。
    pub fn ukrainian() -> Self {
        Self {
            vowels: UKRAINIAN_VOWELS.chars().collect(),
            apostrophes: WRONG_APOSTROPHES.into_iter().collect(),
        }
    }

    /// 文字が母音かどうかを判定します。大文字小文字は区別しません。
    #[inline(always)]
    pub fn is_vowel(&self, c: char) -> bool {
        self.vowels.contains(&c)
    }

    /// 文字列中の母音の数を返します。
    pub fn vowel_count(&self, text: &str) -> usize {
        text.chars().filter(|&c| self.is_vowel(c)).count()
    }

    /// 文字位置を母音インデックスに変換します。
    ///
    /// # 引数
    ///
    /// * `chars` - 対象語の文字列
    /// * `char_idx` - 文字位置(0始まり)
    ///
    /// # 戻り値
    ///
    /// 指定位置の文字が母音であれば、それより前にある母音の数。
    /// 範囲外、または母音でない場合は`None`。
    pub fn vowel_index_at(&self, chars: &[char], char_idx: usize) -> Option<usize> {
        let c = *chars.get(char_idx)?;
        if !self.is_vowel(c) {
            return None;
        }
        Some(chars[..char_idx].iter().filter(|&&c| self.is_vowel(c)).count())
    }

    /// 母音インデックスに対応する文字位置を返します。
    pub fn char_index_of_vowel(&self, text: &str, vowel_idx: usize) -> Option<usize> {
        text.chars()
            .enumerate()
            .filter(|&(_, c)| self.is_vowel(c))
            .nth(vowel_idx)
            .map(|(i, _)| i)
    }

    /// 誤ったアポストロフィ類をU+02BCに置き換えます。
    pub fn normalize_apostrophes(&self, text: &str) -> String {
        text.chars()
            .map(|c| if self.apostrophes.contains(&c) { APOSTROPHE } else { c })
            .collect()
    }

    /// 検索キーを生成します。小文字化してアポストロフィを正規化します。
    ///
    /// # 例
    ///
    /// ```
    /// use naholos::context::Normalizer;
    ///
    /// let n = Normalizer::ukrainian();
    /// assert_eq!(n.lookup_key("М'ЯТА"), "мʼята");
    /// ```
    pub fn lookup_key(&self, text: &str) -> String {
        self.normalize_apostrophes(&text.to_lowercase())
    }

    /// ストレス記号を取り除いた検索キーを生成します。
    ///
    /// # 例
    ///
    /// ```
    /// use naholos::context::Normalizer;
    ///
    /// let n = Normalizer::ukrainian();
    /// assert_eq!(n.headword_key("За\u{301}мок"), "замок");
    /// ```
    pub fn headword_key(&self, text: &str) -> String {
        self.lookup_key(&self.strip_stress(text).form)
    }

    /// ストレス記号付きの語からストレス記号を取り除き、位置を記録します。
    ///
    /// 記号は直前の文字を示します。直前の文字が母音でない記号は無視されます。
    ///
    /// # 例
    ///
    /// ```
    /// use naholos::context::Normalizer;
    ///
    /// let n = Normalizer::ukrainian();
    /// let stripped = n.strip_stress("за́мок");
    /// assert_eq!(stripped.form, "замок");
    /// assert_eq!(stripped.stress, vec![0]);
    /// ```
    pub fn strip_stress(&self, stressed: &str) -> StrippedForm {
        let mut form = String::with_capacity(stressed.len());
        let mut vowels_seen = 0usize;
        let mut last_was_vowel = false;
        let mut stress = Vec::new();
        for c in stressed.chars() {
            if c == STRESS_MARK_ACUTE || c == STRESS_MARK_COMBINING {
                if last_was_vowel
                    && let Ok(idx) = u8::try_from(vowels_seen - 1)
                {
                    stress.push(idx);
                }
                continue;
            }
            last_was_vowel = self.is_vowel(c);
            if last_was_vowel {
                vowels_seen += 1;
            }
            form.push(c);
        }
        stress.sort_unstable();
        stress.dedup();
        StrippedForm { form, stress }
    }

    /// 文字列がストレス記号を含むかどうかを判定します。
    pub fn has_stress_mark(&self, text: &str) -> bool {
        text.contains([STRESS_MARK_ACUTE, STRESS_MARK_COMBINING])
    }

    /// 指定された母音の直後に結合アキュートアクセントを挿入します。
    ///
    /// 母音は元のテキスト上で数えます。範囲外の場合は`None`を返します。
    pub fn mark_stress(&self, text: &str, vowel_idx: usize) -> Option<String> {
        let char_idx = self.char_index_of_vowel(text, vowel_idx)?;
        let mut out = String::with_capacity(text.len() + STRESS_MARK_COMBINING.len_utf8());
        for (i, c) in text.chars().enumerate() {
            out.push(c);
            if i == char_idx {
                out.push(STRESS_MARK_COMBINING);
            }
        }
        Some(out)
    }
}

/// 語形から見出し語を求めるインターフェース。
///
/// 見出し語化そのものは外部のNLPアノテータの責務であり、
/// ここではその結果を受け取る口だけを定義します。
pub trait Lemmatizer: Send + Sync {
    /// 正規化済みの語形に対する見出し語を返します。不明な場合は`None`。
    fn lemma(&self, form: &str) -> Option<String>;

    /// 見出し語化の結果を識別する文字列。ソースの内容ハッシュに含まれます。
    fn fingerprint(&self) -> String {
        String::new()
    }
}

/// 語形そのものを見出し語とする見出し語化器。
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityLemmatizer;

impl Lemmatizer for IdentityLemmatizer {
    fn lemma(&self, _form: &str) -> Option<String> {
        None
    }
}

/// `form<TAB>lemma`形式の対応表に基づく見出し語化器。
#[derive(Debug, Default, Clone)]
pub struct TableLemmatizer {
    table: HashMap<String, String>,
}

impl TableLemmatizer {
    /// リーダーから対応表を読み込みます。
    ///
    /// 空行と`#`で始まる行は無視されます。キーと値は検索キーに正規化されます。
    ///
    /// # エラー
    ///
    /// 読み込みに失敗した場合、エラーが返されます。
    pub fn from_reader<R: Read>(rdr: R, normalizer: &Normalizer) -> Result<Self> {
        let mut table = HashMap::new();
        for line in BufReader::new(rdr).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((form, lemma)) = line.split_once('\t') {
                table.insert(normalizer.headword_key(form.trim()), normalizer.headword_key(lemma.trim()));
            }
        }
        Ok(Self { table })
    }

    /// 登録されている語形の数を返します。
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// 対応表が空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Lemmatizer for TableLemmatizer {
    fn lemma(&self, form: &str) -> Option<String> {
        self.table.get(form).cloned()
    }

    fn fingerprint(&self) -> String {
        let mut pairs: Vec<_> = self.table.iter().collect();
        pairs.sort_unstable();
        digest_lines(pairs.into_iter().map(|(f, l)| format!("{f}\t{l}")))
    }
}

/// 可変ストレス語の判定ポリシー。
///
/// 許可された見出し語では、品詞と素性が同じでストレス位置だけが異なる語形を
/// 一つの語形にまとめます。
pub trait StressPolicy: Send + Sync {
    /// 見出し語がストレス位置の揺れを許すかどうかを返します。
    fn allows_variable_stress(&self, lemma: &str) -> bool;

    /// ポリシーを識別する文字列。ソースの内容ハッシュに含まれます。
    fn fingerprint(&self) -> String {
        String::new()
    }
}

fn digest_lines<I: Iterator<Item = String>>(lines: I) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// すべての見出し語で可変ストレスを許可しないポリシー。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVariableStress;

impl StressPolicy for NoVariableStress {
    fn allows_variable_stress(&self, _lemma: &str) -> bool {
        false
    }
}

/// 見出し語の許可リストに基づくポリシー。
#[derive(Debug, Default, Clone)]
pub struct VariableStressList {
    lemmas: HashSet<String>,
}

impl VariableStressList {
    /// リーダーから許可リストを読み込みます。
    ///
    /// 1行に1語。空行と`#`で始まる行は無視されます。
    ///
    /// # エラー
    ///
    /// 読み込みに失敗した場合、エラーが返されます。
    pub fn from_reader<R: Read>(rdr: R, normalizer: &Normalizer) -> Result<Self> {
        let mut lemmas = HashSet::new();
        for line in BufReader::new(rdr).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            lemmas.insert(normalizer.headword_key(line));
        }
        Ok(Self { lemmas })
    }

    /// 見出し語の列から許可リストを作成します。
    ///
    /// 各語は`normalizer`で検索キーに正規化され、ストレス記号は取り除かれます。
    pub fn new<I, S>(lemmas: I, normalizer: &Normalizer) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lemmas: lemmas
                .into_iter()
                .map(|lemma| normalizer.headword_key(lemma.as_ref().trim()))
                .collect(),
        }
    }

    /// 登録されている見出し語の数を返します。
    pub fn len(&self) -> usize {
        self.lemmas.len()
    }

    /// リストが空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.lemmas.is_empty()
    }
}

/// 既定の正規化器で正規化して許可リストを作成します。
impl<S: AsRef<str>> FromIterator<S> for VariableStressList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter, &Normalizer::default())
    }
}

impl StressPolicy for VariableStressList {
    fn allows_variable_stress(&self, lemma: &str) -> bool {
        self.lemmas.contains(lemma)
    }

    fn fingerprint(&self) -> String {
        let mut lemmas: Vec<_> = self.lemmas.iter().cloned().collect();
        lemmas.sort_unstable();
        digest_lines(lemmas.into_iter())
    }
}

/// ソース解析に渡されるコンテキスト。
///
/// 正規化器、見出し語化器、可変ストレスポリシーを保持します。
/// 不変であり、複数のワーカースレッドから同時に参照できます。
pub struct ParseContext {
    normalizer: Normalizer,
    lemmatizer: Box<dyn Lemmatizer>,
    stress_policy: Box<dyn StressPolicy>,
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new(Normalizer::ukrainian())
    }
}

impl ParseContext {
    /// 新しいコンテキストを作成します。
    ///
    /// 見出し語化器は[`IdentityLemmatizer`]、ポリシーは[`NoVariableStress`]で初期化されます。
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            lemmatizer: Box::new(IdentityLemmatizer),
            stress_policy: Box::new(NoVariableStress),
        }
    }

    /// 見出し語化器を設定します。
    pub fn lemmatizer<L>(mut self, lemmatizer: L) -> Self
    where
        L: Lemmatizer + 'static,
    {
        self.lemmatizer = Box::new(lemmatizer);
        self
    }

    /// 可変ストレスポリシーを設定します。
    pub fn stress_policy<P>(mut self, policy: P) -> Self
    where
        P: StressPolicy + 'static,
    {
        self.stress_policy = Box::new(policy);
        self
    }

    /// 正規化器への参照を返します。
    #[inline(always)]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// 正規化済みの語形に対する見出し語を返します。
    ///
    /// 見出し語化器が答えを持たない場合は語形そのものを返します。
    pub fn headword_for(&self, form: &str) -> String {
        self.lemmatizer
            .lemma(form)
            .unwrap_or_else(|| form.to_string())
    }

    /// 見出し語が可変ストレスを許すかどうかを返します。
    #[inline(always)]
    pub fn allows_variable_stress(&self, lemma: &str) -> bool {
        self.stress_policy.allows_variable_stress(lemma)
    }

    /// 解析結果に影響する設定を識別する文字列を返します。
    pub fn fingerprint(&self) -> String {
        format!(
            "lemmatizer={};policy={}",
            self.lemmatizer.fingerprint(),
            self.stress_policy.fingerprint()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vowels() {
        let n = Normalizer::ukrainian();
        assert!(n.is_vowel('а'));
        assert!(n.is_vowel('Ї'));
        assert!(!n.is_vowel('м'));
        assert_eq!(n.vowel_count("мама"), 2);
        assert_eq!(n.vowel_count("хліб"), 1);
    }

    #[test]
    fn test_strip_stress_combining() {
        let n = Normalizer::ukrainian();
        let s = n.strip_stress("заме\u{301}ць");
        assert_eq!(s.form, "замець");
        assert_eq!(s.stress, vec![1]);
    }

    #[test]
    fn test_strip_stress_acute() {
        let n = Normalizer::ukrainian();
        let s = n.strip_stress("обі´ді");
        assert_eq!(s.form, "обіді");
        assert_eq!(s.stress, vec![1]);
    }

    #[test]
    fn test_strip_stress_multiple_and_stray() {
        let n = Normalizer::ukrainian();
        let s = n.strip_stress("по\u{301}ми\u{301}лка");
        assert_eq!(s.form, "помилка");
        assert_eq!(s.stress, vec![0, 1]);

        // A mark after a consonant carries no stress.
        let s = n.strip_stress("м\u{301}ама");
        assert_eq!(s.form, "мама");
        assert!(s.stress.is_empty());
    }

    #[test]
    fn test_apostrophes() {
        let n = Normalizer::ukrainian();
        assert_eq!(n.normalize_apostrophes("м'ята"), "мʼята");
        assert_eq!(n.normalize_apostrophes("м’ята"), "мʼята");
        assert_eq!(n.normalize_apostrophes("м`ята"), "мʼята");
        assert_eq!(n.lookup_key("Сім'Я"), "сімʼя");
    }

    #[test]
    fn test_mark_stress() {
        let n = Normalizer::ukrainian();
        assert_eq!(n.mark_stress("Замок", 1).as_deref(), Some("Замо\u{301}к"));
        assert_eq!(n.mark_stress("замок", 0).as_deref(), Some("за\u{301}мок"));
        assert_eq!(n.mark_stress("замок", 2), None);
    }

    #[test]
    fn test_vowel_index_at() {
        let n = Normalizer::ukrainian();
        let chars: Vec<char> = "мама".chars().collect();
        assert_eq!(n.vowel_index_at(&chars, 1), Some(0));
        assert_eq!(n.vowel_index_at(&chars, 3), Some(1));
        assert_eq!(n.vowel_index_at(&chars, 0), None);
        assert_eq!(n.vowel_index_at(&chars, 4), None);
    }

    #[test]
    fn test_variable_stress_list() {
        let n = Normalizer::ukrainian();
        let list = VariableStressList::from_reader("# comment\nПомилка\n\nзавжди\n".as_bytes(), &n).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.allows_variable_stress("помилка"));
        assert!(!list.allows_variable_stress("замок"));

        let list = VariableStressList::from_reader("По\u{301}милка\n".as_bytes(), &n).unwrap();
        assert!(list.allows_variable_stress("помилка"));
    }

    #[test]
    fn test_variable_stress_list_from_iter_normalizes() {
        let list: VariableStressList = ["Замок", "ко\u{301}ли", " М'ЯТА "].into_iter().collect();
        assert_eq!(list.len(), 3);
        assert!(list.allows_variable_stress("замок"));
        assert!(list.allows_variable_stress("коли"));
        assert!(list.allows_variable_stress("мʼята"));
        assert_eq!(
            list.fingerprint(),
            VariableStressList::from_iter(["замок", "коли", "мʼята"]).fingerprint()
        );
    }

    #[test]
    fn test_context_headword() {
        let n = Normalizer::ukrainian();
        let table = TableLemmatizer::from_reader("книги\tкнига\n".as_bytes(), &n).unwrap();
        let ctx = ParseContext::new(n).lemmatizer(table);
        assert_eq!(ctx.headword_for("книги"), "книга");
        assert_eq!(ctx.headword_for("стіл"), "стіл");
        assert!(!ctx.allows_variable_stress("книга"));
    }

    #[test]
    fn test_context_fingerprint_tracks_policy() {
        let plain = ParseContext::default();
        let with_list = ParseContext::default().stress_policy(VariableStressList::from_iter(["помилка"]));
        let with_other = ParseContext::default().stress_policy(VariableStressList::from_iter(["завжди"]));
        assert_eq!(plain.fingerprint(), ParseContext::default().fingerprint());
        assert_ne!(plain.fingerprint(), with_list.fingerprint());
        assert_ne!(with_list.fingerprint(), with_other.fingerprint());
    }
}
