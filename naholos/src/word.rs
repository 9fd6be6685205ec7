//! 語彙データモデル
//!
//! 語形([`WordForm`])と見出し語ごとのエントリ([`LinguisticEntry`])を定義します。
//! どちらもストアレコード(bincode)とエクスポートされたスナップショット(rkyv)の
//! 両方の形式でシリアライズされます。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::NaholosError;

/// ストレスパターン。0始まりの母音インデックスの昇順列です。
pub type StressPattern = Vec<u8>;

/// Universal Dependenciesの品詞タグ。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Archive, Serialize, Deserialize, Encode, Decode,
)]
#[rkyv(compare(PartialEq), derive(Debug, Clone, Copy, PartialEq, Eq))]
#[repr(u8)]
pub enum Upos {
    Adj,
    Adp,
    Adv,
    Aux,
    Cconj,
    Det,
    Intj,
    Noun,
    Num,
    Part,
    Pron,
    Propn,
    Punct,
    Sconj,
    Sym,
    Verb,
    /// その他、または不明
    #[default]
    X,
}

impl Upos {
    /// すべての品詞タグ
    pub const ALL: [Upos; 17] = [
        Upos::Adj,
        Upos::Adp,
        Upos::Adv,
        Upos::Aux,
        Upos::Cconj,
        Upos::Det,
        Upos::Intj,
        Upos::Noun,
        Upos::Num,
        Upos::Part,
        Upos::Pron,
        Upos::Propn,
        Upos::Punct,
        Upos::Sconj,
        Upos::Sym,
        Upos::Verb,
        Upos::X,
    ];

    /// UD表記のタグ文字列を返します。
    pub const fn as_str(&self) -> &'static str {
        match self {
            Upos::Adj => "ADJ",
            Upos::Adp => "ADP",
            Upos::Adv => "ADV",
            Upos::Aux => "AUX",
            Upos::Cconj => "CCONJ",
            Upos::Det => "DET",
            Upos::Intj => "INTJ",
            Upos::Noun => "NOUN",
            Upos::Num => "NUM",
            Upos::Part => "PART",
            Upos::Pron => "PRON",
            Upos::Propn => "PROPN",
            Upos::Punct => "PUNCT",
            Upos::Sconj => "SCONJ",
            Upos::Sym => "SYM",
            Upos::Verb => "VERB",
            Upos::X => "X",
        }
    }
}

impl fmt::Display for Upos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Upos {
    type Err = NaholosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Upos::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| NaholosError::invalid_argument("upos", format!("unknown tag: {s}")))
    }
}

/// 訳語
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Archive, Serialize, Deserialize, Encode, Decode,
)]
pub struct Translation {
    /// 言語コード
    pub lang: String,
    /// 訳語本文
    pub text: String,
    /// 対応する語義の説明
    pub sense: Option<String>,
}

/// 語源・活用テンプレート
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Archive, Serialize, Deserialize, Encode, Decode,
)]
pub struct Template {
    /// テンプレート名
    pub name: String,
    /// 引数
    pub args: BTreeMap<String, String>,
    /// 展開結果
    pub expansion: Option<String>,
}

/// 一つの語形。
///
/// (ストレスパターン × 品詞 × 素性集合)の組と、それに付随するメタデータです。
/// `stress_indices`は昇順で重複がなく、各値は語形の母音数未満です。
///
/// 導出された全順序は正準順序として使われます。`form`、`stress_indices`の順に
/// 比較されるため、同じ語形ではストレス位置の若いものが先に並びます。
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Archive, Serialize, Deserialize, Encode, Decode,
)]
pub struct WordForm {
    /// 正規化された語形(ストレス記号なし)
    pub form: String,
    /// ストレス位置(母音インデックス)
    pub stress_indices: StressPattern,
    /// 品詞
    pub pos: Upos,
    /// 形態素性(UD素性名 → 値)
    pub feats: BTreeMap<String, String>,
    /// 見出し語
    pub lemma: Option<String>,
    /// 主たる語義
    pub definition: Option<String>,
    /// 追加の語義
    pub alt_definitions: Vec<String>,
    /// 用例
    pub examples: Vec<String>,
    /// 訳語
    pub translations: Vec<Translation>,
    /// 語源の説明
    pub etymology: Option<String>,
    /// 語源番号
    pub etymology_number: Option<u32>,
    /// 語源テンプレート
    pub etymology_templates: Vec<Template>,
    /// 活用テンプレート
    pub inflection_templates: Vec<Template>,
    /// カテゴリ
    pub categories: Vec<String>,
    /// UD素性に対応しない元のタグ
    pub tags: Vec<String>,
    /// 語義ID
    pub sense_id: Option<String>,
    /// ローマ字表記
    pub roman: Option<String>,
    /// IPA表記
    pub ipa: Option<String>,
    /// 出所タグ(昇順、重複なし)
    pub sources: Vec<String>,
}

impl WordForm {
    /// 語形、ストレス位置、品詞から新しい語形を作成します。
    ///
    /// ストレス位置は昇順に並べ替えられ、重複が除かれます。
    pub fn new<S: Into<String>>(form: S, mut stress_indices: StressPattern, pos: Upos) -> Self {
        stress_indices.sort_unstable();
        stress_indices.dedup();
        Self {
            form: form.into(),
            stress_indices,
            pos,
            ..Default::default()
        }
    }

    /// 出所タグを付与します。
    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        let source = source.into();
        if let Err(pos) = self.sources.binary_search(&source) {
            self.sources.insert(pos, source);
        }
        self
    }

    /// ストレス位置と出所を除くすべてのフィールドで比較します。
    ///
    /// この比較で等しい二つの語形は互いに「被覆」しており、
    /// ストレス位置の和集合をとって一つにまとめられます。
    pub fn cmp_identity(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }

    /// ストレス位置と出所を除いて等しいかどうかを返します。
    pub fn covers(&self, other: &Self) -> bool {
        self.cmp_identity(other) == Ordering::Equal
    }

    #[allow(clippy::type_complexity)]
    fn identity(
        &self,
    ) -> (
        (&String, Upos, &BTreeMap<String, String>, &Option<String>, &Option<String>, &Vec<String>),
        (&Vec<String>, &Vec<Translation>, &Option<String>, &Option<u32>, &Vec<Template>, &Vec<Template>),
        (&Vec<String>, &Vec<String>, &Option<String>, &Option<String>, &Option<String>),
    ) {
        (
            (
                &self.form,
                self.pos,
                &self.feats,
                &self.lemma,
                &self.definition,
                &self.alt_definitions,
            ),
            (
                &self.examples,
                &self.translations,
                &self.etymology,
                &self.etymology_number,
                &self.etymology_templates,
                &self.inflection_templates,
            ),
            (
                &self.categories,
                &self.tags,
                &self.sense_id,
                &self.roman,
                &self.ipa,
            ),
        )
    }

    /// 別の語形のストレス位置と出所を取り込みます。
    pub(crate) fn absorb(&mut self, other: WordForm) {
        self.stress_indices.extend(other.stress_indices);
        self.stress_indices.sort_unstable();
        self.stress_indices.dedup();
        self.sources.extend(other.sources);
        self.sources.sort_unstable();
        self.sources.dedup();
    }

    /// 語義の代表値を返します。語義がない場合は空文字列です。
    pub fn definition_or_empty(&self) -> &str {
        self.definition.as_deref().unwrap_or("")
    }
}

/// 見出し語ごとのエントリ。
///
/// 同じストア内では一つの見出し語に一つのエントリだけが存在し、
/// `forms`には互いに被覆する語形の組が含まれません。
#[derive(
    Clone, Debug, Default, PartialEq, Eq,
    Archive, Serialize, Deserialize, Encode, Decode,
)]
pub struct LinguisticEntry {
    /// 見出し語(検索キー)
    pub headword: String,
    /// 正準順序に並んだ語形
    pub forms: Vec<WordForm>,
    /// すべての語形に現れるストレスパターンの集合(昇順)
    pub possible_stress_indices: Vec<StressPattern>,
    /// 自由形式のメタデータ
    pub meta: BTreeMap<String, String>,
}

impl LinguisticEntry {
    /// 語形の集合からエントリを作成します。
    ///
    /// 語形は被覆関係でまとめられ、正準順序に並べ替えられます。
    pub fn from_forms<S: Into<String>>(headword: S, forms: Vec<WordForm>) -> Self {
        Self {
            headword: headword.into(),
            forms,
            possible_stress_indices: vec![],
            meta: BTreeMap::new(),
        }
        .normalized()
    }

    /// 語形を正規化した新しいエントリを返します。
    ///
    /// ストレス位置と出所を除いて等しい語形を一つにまとめ、
    /// ストレス位置の和集合をとり、正準順序に並べ替えます。
    /// 何度適用しても結果は変わりません。
    pub fn normalized(mut self) -> Self {
        let mut forms = std::mem::take(&mut self.forms);
        for form in &mut forms {
            form.stress_indices.sort_unstable();
            form.stress_indices.dedup();
        }
        forms.sort_by(|a, b| a.cmp_identity(b).then_with(|| a.cmp(b)));

        let mut merged: Vec<WordForm> = Vec::with_capacity(forms.len());
        for form in forms {
            match merged.last_mut() {
                Some(last) if last.covers(&form) => last.absorb(form),
                _ => merged.push(form),
            }
        }
        merged.sort();

        self.forms = merged;
        self.refresh_stress_patterns();
        self
    }

    /// `possible_stress_indices`を語形から再計算します。
    pub(crate) fn refresh_stress_patterns(&mut self) {
        let mut patterns: Vec<StressPattern> = self
            .forms
            .iter()
            .map(|f| f.stress_indices.clone())
            .collect();
        patterns.sort();
        patterns.dedup();
        self.possible_stress_indices = patterns;
    }

    /// 可変ストレスを許す見出し語の語形をまとめます。
    ///
    /// (語形, 語義ID, 品詞, 素性)が同じ語形を一つにし、ストレス位置の和集合をとります。
    /// その他のフィールドは正準順序で最初の語形のものが残ります。
    pub(crate) fn combine_variable_stress(mut self) -> Self {
        let forms = std::mem::take(&mut self.forms);
        let mut combined: Vec<WordForm> = Vec::with_capacity(forms.len());
        for form in forms {
            let existing = combined.iter_mut().find(|c| {
                c.form == form.form
                    && c.sense_id == form.sense_id
                    && c.pos == form.pos
                    && c.feats == form.feats
            });
            match existing {
                Some(c) => c.absorb(form),
                None => combined.push(form),
            }
        }
        self.forms = combined;
        self.normalized()
    }

    /// 語形の数を返します。
    pub fn num_forms(&self) -> usize {
        self.forms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::feats;

    fn noun(form: &str, stress: &[u8]) -> WordForm {
        WordForm::new(form, stress.to_vec(), Upos::Noun)
    }

    #[test]
    fn test_upos_from_str() {
        assert_eq!("NOUN".parse::<Upos>().unwrap(), Upos::Noun);
        assert_eq!("propn".parse::<Upos>().unwrap(), Upos::Propn);
        assert!("FOO".parse::<Upos>().is_err());
        for p in Upos::ALL {
            assert_eq!(p.as_str().parse::<Upos>().unwrap(), p);
        }
    }

    #[test]
    fn test_new_sorts_stress() {
        let f = WordForm::new("помилка", vec![1, 0, 1], Upos::Noun);
        assert_eq!(f.stress_indices, vec![0, 1]);
    }

    #[test]
    fn test_covers_ignores_stress_and_sources() {
        let a = noun("замок", &[0]).with_source("a");
        let b = noun("замок", &[1]).with_source("b");
        assert!(a.covers(&b));

        let mut c = noun("замок", &[1]);
        c.definition = Some("lock".into());
        assert!(!a.covers(&c));
    }

    #[test]
    fn test_normalized_unions_covering_forms() {
        let entry = LinguisticEntry::from_forms(
            "x",
            vec![noun("x", &[1]).with_source("b"), noun("x", &[0]).with_source("a")],
        );
        assert_eq!(entry.forms.len(), 1);
        assert_eq!(entry.forms[0].stress_indices, vec![0, 1]);
        assert_eq!(entry.forms[0].sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(entry.possible_stress_indices, vec![vec![0, 1]]);
    }

    #[test]
    fn test_normalized_keeps_distinct_forms_in_canonical_order() {
        let mut lock = noun("замок", &[1]);
        lock.definition = Some("lock".into());
        let mut castle = noun("замок", &[0]);
        castle.definition = Some("castle".into());

        let entry = LinguisticEntry::from_forms("замок", vec![lock.clone(), castle.clone()]);
        assert_eq!(entry.forms, vec![castle, lock]);
        assert_eq!(entry.possible_stress_indices, vec![vec![0], vec![1]]);
        assert_eq!(entry.clone().normalized(), entry);
    }

    #[test]
    fn test_combine_variable_stress() {
        let mut a = noun("помилка", &[0]);
        a.feats = feats! { "Case" => "Nom" };
        a.roman = Some("pómylka".into());
        let mut b = noun("помилка", &[1]);
        b.feats = feats! { "Case" => "Nom" };
        b.roman = Some("pomýlka".into());

        let entry = LinguisticEntry::from_forms("помилка", vec![a, b]);
        assert_eq!(entry.forms.len(), 2);

        let entry = entry.combine_variable_stress();
        assert_eq!(entry.forms.len(), 1);
        assert_eq!(entry.forms[0].stress_indices, vec![0, 1]);
        assert_eq!(entry.forms[0].roman.as_deref(), Some("pómylka"));
    }
}
