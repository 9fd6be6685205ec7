//! ストレスの解決
//!
//! 一つのトークン(表層形、品詞、形態素性)と候補の語形群から、
//! 最も適合する候補のストレス位置を選びます。
//!
//! 解決は読み取り専用の純粋な計算で、エラーを返しません。
//! 情報が足りない場合は[`Confidence::None`]で表現されます。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::context::Normalizer;
use crate::errors::{NaholosError, Result};
use crate::snapshot::Snapshot;
use crate::word::{Upos, WordForm};

const POS_WEIGHT: f64 = 0.4;
const FEATURE_WEIGHT: f64 = 0.4;
const EXACT_THRESHOLD: f64 = 0.8;
const PARTIAL_THRESHOLD: f64 = 0.5;

/// 解決対象のトークン
///
/// 品詞と素性は外部のアノテータが付与したものです。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Token {
    /// 元の表層形
    pub text: String,
    /// 品詞
    pub pos: Option<Upos>,
    /// 形態素性
    pub feats: BTreeMap<String, String>,
}

impl Token {
    /// 表層形からトークンを作成します。
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// 品詞を設定します。
    pub fn pos(mut self, pos: Upos) -> Self {
        self.pos = Some(pos);
        self
    }

    /// 素性を追加します。
    pub fn feat<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.feats.insert(name.into(), value.into());
        self
    }
}

/// `surface<TAB>UPOS<TAB>Feat=Val|Feat=Val`形式の行を解析します。
///
/// 品詞と素性の列は省略でき、`_`は値なしを表します。
///
/// # 例
///
/// ```
/// use naholos::resolver::Token;
/// use naholos::word::Upos;
///
/// let token: Token = "замку\tNOUN\tCase=Loc|Number=Sing".parse().unwrap();
/// assert_eq!(token.pos, Some(Upos::Noun));
/// assert_eq!(token.feats["Case"], "Loc");
/// ```
impl FromStr for Token {
    type Err = NaholosError;

    fn from_str(line: &str) -> Result<Self> {
        let mut cols = line.trim_end_matches(['\r', '\n']).split('\t');
        let text = cols.next().unwrap_or_default().trim();
        if text.is_empty() {
            return Err(NaholosError::invalid_argument("token", "empty surface"));
        }
        let mut token = Token::new(text);
        if let Some(pos) = cols.next().map(str::trim)
            && !pos.is_empty()
            && pos != "_"
        {
            token.pos = Some(pos.parse()?);
        }
        if let Some(feats) = cols.next().map(str::trim)
            && !feats.is_empty()
            && feats != "_"
        {
            for pair in feats.split('|') {
                let Some((name, value)) = pair.split_once('=') else {
                    return Err(NaholosError::invalid_argument(
                        "token",
                        format!("feature must be Name=Value: {pair}"),
                    ));
                };
                token.feats.insert(name.to_string(), value.to_string());
            }
        }
        Ok(token)
    }
}

/// 解決の確信度
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// 候補なし
    #[default]
    None,
    /// 手がかりが弱く、先頭の候補を選んだ
    Fallback,
    /// 部分的に一致
    Partial,
    /// 一致、または候補が一つだけ
    Exact,
}

impl Confidence {
    /// スコアを確信度に変換します。
    pub fn from_score(score: f64) -> Self {
        if score >= EXACT_THRESHOLD {
            Confidence::Exact
        } else if score >= PARTIAL_THRESHOLD {
            Confidence::Partial
        } else {
            Confidence::Fallback
        }
    }

    /// ラベル文字列を返します。
    pub const fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Fallback => "fallback",
            Confidence::Partial => "partial",
            Confidence::Exact => "exact",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解決の結果
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// 選ばれたストレス位置(母音インデックス)
    pub position: Option<usize>,
    /// 確信度
    pub confidence: Confidence,
    /// スコア
    pub score: f64,
    /// ストレス記号を挿入した表示形。挿入できない場合は元の表層形
    pub display: String,
    /// 選ばれた候補の位置
    pub candidate: Option<usize>,
}

impl Resolution {
    fn none(token: &Token) -> Self {
        Self {
            position: None,
            confidence: Confidence::None,
            score: 0.0,
            display: token.text.clone(),
            candidate: None,
        }
    }
}

/// ストレス解決器
///
/// 状態を持たないため、複数のスレッドから同時に利用できます。
#[derive(Clone, Debug, Default)]
pub struct StressResolver {
    normalizer: Normalizer,
}

impl StressResolver {
    /// 新しい解決器を作成します。
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    /// 候補のスコアを計算します。
    ///
    /// 品詞が一致すれば0.4、トークンの素性のうち候補と一致する割合の0.4倍を加えます。
    /// トークンが素性を持たない場合、後者は0です。
    pub fn score(&self, token: &Token, candidate: &WordForm) -> f64 {
        let mut score = 0.0;
        if token.pos == Some(candidate.pos) {
            score += POS_WEIGHT;
        }
        if !token.feats.is_empty() {
            let shared = token
                .feats
                .iter()
                .filter(|&(name, value)| candidate.feats.get(name) == Some(value))
                .count();
            score += FEATURE_WEIGHT * shared as f64 / token.feats.len() as f64;
        }
        score
    }

    /// 候補からストレス位置を選びます。
    ///
    /// 候補が一つなら確信度は[`Confidence::Exact`]です。
    /// 複数ある場合は最もスコアの高い候補を選び、同点なら先の候補が優先されます。
    ///
    /// # 例
    ///
    /// ```
    /// use naholos::resolver::{Confidence, StressResolver, Token};
    /// use naholos::word::{Upos, WordForm};
    ///
    /// let resolver = StressResolver::default();
    /// let candidates = [WordForm::new("мама", vec![0], Upos::Noun)];
    /// let res = resolver.resolve(&Token::new("мама"), &candidates);
    /// assert_eq!(res.confidence, Confidence::Exact);
    /// assert_eq!(res.display, "ма\u{301}ма");
    /// ```
    pub fn resolve(&self, token: &Token, candidates: &[WordForm]) -> Resolution {
        let (idx, score, confidence) = match candidates {
            [] => return Resolution::none(token),
            [_] => (0, 1.0, Confidence::Exact),
            _ => {
                let mut best = (0, self.score(token, &candidates[0]));
                for (i, cand) in candidates.iter().enumerate().skip(1) {
                    let s = self.score(token, cand);
                    if s > best.1 {
                        best = (i, s);
                    }
                }
                (best.0, best.1, Confidence::from_score(best.1))
            }
        };

        let position = candidates[idx].stress_indices.first().map(|&p| usize::from(p));
        let display = match position {
            Some(p) => self.normalizer.mark_stress(&token.text, p).unwrap_or_else(|| {
                log::warn!(
                    "stress index {p} is out of range for {:?} ({} vowels)",
                    token.text,
                    self.normalizer.vowel_count(&token.text)
                );
                token.text.clone()
            }),
            None => token.text.clone(),
        };
        Resolution {
            position,
            confidence,
            score,
            display,
            candidate: Some(idx),
        }
    }
}

/// スナップショットと解決器をまとめた検索器
pub struct StressLookup {
    snapshot: Snapshot,
    resolver: StressResolver,
}

impl StressLookup {
    /// 読み込み済みのスナップショットから検索器を作成します。
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            resolver: StressResolver::default(),
        }
    }

    /// 解決器を差し替えます。
    pub fn resolver(mut self, resolver: StressResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// スナップショットへの参照を返します。
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// トークンの候補を検索して解決します。
    ///
    /// # エラー
    ///
    /// スナップショットの索引が壊れている場合、エラーが返されます。
    pub fn resolve(&self, token: &Token) -> Result<Resolution> {
        let candidates = self.snapshot.lookup(&token.text)?;
        Ok(self.resolver.resolve(token, &candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::feats;

    fn noun(form: &str, stress: u8) -> WordForm {
        WordForm::new(form, vec![stress], Upos::Noun)
    }

    #[test]
    fn test_no_candidates() {
        let res = StressResolver::default().resolve(&Token::new("ляля"), &[]);
        assert_eq!(res, Resolution {
            position: None,
            confidence: Confidence::None,
            score: 0.0,
            display: "ляля".into(),
            candidate: None,
        });
    }

    #[test]
    fn test_single_candidate_is_exact() {
        let res = StressResolver::default().resolve(&Token::new("Мама"), &[noun("мама", 1)]);
        assert_eq!(res.position, Some(1));
        assert_eq!(res.confidence, Confidence::Exact);
        assert_eq!(res.score, 1.0);
        assert_eq!(res.display, "Мама\u{301}");
    }

    #[test]
    fn test_tie_keeps_first_candidate() {
        let mut castle = noun("замок", 0);
        castle.definition = Some("castle".into());
        let mut lock = noun("замок", 1);
        lock.definition = Some("lock".into());

        let token = Token::new("замок").pos(Upos::Noun);
        let res = StressResolver::default().resolve(&token, &[castle, lock]);
        assert_eq!(res.candidate, Some(0));
        assert_eq!(res.position, Some(0));
        assert_eq!(res.score, 0.4);
        assert_eq!(res.confidence, Confidence::Fallback);
        assert_eq!(res.display, "за\u{301}мок");
    }

    #[test]
    fn test_features_select_candidate() {
        let mut gen_sg = noun("руки", 0);
        gen_sg.feats = feats! { "Case" => "Gen", "Number" => "Sing" };
        let mut nom_pl = noun("руки", 1);
        nom_pl.feats = feats! { "Case" => "Nom", "Number" => "Plur" };
        let candidates = [gen_sg, nom_pl];
        let resolver = StressResolver::default();

        let token = Token::new("руки")
            .pos(Upos::Noun)
            .feat("Case", "Nom")
            .feat("Number", "Plur");
        let res = resolver.resolve(&token, &candidates);
        assert_eq!(res.candidate, Some(1));
        assert_eq!(res.confidence, Confidence::Exact);
        assert_eq!(res.display, "руки\u{301}");

        let token = Token::new("руки")
            .pos(Upos::Noun)
            .feat("Case", "Gen")
            .feat("Number", "Sing")
            .feat("Animacy", "Inan");
        let res = resolver.resolve(&token, &candidates);
        assert_eq!(res.candidate, Some(0));
        assert_eq!(res.confidence, Confidence::Partial);
    }

    #[test]
    fn test_out_of_range_index_leaves_text_unmarked() {
        let res = StressResolver::default().resolve(&Token::new("мм"), &[noun("мм", 3)]);
        assert_eq!(res.position, Some(3));
        assert_eq!(res.display, "мм");
    }

    #[test]
    fn test_confidence_thresholds() {
        assert_eq!(Confidence::from_score(0.8), Confidence::Exact);
        assert_eq!(Confidence::from_score(0.5), Confidence::Partial);
        assert_eq!(Confidence::from_score(0.4), Confidence::Fallback);
        assert_eq!(Confidence::from_score(0.0), Confidence::Fallback);
    }

    #[test]
    fn test_parse_token() {
        let token: Token = "Замок\t_\t_".parse().unwrap();
        assert_eq!(token, Token::new("Замок"));
        let token: Token = "замку\tnoun\tCase=Loc".parse().unwrap();
        assert_eq!(token.pos, Some(Upos::Noun));
        assert_eq!(token.feats, feats! { "Case" => "Loc" });
        assert!("\tNOUN".parse::<Token>().is_err());
        assert!("замку\tNOUN\tCase".parse::<Token>().is_err());
        assert!("замку\tFOO".parse::<Token>().is_err());
    }
}
