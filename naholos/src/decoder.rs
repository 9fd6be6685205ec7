//! バイナリ辞書の値デコーダ
//!
//! 圧縮辞書の値バイト列を、(ストレス位置, 形態タグ)のレコード列に変換します。
//!
//! # 値の形式
//!
//! - レコード区切り(`0xFF`)を含まない場合、0以外の各バイトは
//!   ストレス記号の挿入位置`P`です。ストレスのある文字は`P-1`番目の文字です。
//! - レコード区切りを含む場合、値を`0xFF`で分割し、各項目を`0xFE`で
//!   位置バイト列とタグバイト列に分けます。タグバイトは固定の表で
//!   (素性名, 値)または品詞に変換され、未知のバイトは読み飛ばされます。
//!
//! 位置`P`を「ストレス文字位置+1」とみなす規則は参照データの実例から
//! 導かれたものです。`P = 0`は直前の文字がないため無視されます。

use std::collections::BTreeMap;

use crate::context::Normalizer;
use crate::word::{StressPattern, Upos};

/// 位置バイト列とタグバイト列の区切り
pub const POS_SEPARATOR: u8 = 0xFE;

/// レコード区切り
pub const RECORD_SEPARATOR: u8 = 0xFF;

/// タグバイトの意味
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagValue {
    /// UD素性(素性名, 値)
    Feature(&'static str, &'static str),
    /// 品詞
    Pos(Upos),
}

/// タグバイトを意味に変換します。未知のバイトは`None`です。
pub const fn tag_by_byte(byte: u8) -> Option<TagValue> {
    use TagValue::{Feature, Pos};
    let tag = match byte {
        0x11 => Feature("Number", "Sing"),
        0x12 => Feature("Number", "Plur"),
        0x20 => Feature("Case", "Nom"),
        0x21 => Feature("Case", "Gen"),
        0x22 => Feature("Case", "Dat"),
        0x23 => Feature("Case", "Acc"),
        0x24 => Feature("Case", "Ins"),
        0x25 => Feature("Case", "Loc"),
        0x26 => Feature("Case", "Voc"),
        0x30 => Feature("Gender", "Neut"),
        0x31 => Feature("Gender", "Masc"),
        0x32 => Feature("Gender", "Fem"),
        0x41 => Feature("VerbForm", "Inf"),
        0x42 => Feature("VerbForm", "Conv"),
        0x50 => Feature("Person", "0"),
        0x61 => Pos(Upos::Noun),
        0x62 => Pos(Upos::Adj),
        0x63 => Pos(Upos::Intj),
        0x64 => Pos(Upos::Cconj),
        0x65 => Pos(Upos::Part),
        0x66 => Pos(Upos::Pron),
        0x67 => Pos(Upos::Verb),
        0x68 => Pos(Upos::Propn),
        0x69 => Pos(Upos::Adv),
        0x6A => Pos(Upos::Noun),
        0x6B => Pos(Upos::Num),
        0x6C => Pos(Upos::Adp),
        _ => return None,
    };
    Some(tag)
}

/// デコードされた一つのレコード
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedRecord {
    /// ストレス位置(母音インデックス、昇順、重複なし)
    pub stress: StressPattern,
    /// 品詞。タグがない場合は`None`
    pub pos: Option<Upos>,
    /// 形態素性
    pub feats: BTreeMap<String, String>,
}

impl DecodedRecord {
    /// 品詞を返します。タグがない場合は[`Upos::X`]です。
    pub fn pos_or_x(&self) -> Upos {
        self.pos.unwrap_or(Upos::X)
    }
}

/// 値バイト列のデコーダ
///
/// 入出力を行わない純粋な変換であり、同じ入力には常に同じ結果を返します。
pub struct ValueDecoder<'a> {
    normalizer: &'a Normalizer,
}

impl<'a> ValueDecoder<'a> {
    /// 新しいデコーダを作成します。
    pub fn new(normalizer: &'a Normalizer) -> Self {
        Self { normalizer }
    }

    /// 値をデコードします。
    ///
    /// # 引数
    ///
    /// * `word` - 値に対応する見出しキー(ストレス記号なし)
    /// * `raw` - 値バイト列
    ///
    /// # 戻り値
    ///
    /// 値に現れる順のレコード列。区切りを含まない値は一つのレコード
    /// (素性なし)になります。空の項目は読み飛ばされます。
    ///
    /// # 例
    ///
    /// ```
    /// use naholos::context::Normalizer;
    /// use naholos::decoder::ValueDecoder;
    ///
    /// let n = Normalizer::ukrainian();
    /// let records = ValueDecoder::new(&n).decode("мама", &[2]);
    /// assert_eq!(records[0].stress, vec![0]);
    /// ```
    pub fn decode(&self, word: &str, raw: &[u8]) -> Vec<DecodedRecord> {
        let chars: Vec<char> = word.chars().collect();

        if !raw.contains(&RECORD_SEPARATOR) {
            return vec![DecodedRecord {
                stress: self.positions_to_vowels(&chars, raw),
                ..Default::default()
            }];
        }

        raw.split(|&b| b == RECORD_SEPARATOR)
            .filter(|item| !item.is_empty())
            .map(|item| {
                let (accents, tags) = match item.iter().position(|&b| b == POS_SEPARATOR) {
                    Some(i) => (&item[..i], &item[i + 1..]),
                    None => (item, &[][..]),
                };
                let mut record = DecodedRecord {
                    stress: self.positions_to_vowels(&chars, accents),
                    ..Default::default()
                };
                for &b in tags {
                    match tag_by_byte(b) {
                        Some(TagValue::Feature(k, v)) => {
                            record.feats.insert(k.to_string(), v.to_string());
                        }
                        Some(TagValue::Pos(p)) => record.pos = Some(p),
                        None => {}
                    }
                }
                record
            })
            .collect()
    }

    /// 挿入位置の列を母音インデックスに変換します。
    fn positions_to_vowels(&self, chars: &[char], positions: &[u8]) -> StressPattern {
        let mut out: StressPattern = positions
            .iter()
            .filter(|&&p| p > 0)
            .filter_map(|&p| self.normalizer.vowel_index_at(chars, usize::from(p) - 1))
            .filter_map(|v| u8::try_from(v).ok())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
