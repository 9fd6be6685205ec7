//! 異形の分類
//!
//! 一つの見出し語の語形群を、ストレスパターンの違いがどのような性質のものかによって
//! 分類します。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::word::{Upos, WordForm};

/// 異形の種類
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Archive, Serialize, Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug, Clone, Copy, PartialEq, Eq))]
#[repr(u8)]
pub enum VariantType {
    /// ストレスパターンが一つだけ
    #[default]
    Single,
    /// 品詞・素性・語義のいずれも区別しない揺れ
    FreeVariant,
    /// 語義の異なる同綴異音語
    GrammaticalHomonym,
    /// 品詞または素性で区別される異形
    MorphologicalVariant,
}

impl VariantType {
    /// すべての種類
    pub const ALL: [VariantType; 4] = [
        VariantType::Single,
        VariantType::FreeVariant,
        VariantType::GrammaticalHomonym,
        VariantType::MorphologicalVariant,
    ];

    /// ラベル文字列を返します。
    pub const fn as_str(&self) -> &'static str {
        match self {
            VariantType::Single => "single",
            VariantType::FreeVariant => "free_variant",
            VariantType::GrammaticalHomonym => "grammatical_homonym",
            VariantType::MorphologicalVariant => "morphological_variant",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分類の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    /// 異形の種類
    pub variant: VariantType,
    /// 外部の品詞・素性情報でストレスを選び分けられるかどうか
    pub is_disambiguable: bool,
}

/// 語形群を分類します。
///
/// 語形をストレスパターンごとにまとめ、パターンが一つ以下なら[`VariantType::Single`]です。
/// 複数ある場合、全語形を通じた(品詞, 素性)の組が二種類以上なら
/// [`VariantType::MorphologicalVariant`]、一種類で語義が二種類以上なら
/// [`VariantType::GrammaticalHomonym`]、それ以外は[`VariantType::FreeVariant`]です。
/// 区別可能とされるのは形態的異形と同綴異音語だけです。
pub fn classify(forms: &[WordForm]) -> Classification {
    let patterns: BTreeSet<&[u8]> = forms.iter().map(|f| f.stress_indices.as_slice()).collect();
    if patterns.len() <= 1 {
        return Classification {
            variant: VariantType::Single,
            is_disambiguable: false,
        };
    }

    let fingerprints: BTreeSet<(Upos, &BTreeMap<String, String>)> =
        forms.iter().map(|f| (f.pos, &f.feats)).collect();
    let definitions: BTreeSet<&str> = forms.iter().map(WordForm::definition_or_empty).collect();

    let variant = if fingerprints.len() > 1 {
        VariantType::MorphologicalVariant
    } else if definitions.len() > 1 {
        VariantType::GrammaticalHomonym
    } else {
        VariantType::FreeVariant
    };
    Classification {
        variant,
        is_disambiguable: matches!(
            variant,
            VariantType::MorphologicalVariant | VariantType::GrammaticalHomonym
        ),
    }
}
