//! 語義構造を持つJSONL辞書ソース
//!
//! 1行に1つの自己記述的なレコード(見出し語、品詞、活用形、語義)を持つ
//! Wiktionary抽出形式を読み込みます。
//! 活用形ごと、語義ごとに一つの語形を生成します。
//! ストレス記号を持たない活用形はストレス情報を持たないため読み飛ばします。

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::context::ParseContext;
use crate::errors::Result;
use crate::source::{Parsed, RecordError, RecordResult, Source};
use crate::word::{Template, Translation, Upos, WordForm};

const IDENTITY: &str = "naholos/kaikki-source/1";

const SKIPPED_FORMS: [&str; 2] = ["no-table-tags", "uk-ndecl"];
const SKIPPED_FORM_TAGS: [&str; 3] = ["inflection-template", "table-tags", "romanization"];

#[derive(Deserialize)]
struct RawEntry {
    word: Option<String>,
    pos: Option<String>,
    #[serde(default)]
    forms: Vec<RawForm>,
    #[serde(default)]
    senses: Vec<RawSense>,
    etymology_text: Option<String>,
    etymology_number: Option<u32>,
    #[serde(default)]
    etymology_templates: Vec<RawTemplate>,
    #[serde(default)]
    inflection_templates: Vec<RawTemplate>,
    #[serde(default)]
    sounds: Vec<RawSound>,
    #[serde(default)]
    categories: Vec<RawCategory>,
}

#[derive(Deserialize)]
struct RawForm {
    form: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    roman: Option<String>,
}

#[derive(Deserialize)]
struct RawSense {
    id: Option<String>,
    #[serde(default)]
    glosses: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    categories: Vec<RawCategory>,
    #[serde(default)]
    examples: Vec<RawExample>,
    #[serde(default)]
    translations: Vec<RawTranslation>,
}

#[derive(Deserialize)]
struct RawTemplate {
    name: String,
    #[serde(default)]
    args: BTreeMap<String, serde_json::Value>,
    expansion: Option<String>,
}

#[derive(Deserialize)]
struct RawSound {
    ipa: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCategory {
    Name(String),
    Object { name: String },
}

#[derive(Deserialize)]
struct RawExample {
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawTranslation {
    code: Option<String>,
    lang: Option<String>,
    word: Option<String>,
    sense: Option<String>,
}

impl RawCategory {
    fn into_name(self) -> String {
        match self {
            RawCategory::Name(s) | RawCategory::Object { name: s } => s,
        }
    }
}

impl From<RawTemplate> for Template {
    fn from(raw: RawTemplate) -> Self {
        let args = raw
            .args
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect();
        Template {
            name: raw.name,
            args,
            expansion: raw.expansion,
        }
    }
}

/// 品詞名をUD品詞に変換します。
pub fn normalize_pos(pos: &str) -> Upos {
    match pos.to_ascii_lowercase().as_str() {
        "noun" => Upos::Noun,
        "verb" => Upos::Verb,
        "adj" | "adjective" => Upos::Adj,
        "adv" | "adverb" => Upos::Adv,
        "pron" | "pronoun" => Upos::Pron,
        "name" | "propn" | "proper_noun" => Upos::Propn,
        "num" | "number" => Upos::Num,
        "det" | "determiner" => Upos::Det,
        "prep" | "adp" | "adposition" | "postp" => Upos::Adp,
        "aux" | "auxiliary" => Upos::Aux,
        "conj" | "cconj" => Upos::Cconj,
        "sconj" => Upos::Sconj,
        "particle" | "part" => Upos::Part,
        "intj" | "interjection" => Upos::Intj,
        "punct" | "punctuation" => Upos::Punct,
        "sym" | "symbol" => Upos::Sym,
        _ => Upos::X,
    }
}

/// 活用形のタグをUD素性に変換します。対応しないタグは`None`です。
pub fn tag_to_feature(tag: &str) -> Option<(&'static str, &'static str)> {
    let feat = match tag {
        "singular" => ("Number", "Sing"),
        "plural" => ("Number", "Plur"),
        "masculine" => ("Gender", "Masc"),
        "feminine" => ("Gender", "Fem"),
        "neuter" => ("Gender", "Neut"),
        "nominative" => ("Case", "Nom"),
        "genitive" => ("Case", "Gen"),
        "dative" => ("Case", "Dat"),
        "accusative" => ("Case", "Acc"),
        "instrumental" => ("Case", "Ins"),
        "locative" => ("Case", "Loc"),
        "vocative" => ("Case", "Voc"),
        "animate" => ("Animacy", "Anim"),
        "inanimate" => ("Animacy", "Inan"),
        "imperfective" => ("Aspect", "Imp"),
        "perfective" => ("Aspect", "Perf"),
        "present" => ("Tense", "Pres"),
        "past" => ("Tense", "Past"),
        "future" => ("Tense", "Fut"),
        "first-person" => ("Person", "1"),
        "second-person" => ("Person", "2"),
        "third-person" => ("Person", "3"),
        "infinitive" => ("VerbForm", "Inf"),
        "imperative" => ("Mood", "Imp"),
        "participle" => ("VerbForm", "Part"),
        "adverbial" => ("VerbForm", "Conv"),
        "active" => ("Voice", "Act"),
        "passive" => ("Voice", "Pass"),
        "comparative" => ("Degree", "Cmp"),
        "superlative" => ("Degree", "Sup"),
        "reflexive" => ("Reflex", "Yes"),
        "negative" => ("Polarity", "Neg"),
        "positive" => ("Polarity", "Pos"),
        _ => return None,
    };
    Some(feat)
}

/// JSONL辞書ソース
pub struct KaikkiSource {
    path: PathBuf,
    tag: String,
}

impl KaikkiSource {
    /// 新しいソースを作成します。
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tag: "KAIKKI".to_string(),
        }
    }

    /// タグを設定します。
    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }
}

impl Source for KaikkiSource {
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
        Ok(Box::new(KaikkiRecords {
            lines,
            ctx,
            tag: &self.tag,
            pending: VecDeque::new(),
            line_no: 0,
        }))
    }
}

struct KaikkiRecords<'a, B> {
    lines: Lines<B>,
    ctx: &'a ParseContext,
    tag: &'a str,
    pending: VecDeque<Parsed>,
    line_no: u64,
}

impl<B: BufRead> KaikkiRecords<'_, B> {
    fn expand(&mut self, line: &str) -> std::result::Result<(), RecordError> {
        let entry: RawEntry = serde_json::from_str(line)
            .map_err(|e| RecordError::malformed(self.line_no, format!("invalid JSON: {e}")))?;
        let Some(word) = entry.word.as_deref().filter(|w| !w.is_empty()) else {
            return Err(RecordError::malformed(self.line_no, "missing word"));
        };

        let normalizer = self.ctx.normalizer();
        let headword = normalizer.lookup_key(&normalizer.strip_stress(word).form);
        let pos = entry.pos.as_deref().map(normalize_pos).unwrap_or(Upos::X);
        let ipa = entry.sounds.iter().find_map(|s| s.ipa.clone());
        let categories: Vec<String> = entry.categories.into_iter().map(RawCategory::into_name).collect();
        let etymology_templates: Vec<Template> =
            entry.etymology_templates.into_iter().map(Template::from).collect();
        let inflection_templates: Vec<Template> =
            entry.inflection_templates.into_iter().map(Template::from).collect();

        let forms: Vec<&RawForm> = entry
            .forms
            .iter()
            .filter(|f| {
                f.form
                    .as_deref()
                    .is_some_and(|form| !SKIPPED_FORMS.contains(&form))
                    && !f.tags.iter().any(|t| SKIPPED_FORM_TAGS.contains(&t.as_str()))
            })
            .collect();

        for sense in entry.senses {
            let mut glosses = sense.glosses.into_iter();
            let definition = glosses.next();
            let alt_definitions: Vec<String> = glosses.collect();
            let sense_id = sense.id.filter(|id| !id.is_empty());
            let examples: Vec<String> = sense.examples.into_iter().filter_map(|e| e.text).collect();
            let translations: Vec<Translation> = sense
                .translations
                .into_iter()
                .filter_map(|t| {
                    Some(Translation {
                        lang: t.code.or(t.lang)?,
                        text: t.word?,
                        sense: t.sense,
                    })
                })
                .collect();
            let form_categories = if categories.is_empty() {
                sense.categories.into_iter().map(RawCategory::into_name).collect()
            } else {
                categories.clone()
            };

            for raw in &forms {
                let Some(text) = raw.form.as_deref() else {
                    continue;
                };
                let stripped = normalizer.strip_stress(text);
                if stripped.stress.is_empty() {
                    continue;
                }
                let mut feats = BTreeMap::new();
                let mut tags: BTreeSet<String> =
                    sense.tags.iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()).collect();
                for tag in &raw.tags {
                    match tag_to_feature(tag) {
                        Some((k, v)) => {
                            feats.insert(k.to_string(), v.to_string());
                        }
                        None => {
                            tags.insert(tag.to_lowercase());
                        }
                    }
                }

                let mut wf = WordForm::new(normalizer.lookup_key(&stripped.form), stripped.stress, pos)
                    .with_source(self.tag);
                wf.feats = feats;
                wf.lemma = Some(headword.clone());
                wf.definition = definition.clone();
                wf.alt_definitions = alt_definitions.clone();
                wf.examples = examples.clone();
                wf.translations = translations.clone();
                wf.etymology = entry.etymology_text.clone();
                wf.etymology_number = entry.etymology_number;
                wf.etymology_templates = etymology_templates.clone();
                wf.inflection_templates = inflection_templates.clone();
                wf.categories = form_categories.clone();
                wf.tags = tags.into_iter().collect();
                wf.sense_id = sense_id.clone();
                wf.roman = raw.roman.clone();
                wf.ipa = ipa.clone();
                self.pending.push_back(Parsed {
                    headword: headword.clone(),
                    form: wf,
                });
            }
        }
        Ok(())
    }
}

impl<B: BufRead> Iterator for KaikkiRecords<'_, B> {
    type Item = RecordResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(parsed) = self.pending.pop_front() {
                return Some(Ok(parsed));
            }
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Some(Err(RecordError::malformed(self.line_no, "line is not valid UTF-8")));
                }
                Err(e) => return Some(Err(RecordError::Io(e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Err(e) = self.expand(&line) {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const ZAMOK_JSONL: &str = include_str!("../tests/resources/zamok.jsonl");

    fn parse(content: &str) -> Vec<RecordResult> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        let ctx = ParseContext::default();
        let source = KaikkiSource::new(file.path());
        source.records(&ctx).unwrap().collect()
    }

    #[test]
    fn test_kaikki_source_fixture() {
        let results = parse(ZAMOK_JSONL);
        let (ok, err): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
        let ok: Vec<Parsed> = ok.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(err.len(), 1);
        assert_eq!(ok.len(), 3);

        let castle = &ok[0];
        assert_eq!(castle.headword, "замок");
        assert_eq!(castle.form.form, "замок");
        assert_eq!(castle.form.stress_indices, vec![0]);
        assert_eq!(castle.form.pos, Upos::Noun);
        assert_eq!(castle.form.feats["Case"], "Nom");
        assert_eq!(castle.form.feats["Number"], "Sing");
        assert_eq!(castle.form.definition.as_deref(), Some("castle"));
        assert_eq!(castle.form.alt_definitions, vec!["fortress".to_string()]);
        assert_eq!(castle.form.sense_id.as_deref(), Some("uk-замок-noun-1"));
        assert_eq!(castle.form.translations[0].lang, "en");
        assert_eq!(castle.form.ipa.as_deref(), Some("[ˈzamɔk]"));
        assert_eq!(castle.form.categories, vec!["Ukrainian nouns".to_string()]);
        assert_eq!(castle.form.etymology_templates[0].args["1"], "uk");

        assert_eq!(ok[1].form.feats["Case"], "Gen");
        assert_eq!(ok[1].form.form, "замку");

        let lock = &ok[2];
        assert_eq!(lock.form.stress_indices, vec![1]);
        assert_eq!(lock.form.definition.as_deref(), Some("lock"));
        assert_eq!(lock.form.tags, vec!["dated".to_string()]);
    }

    #[test]
    fn test_pos_and_tags() {
        assert_eq!(normalize_pos("noun"), Upos::Noun);
        assert_eq!(normalize_pos("prep"), Upos::Adp);
        assert_eq!(normalize_pos("name"), Upos::Propn);
        assert_eq!(normalize_pos("phrase"), Upos::X);
        assert_eq!(tag_to_feature("locative"), Some(("Case", "Loc")));
        assert_eq!(tag_to_feature("animate"), Some(("Animacy", "Anim")));
        assert_eq!(tag_to_feature("archaic"), None);
    }
}
