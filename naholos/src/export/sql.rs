//! リレーショナル形式の出力
//!
//! エントリと語形を正規化したテーブル群としてSQLiteに書き出します。
//! 行IDは書き込み順に明示的に採番され、入力が同じなら同じIDになります。

use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::export::{RELATIONAL_FILE, RowStats};
use crate::snapshot::SnapshotMeta;
use crate::utils::unix_now;
use crate::variant::Classification;
use crate::word::{LinguisticEntry, Template};

const SCHEMA: &str = "
CREATE TABLE lemma_entry (
    id INTEGER PRIMARY KEY,
    headword TEXT NOT NULL UNIQUE,
    stress_patterns TEXT NOT NULL,
    variant_type TEXT NOT NULL,
    is_disambiguable INTEGER NOT NULL,
    form_count INTEGER NOT NULL
);
CREATE TABLE definition (
    id INTEGER PRIMARY KEY,
    text TEXT NOT NULL UNIQUE
);
CREATE TABLE etymology_text (
    id INTEGER PRIMARY KEY,
    text TEXT NOT NULL UNIQUE
);
CREATE TABLE word_form (
    id INTEGER PRIMARY KEY,
    lemma_id INTEGER NOT NULL REFERENCES lemma_entry(id),
    form TEXT NOT NULL,
    pos TEXT NOT NULL,
    stress TEXT NOT NULL,
    lemma TEXT,
    definition_id INTEGER REFERENCES definition(id),
    etymology_id INTEGER REFERENCES etymology_text(id),
    etymology_number INTEGER,
    sense_id TEXT,
    roman TEXT,
    ipa TEXT,
    sources TEXT NOT NULL
);
CREATE TABLE feature (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    name TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE translation (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    lang TEXT NOT NULL,
    text TEXT NOT NULL,
    sense TEXT
);
CREATE TABLE example (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    text TEXT NOT NULL
);
CREATE TABLE alt_definition (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    text TEXT NOT NULL
);
CREATE TABLE category (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    name TEXT NOT NULL
);
CREATE TABLE tag (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    name TEXT NOT NULL
);
CREATE TABLE etymology_template (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    name TEXT NOT NULL,
    args TEXT NOT NULL,
    expansion TEXT
);
CREATE TABLE inflection_template (
    form_id INTEGER NOT NULL REFERENCES word_form(id),
    name TEXT NOT NULL,
    args TEXT NOT NULL,
    expansion TEXT
);
CREATE TABLE db_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE db_stats (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

const INDEXES: &str = "
CREATE INDEX idx_word_form_form ON word_form(form);
CREATE INDEX idx_word_form_lemma_id ON word_form(lemma_id);
CREATE INDEX idx_word_form_pos ON word_form(pos);
CREATE INDEX idx_lemma_entry_variant ON lemma_entry(variant_type);
CREATE INDEX idx_feature_form_id ON feature(form_id);
CREATE INDEX idx_feature_name_value ON feature(name, value);
CREATE INDEX idx_translation_form_id ON translation(form_id);
CREATE INDEX idx_example_form_id ON example(form_id);
CREATE INDEX idx_alt_definition_form_id ON alt_definition(form_id);
CREATE INDEX idx_category_form_id ON category(form_id);
CREATE INDEX idx_tag_form_id ON tag(form_id);
CREATE INDEX idx_etymology_template_form_id ON etymology_template(form_id);
CREATE INDEX idx_inflection_template_form_id ON inflection_template(form_id);
";

/// リレーショナル出力の結果
#[derive(Clone, Debug)]
pub struct SqlReport {
    /// 最適化後のファイルサイズ
    pub bytes: u64,
    /// テーブルごとの行数
    pub rows: RowStats,
}

/// SQLiteへの書き込み器
///
/// 出力ディレクトリ内の一時ファイルに書き込み、[`SqlWriter::finish`]で
/// [`RELATIONAL_FILE`]に置き換えます。途中で破棄された場合、一時ファイルは削除されます。
pub struct SqlWriter {
    conn: Connection,
    tmp: tempfile::NamedTempFile,
    dest: PathBuf,
    batch_size: usize,
    pending: usize,
    rows: RowStats,
    definitions: HashMap<String, i64>,
    etymologies: HashMap<String, i64>,
}

impl SqlWriter {
    /// 新しいデータベースを作成します。
    ///
    /// # 引数
    ///
    /// * `out_dir` - 出力ディレクトリ
    /// * `batch_size` - 一つのトランザクションでコミットする語形の数
    pub fn create<P: AsRef<Path>>(out_dir: P, batch_size: usize) -> Result<Self> {
        let out_dir = out_dir.as_ref();
        let tmp = tempfile::NamedTempFile::new_in(out_dir)?;
        let conn = Connection::open(tmp.path())?;
        conn.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn,
            tmp,
            dest: out_dir.join(RELATIONAL_FILE),
            batch_size: batch_size.max(1),
            pending: 0,
            rows: RowStats::default(),
            definitions: HashMap::new(),
            etymologies: HashMap::new(),
        })
    }

    fn intern(
        conn: &Connection,
        cache: &mut HashMap<String, i64>,
        counter: &mut u64,
        table: &str,
        text: &str,
    ) -> Result<i64> {
        if let Some(&id) = cache.get(text) {
            return Ok(id);
        }
        let id = i64::try_from(cache.len())? + 1;
        let mut stmt = conn.prepare_cached(&format!("INSERT INTO {table} (id, text) VALUES (?1, ?2)"))?;
        stmt.execute(params![id, text])?;
        cache.insert(text.to_string(), id);
        *counter += 1;
        Ok(id)
    }

    fn insert_templates(&self, table: &str, form_id: i64, templates: &[Template]) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {table} (form_id, name, args, expansion) VALUES (?1, ?2, ?3, ?4)"
        ))?;
        for t in templates {
            stmt.execute(params![
                form_id,
                t.name,
                serde_json::to_string(&t.args)?,
                t.expansion
            ])?;
        }
        Ok(templates.len() as u64)
    }

    fn insert_texts<S: AsRef<str>>(
        &self,
        table: &str,
        column: &str,
        form_id: i64,
        texts: &[S],
    ) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {table} (form_id, {column}) VALUES (?1, ?2)"
        ))?;
        for text in texts {
            stmt.execute(params![form_id, text.as_ref()])?;
        }
        Ok(texts.len() as u64)
    }

    /// エントリとその語形を書き込みます。
    pub fn write_entry(&mut self, entry: &LinguisticEntry, class: Classification) -> Result<()> {
        let lemma_id = i64::try_from(self.rows.lemma_entries)? + 1;
        self.conn
            .prepare_cached(
                "INSERT INTO lemma_entry
                 (id, headword, stress_patterns, variant_type, is_disambiguable, form_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                lemma_id,
                entry.headword,
                serde_json::to_string(&entry.possible_stress_indices)?,
                class.variant.as_str(),
                class.is_disambiguable,
                i64::try_from(entry.forms.len())?,
            ])?;
        self.rows.lemma_entries += 1;

        for form in &entry.forms {
            let definition_id = match &form.definition {
                Some(text) => Some(Self::intern(
                    &self.conn,
                    &mut self.definitions,
                    &mut self.rows.definitions,
                    "definition",
                    text,
                )?),
                None => None,
            };
            let etymology_id = match &form.etymology {
                Some(text) => Some(Self::intern(
                    &self.conn,
                    &mut self.etymologies,
                    &mut self.rows.etymology_texts,
                    "etymology_text",
                    text,
                )?),
                None => None,
            };

            let form_id = i64::try_from(self.rows.word_forms)? + 1;
            self.conn
                .prepare_cached(
                    "INSERT INTO word_form
                     (id, lemma_id, form, pos, stress, lemma, definition_id, etymology_id,
                      etymology_number, sense_id, roman, ipa, sources)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?
                .execute(params![
                    form_id,
                    lemma_id,
                    form.form,
                    form.pos.as_str(),
                    serde_json::to_string(&form.stress_indices)?,
                    form.lemma,
                    definition_id,
                    etymology_id,
                    form.etymology_number,
                    form.sense_id,
                    form.roman,
                    form.ipa,
                    serde_json::to_string(&form.sources)?,
                ])?;
            self.rows.word_forms += 1;

            {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO feature (form_id, name, value) VALUES (?1, ?2, ?3)",
                )?;
                for (name, value) in &form.feats {
                    stmt.execute(params![form_id, name, value])?;
                }
            }
            self.rows.features += form.feats.len() as u64;

            {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO translation (form_id, lang, text, sense) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for t in &form.translations {
                    stmt.execute(params![form_id, t.lang, t.text, t.sense])?;
                }
            }
            self.rows.translations += form.translations.len() as u64;

            self.rows.examples += self.insert_texts("example", "text", form_id, &form.examples)?;
            self.rows.alt_definitions +=
                self.insert_texts("alt_definition", "text", form_id, &form.alt_definitions)?;
            self.rows.categories +=
                self.insert_texts("category", "name", form_id, &form.categories)?;
            self.rows.tags += self.insert_texts("tag", "name", form_id, &form.tags)?;
            self.rows.etymology_templates +=
                self.insert_templates("etymology_template", form_id, &form.etymology_templates)?;
            self.rows.inflection_templates +=
                self.insert_templates("inflection_template", form_id, &form.inflection_templates)?;

            self.pending += 1;
            if self.pending >= self.batch_size {
                self.conn.execute_batch("COMMIT; BEGIN")?;
                self.pending = 0;
            }
        }
        Ok(())
    }

    fn write_metadata(&self, merged_hash: &str, meta: &SnapshotMeta) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT INTO db_metadata (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params!["merged_hash", merged_hash])?;
        stmt.execute(params!["version", crate::VERSION])?;
        stmt.execute(params!["created_at", unix_now().to_string()])?;
        for (label, count) in &meta.labels {
            stmt.execute(params![format!("variant.{label}"), count.to_string()])?;
        }

        let rows = &self.rows;
        let stats: [(&str, u64); 13] = [
            ("lemma_entries", rows.lemma_entries),
            ("word_forms", rows.word_forms),
            ("features", rows.features),
            ("translations", rows.translations),
            ("examples", rows.examples),
            ("alt_definitions", rows.alt_definitions),
            ("categories", rows.categories),
            ("tags", rows.tags),
            ("etymology_templates", rows.etymology_templates),
            ("inflection_templates", rows.inflection_templates),
            ("definitions", rows.definitions),
            ("etymology_texts", rows.etymology_texts),
            ("disambiguable", meta.disambiguable),
        ];
        let mut stmt = self
            .conn
            .prepare("INSERT INTO db_stats (key, value) VALUES (?1, ?2)")?;
        for (key, value) in stats {
            stmt.execute(params![key, i64::try_from(value)?])?;
        }
        Ok(())
    }

    /// 索引とメタデータを書き込み、最適化してファイルを置き換えます。
    ///
    /// # 引数
    ///
    /// * `merged_hash` - マージ済みストアの内容ハッシュ
    /// * `meta` - スナップショットのメタデータ
    pub fn finish(self, merged_hash: &str, meta: &SnapshotMeta) -> Result<SqlReport> {
        self.write_metadata(merged_hash, meta)?;
        self.conn.execute_batch("COMMIT")?;
        self.conn.execute_batch(INDEXES)?;

        let before = fs::metadata(self.tmp.path())?.len();
        self.conn.execute_batch("VACUUM; ANALYZE;")?;
        let Self { conn, tmp, dest, rows, .. } = self;
        conn.close().map_err(|(_, e)| e)?;
        let bytes = fs::metadata(tmp.path())?.len();
        log::info!("relational export: {before} -> {bytes} bytes after VACUUM");
        log::info!(
            "  {} lemma entries, {} word forms, {} features, {} translations",
            rows.lemma_entries,
            rows.word_forms,
            rows.features,
            rows.translations
        );

        tmp.persist(&dest)?;
        Ok(SqlReport { bytes, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::feats;
    use crate::variant::classify;
    use crate::word::{Translation, Upos, WordForm};

    #[test]
    fn test_write_and_query() {
        let tmp = tempfile::tempdir().unwrap();
        let mut castle = WordForm::new("замок", vec![0], Upos::Noun).with_source("WIKI");
        castle.definition = Some("castle".into());
        castle.translations.push(Translation {
            lang: "en".into(),
            text: "castle".into(),
            sense: None,
        });
        castle.feats = feats! { "Case" => "Nom" };
        let mut lock = WordForm::new("замок", vec![1], Upos::Noun).with_source("TXT");
        lock.definition = Some("lock".into());
        lock.examples.push("замок на дверях".into());
        let entry = LinguisticEntry::from_forms("замок", vec![castle, lock]);
        let class = classify(&entry.forms);

        let mut wtr = SqlWriter::create(tmp.path(), 1).unwrap();
        wtr.write_entry(&entry, class).unwrap();
        let meta = SnapshotMeta::default();
        let report = wtr.finish("abc", &meta).unwrap();
        assert_eq!(report.rows.lemma_entries, 1);
        assert_eq!(report.rows.word_forms, 2);
        assert_eq!(report.rows.definitions, 2);
        assert_eq!(report.rows.features, 1);

        let path = tmp.path().join(RELATIONAL_FILE);
        assert_eq!(fs::metadata(&path).unwrap().len(), report.bytes);
        let conn = Connection::open(&path).unwrap();
        let (variant, disambiguable): (String, bool) = conn
            .query_row(
                "SELECT variant_type, is_disambiguable FROM lemma_entry WHERE headword = ?1",
                params!["замок"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(variant, "grammatical_homonym");
        assert!(disambiguable);

        let stress: String = conn
            .query_row(
                "SELECT w.stress FROM word_form w JOIN definition d ON w.definition_id = d.id
                 WHERE d.text = 'lock'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stress, "[1]");

        let hash: String = conn
            .query_row(
                "SELECT value FROM db_metadata WHERE key = 'merged_hash'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hash, "abc");
        let forms: i64 = conn
            .query_row(
                "SELECT value FROM db_stats WHERE key = 'word_forms'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(forms, 2);
    }

    #[test]
    fn test_abandoned_writer_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let wtr = SqlWriter::create(tmp.path(), 10).unwrap();
        drop(wtr);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
