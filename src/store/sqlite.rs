use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::QuestionStore;
use crate::model::{Question, QuestionBank};
use crate::util::{ensure_directory, now_utc_string};

/// Local database with the same tables as the LMS, for offline runs.
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        Self::from_connection(connection)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn question_count(&self) -> Result<i64> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS question_banks (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              description TEXT,
              category TEXT,
              difficulty TEXT,
              inserted_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS questions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              question_bank_id INTEGER NOT NULL REFERENCES question_banks(id),
              question_type TEXT NOT NULL,
              question_text TEXT NOT NULL,
              difficulty TEXT NOT NULL,
              topic TEXT,
              learning_objective TEXT,
              ase_standard TEXT,
              points INTEGER NOT NULL DEFAULT 1,
              question_data TEXT NOT NULL,
              explanation TEXT,
              active INTEGER NOT NULL DEFAULT 1,
              inserted_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_question_banks_name ON question_banks(name);
            CREATE INDEX IF NOT EXISTS idx_questions_bank ON questions(question_bank_id);
            ",
        )
        .context("failed to initialize question schema")?;
    Ok(())
}

impl QuestionStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn get_or_create_bank(&mut self, bank: &QuestionBank) -> Result<i64> {
        let existing = self
            .connection
            .query_row(
                "SELECT id FROM question_banks WHERE name = ?1 LIMIT 1",
                params![bank.name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .with_context(|| format!("failed to look up question bank {}", bank.name))?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let now = now_utc_string();
        self.connection
            .execute(
                "INSERT INTO question_banks (name, description, category, difficulty, inserted_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![bank.name, bank.description, bank.category, bank.difficulty, now],
            )
            .with_context(|| format!("failed to create question bank {}", bank.name))?;
        Ok(self.connection.last_insert_rowid())
    }

    fn insert_question(&mut self, bank_id: i64, question: &Question) -> Result<()> {
        let now = now_utc_string();
        self.connection
            .execute(
                "INSERT INTO questions (
                   question_bank_id, question_type, question_text, difficulty, topic,
                   learning_objective, ase_standard, points, question_data, explanation,
                   active, inserted_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                params![
                    bank_id,
                    question.question_type.as_str(),
                    question.question_text,
                    question.difficulty.as_str(),
                    question.topic,
                    question.learning_objective,
                    question.ase_standard,
                    question.points,
                    question.question_data_json(),
                    question.explanation,
                    now,
                ],
            )
            .context("failed to insert question")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::model::{
        Category, Difficulty, GenerationTask, Question, QuestionBank, QuestionData, QuestionType,
    };
    use crate::store::QuestionStore;

    fn bank(category: Category) -> QuestionBank {
        QuestionBank::for_task(&GenerationTask {
            category,
            question_type: QuestionType::TrueFalse,
            difficulty: Difficulty::Hard,
            count: 1,
        })
    }

    fn question() -> Question {
        Question {
            question_type: QuestionType::TrueFalse,
            question_text: "Diesel engines use spark plugs; it's true?".to_string(),
            difficulty: Difficulty::Hard,
            topic: "Ignition".to_string(),
            learning_objective: String::new(),
            ase_standard: "T2.A.1".to_string(),
            question_data: QuestionData::TrueFalse { correct: false },
            explanation: "Compression ignition.".to_string(),
            points: 1,
        }
    }

    #[test]
    fn bank_lookup_is_idempotent() {
        let mut store = SqliteStore::in_memory().expect("store");

        let first = store.get_or_create_bank(&bank(Category::Diesel)).expect("create");
        let second = store.get_or_create_bank(&bank(Category::Diesel)).expect("lookup");
        let other = store.get_or_create_bank(&bank(Category::Brakes)).expect("create other");

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn questions_are_stored_with_quotes_intact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = SqliteStore::open(&dir.path().join("db").join("questions.sqlite"))
            .expect("store");

        let bank_id = store.get_or_create_bank(&bank(Category::Diesel)).expect("bank");
        store.insert_question(bank_id, &question()).expect("insert");
        assert_eq!(store.question_count().expect("count"), 1);

        let (text, data): (String, String) = store
            .connection
            .query_row(
                "SELECT question_text, question_data FROM questions LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(text, "Diesel engines use spark plugs; it's true?");
        assert_eq!(data, r#"{"correct":false}"#);
    }

    #[test]
    fn unknown_bank_is_rejected_by_foreign_key() {
        let mut store = SqliteStore::in_memory().expect("store");
        assert!(store.insert_question(999, &question()).is_err());
    }
}
