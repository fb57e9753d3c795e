// Saved-file persistence: named source files kept outside the shared document.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection};
use tandem_common::types::CodeFile;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS code_files (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    language    TEXT NOT NULL,
    content     TEXT NOT NULL,
    created     TEXT NOT NULL
);
"#;

/// Key-value store for saved files, keyed by file id.
pub trait FileStore: Send + Sync {
    /// Insert or overwrite the file with the same id.
    fn put(&self, file: &CodeFile) -> Result<()>;

    /// Every stored file, oldest first.
    fn get_all(&self) -> Result<Vec<CodeFile>>;

    /// Returns whether a file was removed.
    fn delete(&self, id: Uuid) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<Vec<CodeFile>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> Result<MutexGuard<'_, Vec<CodeFile>>> {
        self.files.lock().map_err(|_| anyhow!("file store lock poisoned"))
    }
}

impl FileStore for MemoryFileStore {
    fn put(&self, file: &CodeFile) -> Result<()> {
        let mut files = self.files()?;
        match files.iter_mut().find(|existing| existing.id == file.id) {
            Some(existing) => *existing = file.clone(),
            None => files.push(file.clone()),
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<CodeFile>> {
        let mut files = self.files()?.clone();
        files.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(files)
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let mut files = self.files()?;
        let before = files.len();
        files.retain(|file| file.id != id);
        Ok(files.len() != before)
    }
}

/// One row per file in an embedded SQLite database.
pub struct SqliteFileStore {
    conn: Mutex<Connection>,
}

impl SqliteFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory `{}`", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open file store `{}`", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("failed to open in-memory file store")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).context("failed to apply file store schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("file store connection lock poisoned"))
    }
}

impl FileStore for SqliteFileStore {
    fn put(&self, file: &CodeFile) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO code_files (id, name, language, content, created) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                     name = excluded.name, language = excluded.language, \
                     content = excluded.content, created = excluded.created",
                params![file.id.to_string(), file.name, file.language, file.content, file.created.to_rfc3339()],
            )
            .context("failed to upsert code_files row")?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<CodeFile>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, language, content, created \
                 FROM code_files \
                 ORDER BY created ASC, id ASC",
            )
            .context("failed to prepare code_files query")?;
        let rows = stmt.query_map([], row_to_file).context("failed to query code_files")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect code_files rows")
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM code_files WHERE id = ?1", params![id.to_string()])
            .context("failed to delete code_files row")?;
        Ok(removed > 0)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeFile> {
    let id: String = row.get(0)?;
    let created: String = row.get(4)?;
    Ok(CodeFile {
        id: Uuid::parse_str(&id)
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error)))?,
        name: row.get(1)?,
        language: row.get(2)?,
        content: row.get(3)?,
        created: DateTime::parse_from_rfc3339(&created)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(error)))?,
    })
}
