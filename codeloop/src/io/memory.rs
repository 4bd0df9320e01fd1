//! Append-only memory log backed by a single SQLite table.
//!
//! Every completed iteration is stored as one text entry. Recall returns the
//! most recent entries re-ordered oldest first, so the model reads them in the
//! order they happened.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL
);";

/// Thin wrapper around a rusqlite connection.
///
/// The connection is not `Sync`; one orchestrator owns the log.
pub struct MemoryLog {
    conn: Connection,
}

impl MemoryLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open memory store {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Open a log that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("create operations table")?;
        Ok(Self { conn })
    }

    /// Discard every entry. Safe to call on a fresh store.
    pub fn reset(&self) -> Result<()> {
        debug!("resetting memory log");
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS operations;\n{SCHEMA}"))
            .context("reset operations table")
    }

    /// Append one entry; it is committed when this returns.
    pub fn append(&self, text: &str) -> Result<()> {
        self.conn
            .execute("INSERT INTO operations (text) VALUES (?1)", params![text])
            .context("insert memory entry")?;
        debug!(bytes = text.len(), "memory entry appended");
        Ok(())
    }

    /// Return the last `k` entries, oldest first, separated by a blank line.
    pub fn recall(&self, k: usize) -> Result<String> {
        if k == 0 {
            return Ok(String::new());
        }
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT text FROM operations ORDER BY id DESC LIMIT ?1")
            .context("prepare recall")?;
        let mut entries = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .context("query recall")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read recall rows")?;
        entries.reverse();

        Ok(entries
            .iter()
            .map(|entry| entry.trim())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))
            .context("count memory entries")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
