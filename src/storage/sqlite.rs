//! SQLite document store
//!
//! This module provides a SQLite-based implementation of the StorageService trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageService, StorageResult};
use crate::storage::{ParsedRecord, StoredDocument};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite document backend
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens or creates a document database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored documents
    pub fn document_count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn load(&self, url: &str) -> StorageResult<Option<StoredDocument>> {
        let row = self
            .conn()
            .query_row(
                "SELECT url, raw_content, raw_saved_at, parsed_data, parsed_saved_at
                 FROM documents WHERE url = ?1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((url, raw_content, raw_saved_at, parsed_json, parsed_saved_at)) = row else {
            return Ok(None);
        };

        let parsed = match parsed_json {
            Some(json) => Some(serde_json::from_str::<ParsedRecord>(&json)?),
            None => None,
        };

        Ok(Some(StoredDocument {
            url,
            raw_content,
            raw_saved_at,
            parsed,
            parsed_saved_at,
        }))
    }
}

#[async_trait]
impl StorageService for SqliteDocumentStore {
    async fn save_raw_content(&self, url: &str, content: &[u8]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO documents (url, raw_content, raw_saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET
                raw_content = excluded.raw_content,
                raw_saved_at = excluded.raw_saved_at",
            params![url, content, now],
        )?;
        tracing::debug!("Stored {} raw bytes for {}", content.len(), url);
        Ok(())
    }

    async fn save_parsed_data(&self, url: &str, parsed: &ParsedRecord) -> StorageResult<()> {
        let json = serde_json::to_string(parsed)?;
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO documents (url, parsed_data, parsed_saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET
                parsed_data = excluded.parsed_data,
                parsed_saved_at = excluded.parsed_saved_at",
            params![url, json, now],
        )?;
        Ok(())
    }

    async fn get_raw_content(&self, url: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.load(url)?.and_then(|doc| doc.raw_content))
    }

    async fn get_parsed_data(&self, url: &str) -> StorageResult<Option<ParsedRecord>> {
        Ok(self.load(url)?.and_then(|doc| doc.parsed))
    }

    async fn get_document(&self, url: &str) -> StorageResult<Option<StoredDocument>> {
        self.load(url)
    }
}
