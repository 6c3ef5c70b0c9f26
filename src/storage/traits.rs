//! Storage traits and error types
//!
//! This module defines the collaborator interface the fetch pipeline persists
//! documents through, and the errors a backend can report.

use crate::storage::{ParsedRecord, StoredDocument};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Document persistence keyed by URL
///
/// Writes for a URL that is already stored replace the previous value.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Stores the raw response body of a page
    async fn save_raw_content(&self, url: &str, content: &[u8]) -> StorageResult<()>;

    /// Stores the parsed title, links and extracted data of a page
    async fn save_parsed_data(&self, url: &str, parsed: &ParsedRecord) -> StorageResult<()>;

    /// Returns the raw body stored for a URL
    async fn get_raw_content(&self, url: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns the parsed data stored for a URL
    async fn get_parsed_data(&self, url: &str) -> StorageResult<Option<ParsedRecord>>;

    /// Returns everything stored for a URL
    async fn get_document(&self, url: &str) -> StorageResult<Option<StoredDocument>>;
}
