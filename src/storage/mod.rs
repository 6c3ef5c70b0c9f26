//! Storage module for persisting crawled documents
//!
//! The fetch pipeline hands every kept page to a [`StorageService`]: the raw
//! response bytes and the parsed title, links and extracted data, both keyed
//! by URL. [`SqliteDocumentStore`] is the bundled backend.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteDocumentStore;
pub use traits::{StorageError, StorageResult, StorageService};

use crate::crawler::ParsedResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opens or creates the document store at a path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteDocumentStore> {
    SqliteDocumentStore::open(path)
}

/// Parsed half of a stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRecord {
    pub title: String,
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<&ParsedResult> for ParsedRecord {
    fn from(result: &ParsedResult) -> Self {
        Self {
            title: result.title.clone(),
            links: result.links.clone(),
            extracted_data: result.extracted_data.clone(),
        }
    }
}

/// Everything stored for one URL
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub url: String,
    pub raw_content: Option<Vec<u8>>,
    pub raw_saved_at: Option<String>,
    pub parsed: Option<ParsedRecord>,
    pub parsed_saved_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_parsed_result() {
        let result = ParsedResult {
            url: "https://example.com/".to_string(),
            title: "Home".to_string(),
            links: vec!["https://example.com/a".to_string()],
            text: "body text".to_string(),
            extracted_data: None,
            content_type: Some("text/html".to_string()),
        };

        let record = ParsedRecord::from(&result);
        assert_eq!(record.title, "Home");
        assert_eq!(record.links, result.links);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("extractedData").is_none());
        assert!(json.get("text").is_none());
    }
}
