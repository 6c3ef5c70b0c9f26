//! Database schema for the document store

/// SQL schema for the document database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawled URL; raw and parsed halves are written independently
CREATE TABLE IF NOT EXISTS documents (
    url TEXT PRIMARY KEY,
    raw_content BLOB,
    raw_saved_at TEXT,
    parsed_data TEXT,
    parsed_saved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_parsed_saved_at ON documents(parsed_saved_at);
"#;

/// Initializes the document schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
