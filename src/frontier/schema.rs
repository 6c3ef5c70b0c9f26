//! Database schema for the shared frontier store
//!
//! Every worker process opens the same database file. Jobs, the dead-letter
//! set, the queue flags and the control-signal log all live here.

/// SQL schema for the frontier database
pub const SCHEMA_SQL: &str = r#"
-- Partitioned job queue; dead letters stay here with state 'failed'
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    partition TEXT NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    original_domain TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts_made INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    available_at INTEGER NOT NULL,
    claimed_at INTEGER,
    last_error TEXT,
    created_at TEXT NOT NULL,
    failed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(partition, state, available_at, id);
CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);

-- Cross-process flags (stopped, paused)
CREATE TABLE IF NOT EXISTS queue_flags (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

-- Append-only control-plane log relayed to every worker process
CREATE TABLE IF NOT EXISTS control_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    origin TEXT NOT NULL,
    payload TEXT NOT NULL,
    published_at TEXT NOT NULL
);

-- Most recent processing errors, newest first when read
CREATE TABLE IF NOT EXISTS crawl_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    error TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

/// Initializes the frontier schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
