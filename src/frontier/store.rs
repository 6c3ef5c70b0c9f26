//! SQLite-backed frontier store
//!
//! The store is the only shared state between worker processes. Claims run
//! inside `BEGIN IMMEDIATE` transactions so two processes can never take the
//! same job. Timestamps that drive scheduling are passed in by the caller as
//! epoch milliseconds.

use crate::frontier::schema::initialize_schema;
use crate::frontier::{
    ClaimedJob, CrawlErrorEntry, CrawlJob, DeadLetter, JobCounts, JobId, QueuedJob,
};
use crate::state::JobState;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors raised by the frontier store
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown job state: {0}")]
    UnknownState(String),
}

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// What happened to a job reported as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Put back in the queue, available again after `delay_ms`
    Retrying { attempt: u32, delay_ms: u64 },

    /// Attempts exhausted; moved to the dead-letter set
    DeadLettered { attempts: u32 },

    /// The job no longer exists (emptied or stopped underneath the worker)
    Missing,
}

/// A control signal as recorded in the log
#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub id: i64,
    pub origin: String,
    pub payload: String,
}

/// Frontier store shared by every worker process
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Opens or creates the frontier database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteQueueStore)` - Successfully opened/created database
    /// * `Err(QueueError)` - Failed to open database
    pub fn open(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;

        // Several processes share this file
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store, visible to this process only
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Jobs =====

    /// Appends a waiting job to a partition
    pub fn enqueue(
        &self,
        partition: &str,
        job: &CrawlJob,
        max_attempts: u32,
        now_ms: i64,
    ) -> QueueResult<JobId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO jobs (partition, url, depth, original_domain, state, attempts_made,
                               max_attempts, available_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
            params![
                partition,
                job.url,
                job.depth,
                job.original_domain,
                JobState::Waiting.to_db_string(),
                max_attempts,
                now_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically takes the oldest available job of a partition
    pub fn claim(&self, partition: &str, now_ms: i64) -> QueueResult<Option<ClaimedJob>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = tx
            .query_row(
                "SELECT id, url, depth, original_domain, attempts_made, max_attempts
                 FROM jobs
                 WHERE partition = ?1 AND state = ?2 AND available_at <= ?3
                 ORDER BY available_at, id
                 LIMIT 1",
                params![partition, JobState::Waiting.to_db_string(), now_ms],
                |row| {
                    Ok(ClaimedJob {
                        id: row.get(0)?,
                        partition: partition.to_string(),
                        job: CrawlJob {
                            url: row.get(1)?,
                            depth: row.get(2)?,
                            original_domain: row.get(3)?,
                        },
                        attempts_made: row.get(4)?,
                        max_attempts: row.get(5)?,
                    })
                },
            )
            .optional()?;

        if let Some(ref job) = claimed {
            tx.execute(
                "UPDATE jobs SET state = ?1, claimed_at = ?2 WHERE id = ?3",
                params![JobState::Active.to_db_string(), now_ms, job.id],
            )?;
        }

        tx.commit()?;
        Ok(claimed)
    }

    /// Removes a finished job. Returns false when the job no longer exists.
    pub fn complete(&self, id: JobId) -> QueueResult<bool> {
        let removed = self.conn().execute(
            "DELETE FROM jobs WHERE id = ?1 AND state = ?2",
            params![id, JobState::Active.to_db_string()],
        )?;
        Ok(removed > 0)
    }

    /// Records a failed attempt
    ///
    /// The retry delay is `backoff_ms × 2^(attempt - 1)`. When the attempt
    /// count reaches the job's maximum, the job becomes a dead letter.
    pub fn fail(
        &self,
        id: JobId,
        error: &str,
        backoff_ms: u64,
        now_ms: i64,
    ) -> QueueResult<FailOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(u32, u32)> = tx
            .query_row(
                "SELECT attempts_made, max_attempts FROM jobs WHERE id = ?1 AND state = ?2",
                params![id, JobState::Active.to_db_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((attempts_made, max_attempts)) = row else {
            return Ok(FailOutcome::Missing);
        };

        let attempt = attempts_made + 1;
        let outcome = if attempt >= max_attempts {
            tx.execute(
                "UPDATE jobs SET state = ?1, attempts_made = ?2, last_error = ?3,
                                 claimed_at = NULL, failed_at = ?4
                 WHERE id = ?5",
                params![
                    JobState::Failed.to_db_string(),
                    attempt,
                    error,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )?;
            FailOutcome::DeadLettered { attempts: attempt }
        } else {
            let delay_ms = retry_delay_ms(backoff_ms, attempt);
            tx.execute(
                "UPDATE jobs SET state = ?1, attempts_made = ?2, last_error = ?3,
                                 claimed_at = NULL, available_at = ?4
                 WHERE id = ?5",
                params![
                    JobState::Waiting.to_db_string(),
                    attempt,
                    error,
                    now_ms.saturating_add(delay_ms as i64),
                    id
                ],
            )?;
            FailOutcome::Retrying { attempt, delay_ms }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Returns active jobs claimed before `claimed_before_ms` to the queue
    ///
    /// Used after a worker process died mid-job. The attempt count is left
    /// untouched.
    pub fn requeue_stalled(&self, claimed_before_ms: i64, now_ms: i64) -> QueueResult<usize> {
        let requeued = self.conn().execute(
            "UPDATE jobs SET state = ?1, claimed_at = NULL, available_at = ?2
             WHERE state = ?3 AND claimed_at < ?4",
            params![
                JobState::Waiting.to_db_string(),
                now_ms,
                JobState::Active.to_db_string(),
                claimed_before_ms
            ],
        )?;
        Ok(requeued)
    }

    /// Deletes waiting and delayed jobs, plus active ones when asked
    ///
    /// Dead letters are always kept.
    pub fn remove_pending(&self, include_active: bool) -> QueueResult<usize> {
        let conn = self.conn();
        let removed = if include_active {
            conn.execute(
                "DELETE FROM jobs WHERE state IN (?1, ?2)",
                params![
                    JobState::Waiting.to_db_string(),
                    JobState::Active.to_db_string()
                ],
            )?
        } else {
            conn.execute(
                "DELETE FROM jobs WHERE state = ?1",
                params![JobState::Waiting.to_db_string()],
            )?
        };
        Ok(removed)
    }

    /// Job counts across all partitions
    pub fn counts(&self, now_ms: i64) -> QueueResult<JobCounts> {
        let conn = self.conn();
        let counts = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN state = ?1 AND available_at <= ?4 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = ?1 AND available_at > ?4 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = ?3 THEN 1 ELSE 0 END), 0)
             FROM jobs",
            params![
                JobState::Waiting.to_db_string(),
                JobState::Active.to_db_string(),
                JobState::Failed.to_db_string(),
                now_ms
            ],
            |row| {
                Ok(JobCounts {
                    waiting: row.get::<_, i64>(0)? as u64,
                    delayed: row.get::<_, i64>(1)? as u64,
                    active: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(counts)
    }

    /// Most recent dead letters first
    pub fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, partition, url, depth, original_domain, attempts_made, last_error, failed_at
             FROM jobs WHERE state = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let letters = stmt
            .query_map(
                params![JobState::Failed.to_db_string(), limit as i64],
                |row| {
                    Ok(DeadLetter {
                        id: row.get(0)?,
                        partition: row.get(1)?,
                        job: CrawlJob {
                            url: row.get(2)?,
                            depth: row.get(3)?,
                            original_domain: row.get(4)?,
                        },
                        attempts_made: row.get(5)?,
                        last_error: row.get(6)?,
                        failed_at: row.get(7)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(letters)
    }

    /// Pending jobs in dequeue order
    pub fn pending_jobs(&self, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, partition, url, depth, original_domain, state, attempts_made, available_at
             FROM jobs WHERE state IN (?1, ?2) ORDER BY available_at, id LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(
                params![
                    JobState::Waiting.to_db_string(),
                    JobState::Active.to_db_string(),
                    limit as i64
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        CrawlJob {
                            url: row.get(2)?,
                            depth: row.get(3)?,
                            original_domain: row.get(4)?,
                        },
                        row.get::<_, String>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, partition, job, state, attempts_made, available_at)| {
                let state = JobState::from_db_string(&state)
                    .ok_or(QueueError::UnknownState(state))?;
                Ok(QueuedJob {
                    id,
                    partition,
                    job,
                    state,
                    attempts_made,
                    available_at_ms: available_at,
                })
            })
            .collect()
    }

    // ===== Flags =====

    /// Sets or clears a cross-process flag
    pub fn set_flag(&self, name: &str, value: bool) -> QueueResult<()> {
        self.conn().execute(
            "INSERT INTO queue_flags (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value as i64],
        )?;
        Ok(())
    }

    /// Reads a flag; unset flags are false
    pub fn flag(&self, name: &str) -> QueueResult<bool> {
        let value: Option<i64> = self
            .conn()
            .query_row(
                "SELECT value FROM queue_flags WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) != 0)
    }

    // ===== Control signal log =====

    /// Appends a signal to the log and returns its id
    ///
    /// Only the newest `keep` signals are retained. Ids are never reused, so
    /// relays that fell behind the trimmed rows resume from the oldest kept one.
    pub fn append_signal(
        &self,
        action: &str,
        origin: &str,
        payload: &str,
        keep: usize,
    ) -> QueueResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO control_signals (action, origin, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![action, origin, payload, Utc::now().to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "DELETE FROM control_signals WHERE id <= ?1 - ?2",
            params![id, keep as i64],
        )?;
        Ok(id)
    }

    /// Signals appended after `after_id`, oldest first
    pub fn signals_after(&self, after_id: i64) -> QueueResult<Vec<StoredSignal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, origin, payload FROM control_signals WHERE id > ?1 ORDER BY id",
        )?;
        let signals = stmt
            .query_map(params![after_id], |row| {
                Ok(StoredSignal {
                    id: row.get(0)?,
                    origin: row.get(1)?,
                    payload: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(signals)
    }

    /// Id of the newest signal, or 0 for an empty log
    pub fn latest_signal_id(&self) -> QueueResult<i64> {
        let id: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(id) FROM control_signals", [], |row| row.get(0))?;
        Ok(id.unwrap_or(0))
    }

    // ===== Error log =====

    /// Records a processing error, keeping only the newest `keep` entries
    pub fn record_error(&self, url: &str, error: &str, attempt: u32, keep: usize) -> QueueResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO crawl_errors (url, error, attempt, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![url, error, attempt, Utc::now().to_rfc3339()],
        )?;
        conn.execute(
            "DELETE FROM crawl_errors WHERE id NOT IN
                (SELECT id FROM crawl_errors ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(())
    }

    /// Newest errors first
    pub fn recent_errors(&self, limit: usize) -> QueueResult<Vec<CrawlErrorEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url, error, attempt, recorded_at FROM crawl_errors ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(CrawlErrorEntry {
                    url: row.get(0)?,
                    error: row.get(1)?,
                    attempt: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Exponential retry delay: `base × 2^(attempt - 1)`
pub fn retry_delay_ms(backoff_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    backoff_ms.saturating_mul(1u64 << exponent)
}
