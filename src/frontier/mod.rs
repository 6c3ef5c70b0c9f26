//! Frontier: the durable, partitioned job queue and its control plane
//!
//! Jobs are routed to `partition-{i}` by a stable hash of their original
//! domain, so a domain always lands on the same partition. Each partition is
//! a FIFO with retry backoff; jobs that exhaust their attempts are kept as
//! dead letters.
//!
//! The queue and the `stopped`/`paused` flags live in a SQLite database that
//! every worker process opens. Pause, resume, stop and empty also publish a
//! [`ControlSignal`] so every process cancels or resumes its in-flight work.

mod control;
mod schema;
mod store;

pub use control::{ControlAction, ControlPlane, ControlSignal};
pub use store::{retry_delay_ms, FailOutcome, QueueError, QueueResult, SqliteQueueStore};

use crate::config::Config;
use crate::dedup::fnv1a_64;
use crate::state::JobState;
use crate::url::domain_of;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FLAG_STOPPED: &str = "stopped";
const FLAG_PAUSED: &str = "paused";

/// Number of processing errors kept in the error log
pub const ERROR_LOG_CAPACITY: usize = 100;

/// Identifier of a job in the frontier store
pub type JobId = i64;

/// A URL waiting to be crawled
///
/// Serialized as `{"url": ..., "depth": ..., "originalDomain": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    pub url: String,
    pub depth: u32,
    pub original_domain: String,
}

/// A job taken off a partition by a worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub partition: String,
    pub job: CrawlJob,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// A job that exhausted its attempts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: JobId,
    pub partition: String,
    pub job: CrawlJob,
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub failed_at: Option<String>,
}

/// A processing error kept for operators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlErrorEntry {
    pub url: String,
    pub error: String,
    pub attempt: u32,
    pub recorded_at: String,
}

/// A waiting or active job, as listed for operators
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub partition: String,
    pub job: CrawlJob,
    pub state: JobState,
    pub attempts_made: u32,
    pub available_at_ms: i64,
}

/// Job counts across all partitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Ready to be claimed
    pub waiting: u64,
    /// Waiting out a retry backoff
    pub delayed: u64,
    pub active: u64,
    /// Dead letters
    pub failed: u64,
}

impl JobCounts {
    /// Jobs that will still be processed
    pub fn pending(&self) -> u64 {
        self.waiting + self.delayed + self.active
    }
}

/// Which consumers a pause or resume applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlScope {
    /// Only this process stops claiming
    Local,
    /// Every process sharing the frontier store
    Global,
}

/// Retry schedule for failed jobs
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
        }
    }
}

/// Frontier tuning taken from the configuration
#[derive(Debug, Clone, Copy)]
pub struct FrontierSettings {
    pub partitions: u32,
    pub max_depth: u32,
    pub retry: RetryPolicy,
}

impl FrontierSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            partitions: config.crawler.queue_partitions.max(1),
            max_depth: config.crawler.max_depth,
            retry: RetryPolicy {
                max_attempts: config.queue.max_attempts.max(1),
                backoff_ms: config.queue.backoff_ms,
            },
        }
    }
}

/// Name of the queue for a partition index
pub fn partition_name(index: u32) -> String {
    format!("partition-{}", index)
}

/// Stable partition index for a domain
///
/// Domains are compared case-insensitively.
pub fn partition_index(domain: &str, partitions: u32) -> u32 {
    let hash = fnv1a_64(domain.to_lowercase().as_bytes());
    (hash % u64::from(partitions.max(1))) as u32
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Handle to the shared frontier
///
/// Construct once per process and share behind an `Arc`.
pub struct Frontier {
    store: Arc<SqliteQueueStore>,
    control: Arc<ControlPlane>,
    settings: FrontierSettings,
    local_paused: AtomicBool,
}

impl Frontier {
    /// Creates a frontier over an opened store
    pub fn new(store: Arc<SqliteQueueStore>, settings: FrontierSettings) -> QueueResult<Self> {
        let control = Arc::new(ControlPlane::new(store.clone())?);
        Ok(Self {
            store,
            control,
            settings,
            local_paused: AtomicBool::new(false),
        })
    }

    /// Opens the frontier database named in the configuration
    pub fn open(config: &Config) -> QueueResult<Self> {
        let store = SqliteQueueStore::open(Path::new(&config.queue.database_path))?;
        Self::new(Arc::new(store), FrontierSettings::from_config(config))
    }

    /// Creates a frontier backed by a private in-memory store
    pub fn in_memory(settings: FrontierSettings) -> QueueResult<Self> {
        Self::new(Arc::new(SqliteQueueStore::open_in_memory()?), settings)
    }

    pub fn settings(&self) -> &FrontierSettings {
        &self.settings
    }

    pub fn partition_count(&self) -> u32 {
        self.settings.partitions
    }

    /// Partition index a domain maps to
    pub fn partition_for(&self, domain: &str) -> u32 {
        partition_index(domain, self.settings.partitions)
    }

    /// The control plane shared by this process
    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Adds a URL to its domain's partition
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL to crawl
    /// * `depth` - Link distance from the seed
    /// * `original_domain` - Domain of the seed this URL descends from;
    ///   derived from the URL host when absent
    ///
    /// # Returns
    ///
    /// * `Ok(Some(id))` - The job was enqueued
    /// * `Ok(None)` - Rejected because `depth` exceeds the maximum depth, or
    ///   because the frontier is stopped and `url` is a discovered link
    /// * `Err(FleetError)` - The URL has no host, or the store failed
    pub fn add_url(
        &self,
        url: &str,
        depth: u32,
        original_domain: Option<&str>,
    ) -> crate::Result<Option<JobId>> {
        if depth > self.settings.max_depth {
            tracing::debug!("Not enqueuing {} at depth {} (max {})", url, depth, self.settings.max_depth);
            return Ok(None);
        }

        // Only seeds may enter a stopped frontier
        if depth > 0 && self.is_stopped()? {
            tracing::debug!("Not enqueuing {} (frontier stopped)", url);
            return Ok(None);
        }

        let original_domain = match original_domain {
            Some(domain) if !domain.is_empty() => domain.to_lowercase(),
            _ => domain_of(url)?,
        };

        let partition = partition_name(self.partition_for(&original_domain));
        let job = CrawlJob {
            url: url.to_string(),
            depth,
            original_domain,
        };

        let id = self
            .store
            .enqueue(&partition, &job, self.settings.retry.max_attempts, now_ms())?;
        tracing::debug!("Enqueued {} on {} (depth {})", job.url, partition, depth);
        Ok(Some(id))
    }

    /// Puts a job back on its partition unchanged
    ///
    /// Nothing is re-queued into a stopped frontier.
    pub fn resubmit(&self, job: &CrawlJob) -> crate::Result<Option<JobId>> {
        if self.is_stopped()? {
            tracing::debug!("Not re-queueing {} (frontier stopped)", job.url);
            return Ok(None);
        }
        self.add_url(&job.url, job.depth, Some(&job.original_domain))
    }

    /// Claims the next available job of a partition
    ///
    /// Returns None while the frontier is paused or stopped.
    pub fn claim(&self, partition: u32) -> QueueResult<Option<ClaimedJob>> {
        if self.is_paused()? || self.is_stopped()? {
            return Ok(None);
        }
        self.store.claim(&partition_name(partition), now_ms())
    }

    /// Removes a successfully processed job
    ///
    /// A job that disappeared meanwhile (emptied or stopped) is not an error.
    pub fn complete(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        if !self.store.complete(claimed.id)? {
            tracing::debug!("Job {} for {} was already removed", claimed.id, claimed.job.url);
        }
        Ok(())
    }

    /// Records a failed attempt, scheduling a retry or dead-lettering the job
    pub fn fail(&self, claimed: &ClaimedJob, reason: &str) -> QueueResult<FailOutcome> {
        let outcome = self
            .store
            .fail(claimed.id, reason, self.settings.retry.backoff_ms, now_ms())?;

        match outcome {
            FailOutcome::Retrying { attempt, delay_ms } => {
                tracing::info!(
                    "Retrying {} in {}ms (attempt {}): {}",
                    claimed.job.url,
                    delay_ms,
                    attempt,
                    reason
                );
            }
            FailOutcome::DeadLettered { attempts } => {
                tracing::warn!(
                    "Dead-lettered {} after {} attempts: {}",
                    claimed.job.url,
                    attempts,
                    reason
                );
            }
            FailOutcome::Missing => {
                tracing::debug!("Job {} for {} was already removed", claimed.id, claimed.job.url);
            }
        }

        Ok(outcome)
    }

    /// Returns jobs held by workers that died back to their partitions
    pub fn recover_stalled(&self, timeout: Duration) -> QueueResult<usize> {
        let now = now_ms();
        let cutoff = now.saturating_sub(timeout.as_millis() as i64);
        let requeued = self.store.requeue_stalled(cutoff, now)?;
        if requeued > 0 {
            tracing::info!("Requeued {} stalled jobs", requeued);
        }
        Ok(requeued)
    }

    // ===== Control =====

    /// Stops new claims without aborting the store
    ///
    /// `Local` affects only this process; `Global` sets the shared flag.
    pub fn pause(&self, scope: ControlScope) -> QueueResult<()> {
        match scope {
            ControlScope::Local => self.local_paused.store(true, Ordering::SeqCst),
            ControlScope::Global => self.store.set_flag(FLAG_PAUSED, true)?,
        }
        self.control.publish(ControlSignal::new(ControlAction::Pause))
    }

    /// Resumes claiming and clears the stopped flag
    pub fn resume(&self, scope: ControlScope) -> QueueResult<()> {
        self.local_paused.store(false, Ordering::SeqCst);
        if scope == ControlScope::Global {
            self.store.set_flag(FLAG_PAUSED, false)?;
        }
        self.store.set_flag(FLAG_STOPPED, false)?;
        self.control.publish(ControlSignal::new(ControlAction::Resume))
    }

    /// Sets the persistent stopped flag and drops every pending job
    ///
    /// Dead letters are kept. Only [`Frontier::resume`] clears the flag.
    pub fn stop(&self) -> QueueResult<()> {
        self.store.set_flag(FLAG_STOPPED, true)?;
        let removed = self.store.remove_pending(true)?;
        tracing::info!("Frontier stopped, {} jobs removed", removed);
        self.control.publish(ControlSignal::new(ControlAction::Stop))
    }

    /// Drops every waiting and delayed job
    pub fn empty(&self) -> QueueResult<()> {
        let removed = self.store.remove_pending(false)?;
        tracing::info!("Frontier emptied, {} jobs removed", removed);
        self.control.publish(ControlSignal::new(ControlAction::Empty))
    }

    /// True when paused locally or globally
    pub fn is_paused(&self) -> QueueResult<bool> {
        if self.local_paused.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.store.flag(FLAG_PAUSED)
    }

    pub fn is_stopped(&self) -> QueueResult<bool> {
        self.store.flag(FLAG_STOPPED)
    }

    // ===== Inspection =====

    pub fn counts(&self) -> QueueResult<JobCounts> {
        self.store.counts(now_ms())
    }

    pub fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        self.store.dead_letters(limit)
    }

    pub fn waiting_jobs(&self, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        self.store.pending_jobs(limit)
    }

    /// Adds an entry to the capped error log
    pub fn record_error(&self, url: &str, error: &str, attempt: u32) -> QueueResult<()> {
        self.store.record_error(url, error, attempt, ERROR_LOG_CAPACITY)
    }

    /// Newest processing errors first
    pub fn recent_errors(&self, limit: usize) -> QueueResult<Vec<CrawlErrorEntry>> {
        self.store.recent_errors(limit)
    }
}
