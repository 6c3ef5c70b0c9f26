//! Worker pool
//!
//! Runs `concurrency` fetch tasks for every partition this process owns. Each
//! task claims a job, hands it to the [`FetchPipeline`] with its own
//! cancellation token, and settles the outcome with the frontier.
//!
//! One listener task subscribes to the control plane. Pause, stop and empty
//! signals cancel the token of every in-flight job, so the pipeline aborts
//! and re-queues them.

use crate::config::Config;
use crate::crawler::{FetchPipeline, JobOutcome};
use crate::frontier::{ClaimedJob, ControlSignal, Frontier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Worker pool tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Partition indexes this process claims from
    pub partitions: Vec<u32>,

    /// Concurrent fetch tasks per partition
    pub concurrency: u32,

    /// Idle wait between empty claims, also the control relay interval
    pub poll_interval: Duration,

    /// Age after which an active job is considered abandoned
    pub stall_timeout: Duration,
}

impl WorkerSettings {
    /// Settings from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `partitions` - Partitions to own; every partition when None
    pub fn from_config(config: &Config, partitions: Option<Vec<u32>>) -> Self {
        let partition_count = config.crawler.queue_partitions.max(1);
        let partitions = partitions
            .map(|owned| owned.into_iter().filter(|p| *p < partition_count).collect())
            .unwrap_or_else(|| (0..partition_count).collect());

        Self {
            partitions,
            concurrency: config.crawler.fetcher_concurrency.max(1),
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms.max(1)),
            stall_timeout: Duration::from_secs(config.queue.stall_timeout_secs),
        }
    }
}

/// Cancellation tokens of the jobs currently being processed
#[derive(Default)]
struct ActiveJobs {
    next_id: AtomicU64,
    tokens: Mutex<HashMap<u64, CancellationToken>>,
}

impl ActiveJobs {
    fn register(&self, token: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, token);
        id
    }

    fn remove(&self, id: u64) {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Pool of fetch tasks over this process's partitions
pub struct WorkerPool {
    pipeline: Arc<FetchPipeline>,
    settings: WorkerSettings,
    active: Arc<ActiveJobs>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<FetchPipeline>, settings: WorkerSettings) -> Self {
        Self {
            pipeline,
            settings,
            active: Arc::new(ActiveJobs::default()),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Number of jobs being processed right now
    pub fn active_jobs(&self) -> usize {
        self.active.len()
    }

    /// Runs until `shutdown` is cancelled
    ///
    /// Jobs left active by a crashed worker are recovered first. On shutdown,
    /// in-flight jobs are cancelled and re-queued before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> crate::Result<()> {
        let frontier = Arc::clone(self.pipeline.frontier());
        frontier.recover_stalled(self.settings.stall_timeout)?;

        let relay = Arc::clone(frontier.control())
            .spawn_relay(self.settings.poll_interval, shutdown.clone());
        let listener = tokio::spawn(listen_for_signals(
            frontier.control().subscribe(),
            Arc::clone(&self.active),
            shutdown.clone(),
        ));

        tracing::info!(
            "Starting {} workers on partitions {:?}",
            self.settings.partitions.len() as u32 * self.settings.concurrency,
            self.settings.partitions
        );

        let mut workers = JoinSet::new();
        for &partition in &self.settings.partitions {
            for _ in 0..self.settings.concurrency {
                workers.spawn(worker_loop(
                    Arc::clone(&self.pipeline),
                    Arc::clone(&self.active),
                    partition,
                    self.settings.poll_interval,
                    shutdown.clone(),
                ));
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let _ = relay.await;
        let _ = listener.await;
        tracing::info!("All workers stopped");
        Ok(())
    }
}

/// Cancels every in-flight job on pause, stop and empty
async fn listen_for_signals(
    mut signals: broadcast::Receiver<ControlSignal>,
    active: Arc<ActiveJobs>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = signals.recv() => received,
        };

        match received {
            Ok(signal) if signal.action.cancels_in_flight() => {
                let cancelled = active.cancel_all();
                tracing::info!("Received {} signal, cancelled {} active jobs", signal.action, cancelled);
            }
            Ok(signal) => {
                tracing::info!("Received {} signal", signal.action);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // A missed signal may have been a pause or stop
                let cancelled = active.cancel_all();
                tracing::warn!(
                    "Missed {} control signals, cancelled {} active jobs",
                    skipped,
                    cancelled
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn worker_loop(
    pipeline: Arc<FetchPipeline>,
    active: Arc<ActiveJobs>,
    partition: u32,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let frontier = Arc::clone(pipeline.frontier());

    while !shutdown.is_cancelled() {
        let claimed = match frontier.claim(partition) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                idle(poll_interval, &shutdown).await;
                continue;
            }
            Err(e) => {
                tracing::warn!("Claim on partition {} failed: {}", partition, e);
                idle(poll_interval, &shutdown).await;
                continue;
            }
        };

        let token = shutdown.child_token();
        let id = active.register(token.clone());
        let outcome = pipeline.process(&claimed.job, &token).await;
        active.remove(id);

        settle(&frontier, &claimed, outcome);
    }
}

async fn idle(poll_interval: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(poll_interval) => {}
    }
}

/// Reports a job outcome to the frontier
fn settle(frontier: &Frontier, claimed: &ClaimedJob, outcome: JobOutcome) {
    let result = match outcome {
        JobOutcome::Success | JobOutcome::Aborted => frontier.complete(claimed),
        JobOutcome::Failure(reason) => {
            if let Err(e) = frontier.record_error(&claimed.job.url, &reason, claimed.attempts_made + 1) {
                tracing::debug!("Could not record error for {}: {}", claimed.job.url, e);
            }
            frontier.fail(claimed, &reason).map(|_| ())
        }
    };

    if let Err(e) = result {
        tracing::error!("Could not settle job {} ({}): {}", claimed.id, claimed.job.url, e);
    }
}
