//! Frontier control plane
//!
//! Control signals are fanned out to every worker process. Within a process
//! they travel over a tokio broadcast channel; across processes they are
//! appended to the shared signal log and picked up by a relay task that polls
//! it.

use crate::frontier::store::{QueueResult, SqliteQueueStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 64;

/// Number of signals kept in the shared log
const SIGNAL_LOG_CAPACITY: usize = 500;

static NEXT_PLANE: AtomicU64 = AtomicU64::new(0);

/// Control actions understood by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
    Empty,
}

impl ControlAction {
    /// Whether workers must abort the jobs they are processing
    pub fn cancels_in_flight(&self) -> bool {
        !matches!(self, Self::Resume)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control-plane message: `{"action": "pause"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub action: ControlAction,
}

impl ControlSignal {
    pub fn new(action: ControlAction) -> Self {
        Self { action }
    }
}

/// Publishes and relays control signals
pub struct ControlPlane {
    store: Arc<SqliteQueueStore>,
    origin: String,
    sender: broadcast::Sender<ControlSignal>,
    last_seen: AtomicI64,
}

impl ControlPlane {
    /// Creates a control plane for this process
    ///
    /// Signals already in the log are treated as history and never relayed.
    pub fn new(store: Arc<SqliteQueueStore>) -> QueueResult<Self> {
        let last_seen = store.latest_signal_id()?;
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let origin = format!(
            "{}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros(),
            NEXT_PLANE.fetch_add(1, Ordering::Relaxed)
        );

        Ok(Self {
            store,
            origin,
            sender,
            last_seen: AtomicI64::new(last_seen),
        })
    }

    /// Identifier of this process in the signal log
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Publishes a signal to this process and to every other process
    pub fn publish(&self, signal: ControlSignal) -> QueueResult<()> {
        let payload = serde_json::to_string(&signal)?;
        self.store
            .append_signal(signal.action.as_str(), &self.origin, &payload, SIGNAL_LOG_CAPACITY)?;

        // No local subscribers is not an error
        let _ = self.sender.send(signal);

        tracing::info!("Published control signal: {}", signal.action);
        Ok(())
    }

    /// Subscribes to signals from every process
    pub fn subscribe(&self) -> broadcast::Receiver<ControlSignal> {
        self.sender.subscribe()
    }

    /// Delivers signals other processes appended since the last poll
    ///
    /// Returns the number of signals delivered locally.
    pub fn poll_remote(&self) -> QueueResult<usize> {
        let after = self.last_seen.load(Ordering::SeqCst);
        let signals = self.store.signals_after(after)?;
        let mut delivered = 0;

        for stored in signals {
            self.last_seen.fetch_max(stored.id, Ordering::SeqCst);

            if stored.origin == self.origin {
                continue;
            }

            match serde_json::from_str::<ControlSignal>(&stored.payload) {
                Ok(signal) => {
                    tracing::debug!("Relaying control signal {} from {}", signal.action, stored.origin);
                    let _ = self.sender.send(signal);
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed control signal #{}: {}", stored.id, e);
                }
            }
        }

        Ok(delivered)
    }

    /// Spawns the task that relays signals from other processes
    pub fn spawn_relay(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_remote() {
                            tracing::warn!("Control relay poll failed: {}", e);
                        }
                    }
                }
            }

            tracing::debug!("Control relay stopped");
        })
    }
}
