//! Adaptive per-origin politeness
//!
//! Each origin gets its own [`DomainRateState`]. `enforce` claims the next
//! slot for the origin and suspends the task until it arrives; the claim is
//! recorded before the wait, so concurrent fetches to one origin are spaced
//! at least `current_delay_ms` apart. State is process-local.

use crate::state::DomainRateState;
use crate::url::origin_key;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The wait was interrupted by the job's cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate-limit wait cancelled")]
pub struct WaitCancelled;

/// Per-origin adaptive delay enforcement
#[derive(Default)]
pub struct RateLimiter {
    origins: Mutex<HashMap<String, DomainRateState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the origin's next fetch slot
    ///
    /// URLs without an origin are not limited.
    ///
    /// # Arguments
    ///
    /// * `url` - URL about to be fetched
    /// * `base_delay_ms` - Configured politeness floor
    /// * `cancel` - Aborts the wait when cancelled
    pub async fn enforce(
        &self,
        url: &str,
        base_delay_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), WaitCancelled> {
        let Ok(origin) = origin_key(url) else {
            tracing::debug!("No origin for {}, skipping rate limit", url);
            return Ok(());
        };

        let target = {
            let mut origins = self.origins.lock().unwrap_or_else(|e| e.into_inner());
            origins
                .entry(origin)
                .or_insert_with(|| DomainRateState::new(base_delay_ms))
                .claim_slot(Instant::now())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitCancelled),
            _ = tokio::time::sleep_until(target) => Ok(()),
        }
    }

    /// Feeds an observed response back into the origin's delay
    pub fn report_outcome(
        &self,
        url: &str,
        base_delay_ms: u64,
        status_code: u16,
        response_time_ms: u64,
    ) {
        let Ok(origin) = origin_key(url) else {
            return;
        };

        let mut origins = self.origins.lock().unwrap_or_else(|e| e.into_inner());
        let state = origins
            .entry(origin)
            .or_insert_with(|| DomainRateState::new(base_delay_ms));
        let before = state.current_delay_ms;
        state.apply_outcome(base_delay_ms, status_code, response_time_ms);

        if state.current_delay_ms > before {
            tracing::debug!(
                "Backing off {}: {}ms -> {}ms (status {}, {}ms)",
                url,
                before,
                state.current_delay_ms,
                status_code,
                response_time_ms
            );
        }
    }

    /// Current delay for the URL's origin, if it has been seen
    pub fn current_delay_ms(&self, url: &str) -> Option<u64> {
        let origin = origin_key(url).ok()?;
        self.origins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&origin)
            .map(|state| state.current_delay_ms)
    }
}
