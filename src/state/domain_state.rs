use tokio::time::{Duration, Instant};

/// Lower bound of the delay ceiling, regardless of the base delay
const MIN_DELAY_CAP_MS: u64 = 60_000;

/// Adaptive politeness state for one origin
///
/// The delay behaves like a congestion window run in reverse: it grows
/// multiplicatively on throttling or blocking signals and shrinks slowly on
/// healthy responses, never dropping below the configured base delay.
#[derive(Debug, Clone)]
pub struct DomainRateState {
    /// The slot claimed by the most recent fetch to this origin
    pub last_fetch_scheduled_at: Option<Instant>,

    /// Current delay between fetches (milliseconds)
    pub current_delay_ms: u64,
}

impl DomainRateState {
    /// Creates a new state starting at the base delay
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            last_fetch_scheduled_at: None,
            current_delay_ms: base_delay_ms,
        }
    }

    /// Maximum delay for a given base: `max(10 × base, 60s)`
    pub fn delay_cap_ms(base_delay_ms: u64) -> u64 {
        base_delay_ms.saturating_mul(10).max(MIN_DELAY_CAP_MS)
    }

    /// Claims the next fetch slot for this origin
    ///
    /// The slot is `max(now, last + current_delay)`. It is recorded
    /// immediately, so concurrent callers each receive a strictly later slot.
    pub fn claim_slot(&mut self, now: Instant) -> Instant {
        let target = match self.last_fetch_scheduled_at {
            Some(last) => {
                let earliest = last + Duration::from_millis(self.current_delay_ms);
                earliest.max(now)
            }
            None => now,
        };
        self.last_fetch_scheduled_at = Some(target);
        target
    }

    /// Adjusts the delay from an observed response
    ///
    /// | Signal | Adjustment |
    /// |--------|------------|
    /// | 429 / 503 | × 2 |
    /// | other 4xx except 404 | × 1.5 |
    /// | response slower than 2 × base | × 1.2 |
    /// | fast 200 | × 0.9, floored at base |
    ///
    /// Increases are capped at [`DomainRateState::delay_cap_ms`].
    pub fn apply_outcome(&mut self, base_delay_ms: u64, status_code: u16, response_time_ms: u64) {
        let cap = Self::delay_cap_ms(base_delay_ms);
        let current = self.current_delay_ms.max(base_delay_ms);
        let slow = response_time_ms > base_delay_ms.saturating_mul(2);

        let next = if status_code == 429 || status_code == 503 {
            current.saturating_mul(2).min(cap)
        } else if (400..500).contains(&status_code) && status_code != 404 {
            scale(current, 1.5).min(cap)
        } else if slow {
            scale(current, 1.2).min(cap)
        } else if status_code == 200 {
            scale(current, 0.9).max(base_delay_ms)
        } else {
            current
        };

        self.current_delay_ms = next;
    }
}

fn scale(value: u64, factor: f64) -> u64 {
    (value as f64 * factor).round() as u64
}
