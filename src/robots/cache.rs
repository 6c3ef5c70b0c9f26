//! Cached robots.txt entries

use crate::robots::ParsedRobots;
use std::time::Duration;
use tokio::time::Instant;

/// How long fetched rules are trusted
pub const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Robots.txt rules for one origin, with the time they were fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,
    pub fetched_at: Instant,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Instant::now(),
        }
    }

    /// True once the entry is older than [`ROBOTS_TTL`]
    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > ROBOTS_TTL
    }
}
