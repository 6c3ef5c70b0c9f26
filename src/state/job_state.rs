/// Job state definitions for the shared frontier
///
/// This module defines the lifecycle states a crawl job moves through inside
/// a partition queue.
use std::fmt;

/// Represents the current state of a job in a partition queue
///
/// ```text
/// Waiting --claim--> Active --complete--> (removed)
///    ^                 |
///    +----retry--------+--attempts exhausted--> Failed (dead-letter)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Job is queued; it may be delayed by a retry backoff
    Waiting,

    /// Job has been claimed by a worker
    Active,

    /// Job exhausted its attempts and is retained as a dead letter
    Failed,
}

impl JobState {
    /// Returns true if the job can still be dequeued at some point
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns true if the job is in the dead-letter set
    pub fn is_dead_letter(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Converts the job state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }

    /// Parses a job state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
