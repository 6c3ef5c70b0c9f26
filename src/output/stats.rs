//! Frontier statistics for operators
//!
//! This module gathers queue counts, control flags and the recent error log
//! from the shared frontier, plus the document count from the store.

use crate::frontier::{CrawlErrorEntry, Frontier, JobCounts};
use crate::storage::SqliteDocumentStore;
use std::fmt::Write;

/// Number of recent errors included in a status report
pub const STATUS_ERROR_LIMIT: usize = 10;

/// Snapshot of the crawl's state
#[derive(Debug, Clone)]
pub struct FrontierStatistics {
    /// Job counts across all partitions
    pub counts: JobCounts,

    /// Number of partitions jobs are routed to
    pub partitions: u32,

    /// Shared or local pause in effect
    pub paused: bool,

    /// Persistent stop flag
    pub stopped: bool,

    /// Documents in the store, when it was available
    pub stored_documents: Option<u64>,

    /// Newest processing errors first
    pub recent_errors: Vec<CrawlErrorEntry>,
}

impl FrontierStatistics {
    /// Human-readable state of the queue
    pub fn state_label(&self) -> &'static str {
        if self.stopped {
            "stopped"
        } else if self.paused {
            "paused"
        } else {
            "running"
        }
    }
}

/// Loads statistics
///
/// # Arguments
///
/// * `frontier` - The shared frontier
/// * `storage` - The document store, if it could be opened
pub fn load_statistics(
    frontier: &Frontier,
    storage: Option<&SqliteDocumentStore>,
) -> crate::Result<FrontierStatistics> {
    let stored_documents = match storage {
        Some(storage) => Some(storage.document_count()?),
        None => None,
    };

    Ok(FrontierStatistics {
        counts: frontier.counts()?,
        partitions: frontier.partition_count(),
        paused: frontier.is_paused()?,
        stopped: frontier.is_stopped()?,
        stored_documents,
        recent_errors: frontier.recent_errors(STATUS_ERROR_LIMIT)?,
    })
}

/// Formats statistics as a plain-text report
pub fn format_statistics(stats: &FrontierStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Frontier Status ===\n");
    let _ = writeln!(out, "State: {}", stats.state_label());
    let _ = writeln!(out, "Partitions: {}", stats.partitions);
    let _ = writeln!(out);

    let _ = writeln!(out, "Jobs:");
    let _ = writeln!(out, "  Waiting: {}", stats.counts.waiting);
    let _ = writeln!(out, "  Delayed: {}", stats.counts.delayed);
    let _ = writeln!(out, "  Active: {}", stats.counts.active);
    let _ = writeln!(out, "  Failed (dead letters): {}", stats.counts.failed);

    if let Some(documents) = stats.stored_documents {
        let _ = writeln!(out, "\nStored documents: {}", documents);
    }

    if !stats.recent_errors.is_empty() {
        let _ = writeln!(out, "\nRecent Errors:");
        for entry in &stats.recent_errors {
            let _ = writeln!(
                out,
                "  [{}] {} (attempt {}): {}",
                entry.recorded_at, entry.url, entry.attempt, entry.error
            );
        }
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &FrontierStatistics) {
    print!("{}", format_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontier::{FrontierSettings, RetryPolicy};

    fn frontier() -> Frontier {
        Frontier::in_memory(FrontierSettings {
            partitions: 3,
            max_depth: 5,
            retry: RetryPolicy::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_statistics_reflect_queue() {
        let frontier = frontier();
        frontier.add_url("https://example.com/a", 0, None).unwrap();
        frontier.add_url("https://example.com/b", 0, None).unwrap();
        frontier.record_error("https://example.com/c", "HTTP 503", 2).unwrap();

        let storage = SqliteDocumentStore::open_in_memory().unwrap();
        let stats = load_statistics(&frontier, Some(&storage)).unwrap();

        assert_eq!(stats.counts.waiting, 2);
        assert_eq!(stats.partitions, 3);
        assert_eq!(stats.state_label(), "running");
        assert_eq!(stats.stored_documents, Some(0));

        let report = format_statistics(&stats);
        assert!(report.contains("Waiting: 2"));
        assert!(report.contains("https://example.com/c (attempt 2): HTTP 503"));
    }

    #[test]
    fn test_stopped_label_wins_over_paused() {
        let frontier = frontier();
        frontier.pause(crate::frontier::ControlScope::Global).unwrap();
        frontier.stop().unwrap();

        let stats = load_statistics(&frontier, None).unwrap();
        assert_eq!(stats.state_label(), "stopped");
        assert!(!format_statistics(&stats).contains("Stored documents"));
    }
}
