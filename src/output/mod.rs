//! Output module for operator reports
//!
//! This module handles:
//! - Frontier status (queue counts, control flags, recent errors)
//! - Dead-letter listings as text or JSON

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, FrontierStatistics};

use crate::frontier::DeadLetter;
use std::fmt::Write;

/// Formats dead letters as a plain-text table
///
/// # Arguments
///
/// * `letters` - Dead letters, newest first
pub fn format_dead_letters(letters: &[DeadLetter]) -> String {
    let mut out = String::new();

    if letters.is_empty() {
        let _ = writeln!(out, "No dead letters.");
        return out;
    }

    let _ = writeln!(out, "=== Dead Letters ({}) ===\n", letters.len());
    for letter in letters {
        let _ = writeln!(out, "{} [{}]", letter.job.url, letter.partition);
        let _ = writeln!(
            out,
            "  depth {}, {} attempts, failed at {}",
            letter.job.depth,
            letter.attempts_made,
            letter.failed_at.as_deref().unwrap_or("unknown")
        );
        if let Some(error) = &letter.last_error {
            let _ = writeln!(out, "  last error: {}", error);
        }
    }

    out
}

/// Serializes dead letters as pretty-printed JSON
pub fn dead_letters_json(letters: &[DeadLetter]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(letters)
}
