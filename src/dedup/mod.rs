//! Duplicate elimination
//!
//! Two layers, both process-local:
//! - URL layer: a bloom filter answering "have we seen this URL?" with no
//!   false negatives and a bounded false-positive rate.
//! - Content layer: simhash fingerprints of page text compared against a
//!   bounded FIFO window of recent fingerprints.
//!
//! The content check is linear in the window size. At high throughput a
//! banded index over fingerprint chunks would be needed instead.

mod fingerprint;

pub use fingerprint::{fnv1a_64, hamming_distance, simhash};

use crate::config::DedupConfig;
use bloomfilter::Bloom;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default maximum Hamming distance for near-duplicates
pub const DEFAULT_SIMHASH_THRESHOLD: u32 = 3;

/// URL bloom filter plus near-duplicate content detector
pub struct DuplicateEliminator {
    urls: Mutex<Bloom<String>>,
    recent: Mutex<VecDeque<u64>>,
    window: usize,
    threshold: u32,
}

impl DuplicateEliminator {
    /// Creates an eliminator
    ///
    /// # Arguments
    ///
    /// * `config` - Bloom filter sizing and fingerprint window length
    /// * `threshold` - Maximum Hamming distance counted as a near-duplicate
    pub fn new(config: &DedupConfig, threshold: u32) -> Self {
        Self {
            urls: Mutex::new(Bloom::new_for_fp_rate(
                config.bloom_capacity,
                config.bloom_false_positive_rate,
            )),
            recent: Mutex::new(VecDeque::with_capacity(config.fingerprint_window.min(1024))),
            window: config.fingerprint_window.max(1),
            threshold,
        }
    }

    /// Returns true the first time a URL is seen, false afterwards
    ///
    /// A false return may occasionally be a bloom false positive; a URL that
    /// was admitted once is never admitted again.
    pub fn is_new(&self, url: &str) -> bool {
        let mut filter = self.urls.lock().unwrap_or_else(|e| e.into_inner());
        let key = url.to_string();
        if filter.check(&key) {
            return false;
        }
        filter.set(&key);
        true
    }

    /// Records a URL as seen without asking
    pub fn mark_seen(&self, url: &str) {
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set(&url.to_string());
    }

    /// Checks page text against recently seen fingerprints
    ///
    /// Empty or whitespace-only text is never a duplicate. A text that is not
    /// a duplicate has its fingerprint appended to the window, evicting the
    /// oldest entry when the window is full.
    pub fn is_duplicate_content(&self, text: &str) -> bool {
        let Some(fingerprint) = simhash(text) else {
            return false;
        };

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(closest) = recent
            .iter()
            .map(|seen| hamming_distance(*seen, fingerprint))
            .find(|distance| *distance <= self.threshold)
        {
            tracing::debug!(
                "Near-duplicate content (distance {} <= {})",
                closest,
                self.threshold
            );
            return true;
        }

        if recent.len() >= self.window {
            recent.pop_front();
        }
        recent.push_back(fingerprint);
        false
    }

    /// Number of fingerprints currently held in the window
    pub fn fingerprint_count(&self) -> usize {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
