//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `JobState`: Tracks the lifecycle of a job inside a partition queue
//! - `DomainRateState`: Tracks per-origin adaptive politeness delay

mod domain_state;
mod job_state;

// Re-export main types
pub use domain_state::DomainRateState;
pub use job_state::JobState;
