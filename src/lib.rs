//! Sumi-Fleet: a distributed, polite web-crawling engine
//!
//! This crate implements the crawl engine proper: a partitioned, durable
//! frontier with a pause/resume/stop control plane, a per-job fetch pipeline
//! with adaptive politeness and proxy rotation, URL and near-duplicate content
//! elimination, and link extraction with spider-trap defenses.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod frontier;
pub mod output;
pub mod plugins;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Fleet operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Queue error: {0}")]
    Queue(#[from] frontier::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Renderer error: {0}")]
    Render(#[from] crawler::RenderError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{FetchPipeline, JobOutcome, WorkerPool};
pub use dedup::DuplicateEliminator;
pub use frontier::{ControlAction, ControlSignal, CrawlJob, Frontier};
pub use state::{DomainRateState, JobState};
pub use url::{extract_domain, origin_key};
