//! Configuration module for Sumi-Fleet
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_fleet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fleet.toml")).unwrap();
//! println!("Partitions: {}", config.crawler.queue_partitions);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, DedupConfig, IndexerConfig, QueueConfig, RendererConfig,
    StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
