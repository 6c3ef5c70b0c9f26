use serde::Deserialize;

/// Main configuration structure for Sumi-Fleet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub renderer: Option<RendererConfig>,
    #[serde(default)]
    pub indexer: Option<IndexerConfig>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum link depth from a seed, also the maximum URL path segment count
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Number of concurrent fetch tasks per owned partition
    #[serde(rename = "fetcher-concurrency", default = "default_fetcher_concurrency")]
    pub fetcher_concurrency: u32,

    /// Base politeness delay between requests to the same origin (milliseconds)
    #[serde(rename = "crawl-delay-ms", default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,

    /// Number of frontier partitions
    #[serde(rename = "queue-partitions", default = "default_queue_partitions")]
    pub queue_partitions: u32,

    /// Restrict links found on off-site pages to the crawl's original domain
    #[serde(rename = "domain-filter", default)]
    pub domain_filter: bool,

    /// Hand suspected single-page apps to the renderer
    #[serde(rename = "use-renderer", default)]
    pub use_renderer: bool,

    /// Maximum Hamming distance for two pages to count as near-duplicates
    #[serde(rename = "simhash-threshold", default = "default_simhash_threshold")]
    pub simhash_threshold: u32,

    /// Optional URL of a newline-separated proxy list
    #[serde(rename = "proxy-list-url", default)]
    pub proxy_list_url: Option<String>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Shared frontier store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Path to the SQLite database shared by all worker processes
    #[serde(rename = "database-path", default = "default_queue_path")]
    pub database_path: String,

    /// Attempts per job before it is moved to the dead-letter set
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles on every further attempt (milliseconds)
    #[serde(rename = "backoff-ms", default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Idle dequeue and control relay polling interval (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Active jobs older than this are considered abandoned (seconds)
    #[serde(rename = "stall-timeout-secs", default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: default_queue_path(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

/// Duplicate elimination sizing
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Expected number of distinct URLs
    #[serde(rename = "bloom-capacity", default = "default_bloom_capacity")]
    pub bloom_capacity: usize,

    /// Target false-positive rate of the URL filter
    #[serde(
        rename = "bloom-false-positive-rate",
        default = "default_bloom_false_positive_rate"
    )]
    pub bloom_false_positive_rate: f64,

    /// Number of recent content fingerprints kept for comparison
    #[serde(rename = "fingerprint-window", default = "default_fingerprint_window")]
    pub fingerprint_window: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            bloom_capacity: default_bloom_capacity(),
            bloom_false_positive_rate: default_bloom_false_positive_rate(),
            fingerprint_window: default_fingerprint_window(),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite document database
    #[serde(rename = "database-path", default = "default_storage_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_storage_path(),
        }
    }
}

/// Headless render service
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    /// Endpoint receiving `?url=` and returning executed HTML
    pub endpoint: String,
}

/// Search index the built-in indexer plugin pushes to
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Base URL of the index cluster
    pub node: String,

    /// Index name
    pub index: String,

    /// Optional API key sent as `Authorization: ApiKey <key>`
    #[serde(rename = "api-key", default)]
    pub api_key: Option<String>,
}

fn default_max_depth() -> u32 {
    5
}

fn default_fetcher_concurrency() -> u32 {
    10
}

fn default_crawl_delay_ms() -> u64 {
    2000
}

fn default_queue_partitions() -> u32 {
    10
}

fn default_simhash_threshold() -> u32 {
    3
}

fn default_queue_path() -> String {
    "./frontier.db".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stall_timeout_secs() -> u64 {
    300
}

fn default_bloom_capacity() -> usize {
    10_000_000
}

fn default_bloom_false_positive_rate() -> f64 {
    0.01
}

fn default_fingerprint_window() -> usize {
    10_000
}

fn default_storage_path() -> String {
    "./documents.db".to_string()
}
