//! Shared helpers for the integration tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_fleet::config::{
    Config, CrawlerConfig, DedupConfig, QueueConfig, StorageConfig, UserAgentConfig,
};
use sumi_fleet::crawler::{FetchPipeline, Renderer, WorkerPool, WorkerSettings};
use sumi_fleet::frontier::Frontier;
use sumi_fleet::storage::SqliteDocumentStore;

/// Creates a test configuration with both databases under `dir`
pub fn create_test_config(dir: &Path) -> Config {
    Config {
        crawler: CrawlerConfig {
            max_depth: 2,
            fetcher_concurrency: 2,
            crawl_delay_ms: 0,
            queue_partitions: 2,
            domain_filter: true,
            use_renderer: false,
            simhash_threshold: 3,
            proxy_list_url: None,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        queue: QueueConfig {
            database_path: dir.join("frontier.db").to_string_lossy().into_owned(),
            max_attempts: 3,
            backoff_ms: 10,
            poll_interval_ms: 20,
            stall_timeout_secs: 300,
        },
        dedup: DedupConfig {
            bloom_capacity: 10_000,
            bloom_false_positive_rate: 0.01,
            fingerprint_window: 100,
        },
        storage: StorageConfig {
            database_path: dir.join("documents.db").to_string_lossy().into_owned(),
        },
        renderer: None,
        indexer: None,
    }
}

/// Everything a test needs to drive one worker process
pub struct TestFleet {
    pub frontier: Arc<Frontier>,
    pub storage: Arc<SqliteDocumentStore>,
    pub pipeline: Arc<FetchPipeline>,
}

impl TestFleet {
    pub fn new(config: &Config) -> Self {
        Self::build(config, None)
    }

    /// Builds a fleet whose pipeline renders suspected SPAs with `renderer`
    pub fn with_renderer(config: &Config, renderer: Arc<dyn Renderer>) -> Self {
        Self::build(config, Some(renderer))
    }

    fn build(config: &Config, renderer: Option<Arc<dyn Renderer>>) -> Self {
        let frontier = Arc::new(Frontier::open(config).expect("Failed to open frontier"));
        let storage = Arc::new(
            SqliteDocumentStore::open(Path::new(&config.storage.database_path))
                .expect("Failed to open document store"),
        );
        let mut pipeline =
            FetchPipeline::from_config(config, Arc::clone(&frontier), storage.clone())
                .expect("Failed to build pipeline");
        if let Some(renderer) = renderer {
            pipeline = pipeline.with_renderer(renderer);
        }
        let pipeline = Arc::new(pipeline);

        Self {
            frontier,
            storage,
            pipeline,
        }
    }

    pub fn worker_pool(&self, config: &Config) -> Arc<WorkerPool> {
        let mut settings = WorkerSettings::from_config(config, None);
        settings.poll_interval = Duration::from_millis(20);
        Arc::new(WorkerPool::new(Arc::clone(&self.pipeline), settings))
    }
}

/// Polls `condition` every 20ms until it holds, panicking after `timeout`
pub async fn wait_for<F>(timeout: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
