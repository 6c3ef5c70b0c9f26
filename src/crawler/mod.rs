//! Crawler module: everything a worker process runs
//!
//! This module contains the fetch side of the engine, including:
//! - Raw-byte HTTP fetching with an optional proxy
//! - Adaptive per-origin rate limiting
//! - Proxy rotation with health-based banning
//! - Link and text extraction with spider-trap filtering
//! - The headless-render fallback for single-page apps
//! - The per-job pipeline and the worker pool that drives it

mod fetcher;
mod parser;
mod pipeline;
mod proxy;
mod rate_limiter;
mod renderer;
mod worker;

pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher, FETCH_TIMEOUT};
pub use parser::{looks_like_spa, LinkExtractor, ParsedResult};
pub use pipeline::{FetchPipeline, JobOutcome, PipelineError, PipelineSettings};
pub use proxy::{parse_proxy_list, ProxyAddr, ProxyEntry, ProxyManager};
pub use rate_limiter::{RateLimiter, WaitCancelled};
pub use renderer::{RenderError, RenderServiceClient, Renderer, RENDER_TIMEOUT};
pub use worker::{WorkerPool, WorkerSettings};

use crate::config::Config;
use crate::frontier::Frontier;
use crate::storage::open_storage;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs a worker process until `shutdown` is cancelled
///
/// Opens the shared frontier and the document store named in the
/// configuration, builds the pipeline and drives it with a worker pool.
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `partitions` - Partitions to own; every partition when None
/// * `shutdown` - Cancelled to stop; in-flight jobs are re-queued
pub async fn run_workers(
    config: &Config,
    partitions: Option<Vec<u32>>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let frontier = Arc::new(Frontier::open(config)?);
    let storage = Arc::new(open_storage(Path::new(&config.storage.database_path))?);

    let pipeline = Arc::new(FetchPipeline::from_config(config, frontier, storage)?);
    let pool = WorkerPool::new(pipeline, WorkerSettings::from_config(config, partitions));

    pool.run(shutdown).await
}
