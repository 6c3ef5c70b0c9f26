//! Per-job fetch pipeline
//!
//! [`FetchPipeline::process`] takes one [`CrawlJob`] through liveness, depth,
//! robots, rate limiting, proxy selection, fetch, status handling, parsing,
//! render fallback, content dedup, persistence and link fan-out. Each stage
//! can end the job early.
//!
//! Cancellation is not a failure. A cancelled job is put back on the frontier
//! (unless the frontier is stopped) and reported as [`JobOutcome::Aborted`],
//! so the caller neither retries it nor loses it.

use crate::config::Config;
use crate::crawler::{
    looks_like_spa, FetchError, FetchedPage, Fetcher, LinkExtractor, ParsedResult, ProxyAddr,
    ProxyManager, RateLimiter, RenderError, RenderServiceClient, Renderer,
};
use crate::dedup::DuplicateEliminator;
use crate::frontier::{CrawlJob, Frontier, QueueError};
use crate::plugins::PluginRegistry;
use crate::robots::{RobotsCache, RobotsPolicy};
use crate::storage::{ParsedRecord, StorageError, StorageService};
use crate::url::domain_of;
use crate::UrlError;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result of processing one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Done; includes pages skipped by depth, robots or content dedup
    Success,

    /// Should be retried by the frontier
    Failure(String),

    /// Already put back on the frontier, or deliberately dropped
    Aborted,
}

/// Errors that end a job early
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("empty response body")]
    EmptyBody,

    #[error("unparseable page URL: {0}")]
    Url(#[from] UrlError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("frontier unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Pipeline tuning taken from the configuration
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub base_delay_ms: u64,
    pub max_depth: u32,
    pub use_renderer: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_delay_ms: config.crawler.crawl_delay_ms,
            max_depth: config.crawler.max_depth,
            use_renderer: config.crawler.use_renderer,
        }
    }
}

/// Runs crawl jobs end to end
pub struct FetchPipeline {
    settings: PipelineSettings,
    frontier: Arc<Frontier>,
    robots: Arc<dyn RobotsPolicy>,
    rate_limiter: Arc<RateLimiter>,
    proxies: Arc<ProxyManager>,
    fetcher: Fetcher,
    extractor: LinkExtractor,
    renderer: Option<Arc<dyn Renderer>>,
    dedup: Arc<DuplicateEliminator>,
    storage: Arc<dyn StorageService>,
    plugins: Arc<PluginRegistry>,
}

impl FetchPipeline {
    /// Builds a pipeline with every collaborator the configuration describes
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `frontier` - Queue that receives discovered links and re-submissions
    /// * `storage` - Document store for kept pages
    pub fn from_config(
        config: &Config,
        frontier: Arc<Frontier>,
        storage: Arc<dyn StorageService>,
    ) -> crate::Result<Self> {
        let settings = PipelineSettings::from_config(config);
        let user_agent = config.user_agent.header_value();
        let plugins = Arc::new(PluginRegistry::from_config(config));

        let robots = RobotsCache::new(&user_agent, &config.user_agent.crawler_name)?;

        let renderer: Option<Arc<dyn Renderer>> = match (&config.renderer, settings.use_renderer) {
            (Some(renderer), true) => Some(Arc::new(RenderServiceClient::new(
                renderer.endpoint.clone(),
                &user_agent,
            )?)),
            (None, true) => {
                tracing::warn!("use-renderer is set but no [renderer] endpoint is configured");
                None
            }
            _ => None,
        };

        Ok(Self {
            settings,
            frontier,
            robots: Arc::new(robots),
            rate_limiter: Arc::new(RateLimiter::new()),
            proxies: Arc::new(ProxyManager::new(config.crawler.proxy_list_url.clone())?),
            fetcher: Fetcher::new(&config.user_agent)?,
            extractor: LinkExtractor::new(
                config.crawler.domain_filter,
                settings.max_depth,
                Arc::clone(&plugins),
            ),
            renderer,
            dedup: Arc::new(DuplicateEliminator::new(
                &config.dedup,
                config.crawler.simhash_threshold,
            )),
            storage,
            plugins,
        })
    }

    /// Replaces the robots policy
    pub fn with_robots(mut self, robots: Arc<dyn RobotsPolicy>) -> Self {
        self.robots = robots;
        self
    }

    /// Replaces the renderer and turns the SPA fallback on
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self.settings.use_renderer = true;
        self
    }

    /// Replaces the proxy pool
    pub fn with_proxies(mut self, proxies: Arc<ProxyManager>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Replaces the HTTP fetcher
    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn proxies(&self) -> &Arc<ProxyManager> {
        &self.proxies
    }

    pub fn dedup(&self) -> &Arc<DuplicateEliminator> {
        &self.dedup
    }

    /// Processes one job
    ///
    /// # Arguments
    ///
    /// * `job` - The job to crawl
    /// * `cancel` - Cancelled by control signals or shutdown
    ///
    /// # Returns
    ///
    /// * `JobOutcome::Success` - Done, including benign skips
    /// * `JobOutcome::Failure(reason)` - The frontier should retry
    /// * `JobOutcome::Aborted` - Re-submitted or dropped; do not retry
    pub async fn process(&self, job: &CrawlJob, cancel: &CancellationToken) -> JobOutcome {
        match self.run(job, cancel).await {
            Ok(outcome) => outcome,
            Err(PipelineError::Cancelled) => self.requeue_cancelled(job),
            Err(e) => {
                tracing::error!("Error processing {}: {}", job.url, e);
                JobOutcome::Failure(e.to_string())
            }
        }
    }

    /// Puts a cancelled job back unless the frontier is stopped
    fn requeue_cancelled(&self, job: &CrawlJob) -> JobOutcome {
        match self.frontier.is_stopped() {
            Ok(true) => {
                tracing::info!("Dropped {} (frontier stopped)", job.url);
            }
            Ok(false) | Err(_) => match self.frontier.resubmit(job) {
                Ok(_) => tracing::info!("Cancelled {}, re-queued", job.url),
                Err(e) => tracing::error!("Could not re-queue cancelled {}: {}", job.url, e),
            },
        }
        JobOutcome::Aborted
    }

    async fn run(&self, job: &CrawlJob, cancel: &CancellationToken) -> Result<JobOutcome, PipelineError> {
        // Liveness
        if self.frontier.is_stopped()? {
            tracing::debug!("Frontier stopped, dropping {}", job.url);
            return Ok(JobOutcome::Aborted);
        }
        if self.frontier.is_paused()? {
            if let Err(e) = self.frontier.resubmit(job) {
                tracing::error!("Could not re-queue {} while paused: {}", job.url, e);
            }
            return Ok(JobOutcome::Aborted);
        }

        if job.depth > self.settings.max_depth {
            tracing::debug!("Max depth reached for {}", job.url);
            return Ok(JobOutcome::Success);
        }

        // Links back to this page must not re-enqueue it
        self.dedup.mark_seen(&job.url);

        let allowed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            allowed = self.robots.is_allowed(&job.url) => allowed,
        };
        if !allowed {
            tracing::info!("Skipping {} (disallowed by robots.txt)", job.url);
            return Ok(JobOutcome::Success);
        }

        self.rate_limiter
            .enforce(&job.url, self.settings.base_delay_ms, cancel)
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let proxy = self.proxies.get_proxy().await;
        tracing::info!("Fetching {} (depth {})", job.url, job.depth);

        let page = match self.fetcher.fetch(&job.url, proxy.as_ref(), cancel).await {
            Ok(page) => page,
            Err(FetchError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                if let Some(proxy) = &proxy {
                    self.proxies.report_failure(proxy);
                }
                return Err(e.into());
            }
        };

        self.rate_limiter.report_outcome(
            &job.url,
            self.settings.base_delay_ms,
            page.status,
            page.elapsed_ms(),
        );

        if let Err(e) = self.check_status(&page, proxy.as_ref()) {
            tracing::warn!("Failed to fetch {}: {}", job.url, e);
            return Ok(JobOutcome::Failure(e.to_string()));
        }

        let (parsed, content) = self.parse(job, &page, cancel).await?;

        if self.dedup.is_duplicate_content(&parsed.text) {
            tracing::info!("Dropping {} (near-duplicate content)", job.url);
            return Ok(JobOutcome::Success);
        }

        self.storage.save_raw_content(&job.url, &content).await?;
        self.storage
            .save_parsed_data(&job.url, &ParsedRecord::from(&parsed))
            .await?;
        tracing::debug!("Stored {} ({} links)", job.url, parsed.links.len());

        if self.plugins.has_indexers() {
            self.plugins.run_indexers(&parsed).await;
        }

        if job.depth < self.settings.max_depth {
            let queued = self.fan_out(job, &parsed);
            tracing::info!("Queued {} new URLs from {}", queued, job.url);
        }

        Ok(JobOutcome::Success)
    }

    /// Classifies the response status and feeds the proxy pool
    fn check_status(&self, page: &FetchedPage, proxy: Option<&ProxyAddr>) -> Result<(), PipelineError> {
        match page.status {
            429 | 503 | 403 => {
                if let Some(proxy) = proxy {
                    self.proxies.report_failure(proxy);
                }
                Err(PipelineError::Status { status: page.status })
            }
            200 => {
                if let Some(proxy) = proxy {
                    self.proxies.report_success(proxy);
                }
                if page.body.is_empty() {
                    return Err(PipelineError::EmptyBody);
                }
                Ok(())
            }
            status => Err(PipelineError::Status { status }),
        }
    }

    /// Parses a fetched page, rendering it first when it looks like an app shell
    ///
    /// Returns the parse result and the content to persist: the rendered HTML
    /// when rendering succeeded, the raw body otherwise.
    async fn parse(
        &self,
        job: &CrawlJob,
        page: &FetchedPage,
        cancel: &CancellationToken,
    ) -> Result<(ParsedResult, Vec<u8>), PipelineError> {
        let parsed = self.extractor.parse(
            &page.final_url,
            &page.body,
            page.content_type.as_deref(),
            Some(&job.original_domain),
        )?;

        let renderer = match &self.renderer {
            Some(renderer) if self.settings.use_renderer && page.is_html() => renderer,
            _ => return Ok((parsed, page.body.clone())),
        };

        if !looks_like_spa(&page.text(), parsed.links.len()) {
            return Ok((parsed, page.body.clone()));
        }

        tracing::info!("Suspected SPA at {}, rendering", job.url);
        match renderer.render(&job.url, cancel).await {
            Ok(html) => {
                let rendered =
                    self.extractor
                        .parse_html(&page.final_url, &html, Some(&job.original_domain))?;
                Ok((rendered, html.into_bytes()))
            }
            Err(RenderError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::warn!("Renderer failed for {}, using fetched HTML: {}", job.url, e);
                Ok((parsed, page.body.clone()))
            }
        }
    }

    /// Submits unseen links one level deeper
    fn fan_out(&self, job: &CrawlJob, parsed: &ParsedResult) -> usize {
        let original_domain = if job.original_domain.is_empty() {
            domain_of(&job.url).ok()
        } else {
            Some(job.original_domain.clone())
        };

        match self.frontier.is_stopped() {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!("Frontier stopped, not following links from {}", job.url);
                return 0;
            }
            Err(e) => {
                tracing::warn!("Could not read frontier state for {}: {}", job.url, e);
                return 0;
            }
        }

        let mut queued = 0;
        for link in &parsed.links {
            if !self.dedup.is_new(link) {
                continue;
            }
            match self
                .frontier
                .add_url(link, job.depth + 1, original_domain.as_deref())
            {
                Ok(Some(_)) => queued += 1,
                Ok(None) => {}
                Err(e) => tracing::debug!("Skipping link {}: {}", link, e),
            }
        }
        queued
    }
}
