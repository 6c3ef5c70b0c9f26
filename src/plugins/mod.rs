//! Parser plugins
//!
//! A plugin offers one or more capabilities, each registered separately:
//!
//! - [`FullParser`]: replaces the default HTML parse for the content types it
//!   claims. The first registered parser that claims a type wins.
//! - [`FieldExtractor`]: runs against the default HTML parse and contributes
//!   one entry to `extractedData`, keyed by its name.
//! - [`Indexer`]: receives the final [`ParsedResult`] for side effects.
//!
//! Plugin failures are logged and isolated; they never fail a page or stop
//! other plugins from running.

mod metadata;
mod non_html;
mod search_index;

pub use metadata::MetadataExtractor;
pub use non_html::NonHtmlParser;
pub use search_index::SearchIndexer;

use crate::config::Config;
use crate::crawler::ParsedResult;
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors raised by plugins
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("Malformed content: {0}")]
    Malformed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for plugin operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Full parse override for non-HTML content
pub trait FullParser: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this parser claims a media type (lowercase, no parameters)
    fn handles(&self, media_type: &str) -> bool;

    /// Parses a response body
    ///
    /// # Arguments
    ///
    /// * `base_url` - URL the body was fetched from
    /// * `body` - Raw response bytes
    /// * `original_domain` - Domain of the crawl's seed, when known
    /// * `content_type` - Full Content-Type header value
    fn parse(
        &self,
        base_url: &Url,
        body: &[u8],
        original_domain: Option<&str>,
        content_type: &str,
    ) -> PluginResult<ParsedResult>;
}

/// Contributes structured fields extracted from an HTML document
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, url: &Url, document: &Html) -> PluginResult<serde_json::Value>;
}

/// Receives every page that was kept
#[async_trait]
pub trait Indexer: Send + Sync {
    fn name(&self) -> &str;

    async fn index(&self, result: &ParsedResult) -> PluginResult<()>;
}

/// One capability of a plugin
#[derive(Clone)]
pub enum Plugin {
    Parser(Arc<dyn FullParser>),
    Extractor(Arc<dyn FieldExtractor>),
    Indexer(Arc<dyn Indexer>),
}

/// Registered plugins, in registration order per capability
#[derive(Clone, Default)]
pub struct PluginRegistry {
    parsers: Vec<Arc<dyn FullParser>>,
    extractors: Vec<Arc<dyn FieldExtractor>>,
    indexers: Vec<Arc<dyn Indexer>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in plugins enabled by the configuration
    ///
    /// The non-HTML parser and metadata extractor are always present; the
    /// search indexer only with an `[indexer]` section.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new()
            .with(Plugin::Parser(Arc::new(NonHtmlParser::new())))
            .with(Plugin::Extractor(Arc::new(MetadataExtractor)));

        if let Some(indexer) = &config.indexer {
            match SearchIndexer::new(indexer) {
                Ok(plugin) => registry.register(Plugin::Indexer(Arc::new(plugin))),
                Err(e) => tracing::error!("Search indexer disabled: {}", e),
            }
        }

        registry
    }

    pub fn register(&mut self, plugin: Plugin) {
        match plugin {
            Plugin::Parser(parser) => self.parsers.push(parser),
            Plugin::Extractor(extractor) => self.extractors.push(extractor),
            Plugin::Indexer(indexer) => self.indexers.push(indexer),
        }
    }

    pub fn with(mut self, plugin: Plugin) -> Self {
        self.register(plugin);
        self
    }

    /// Parsers claiming a media type, in registration order
    pub fn parsers_for<'a>(&'a self, media_type: &'a str) -> impl Iterator<Item = &'a Arc<dyn FullParser>> + 'a {
        self.parsers.iter().filter(move |p| p.handles(media_type))
    }

    pub fn extractors(&self) -> &[Arc<dyn FieldExtractor>] {
        &self.extractors
    }

    pub fn has_indexers(&self) -> bool {
        !self.indexers.is_empty()
    }

    /// Runs every extractor against a document
    ///
    /// Returns None when no extractor produced anything.
    pub fn run_extractors(
        &self,
        url: &Url,
        document: &Html,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        let mut data = serde_json::Map::new();

        for extractor in &self.extractors {
            match extractor.extract(url, document) {
                Ok(value) => {
                    data.insert(extractor.name().to_string(), value);
                }
                Err(e) => {
                    tracing::warn!("Extractor {} failed on {}: {}", extractor.name(), url, e);
                }
            }
        }

        (!data.is_empty()).then_some(data)
    }

    /// Hands a result to every indexer
    ///
    /// Returns the number of indexers that succeeded.
    pub async fn run_indexers(&self, result: &ParsedResult) -> usize {
        let mut succeeded = 0;

        for indexer in &self.indexers {
            match indexer.index(result).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    tracing::warn!("Indexer {} failed on {}: {}", indexer.name(), result.url, e);
                }
            }
        }

        succeeded
    }
}
