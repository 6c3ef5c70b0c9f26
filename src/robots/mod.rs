//! Robots.txt politeness
//!
//! The fetch pipeline asks a [`RobotsPolicy`] before fetching anything.
//! [`RobotsCache`] fetches `{origin}/robots.txt` once per origin and keeps the
//! rules for a day. An unreachable or missing robots.txt allows everything;
//! a URL that cannot be parsed is refused.

mod cache;
mod parser;

pub use cache::{CachedRobots, ROBOTS_TTL};
pub use parser::ParsedRobots;

use crate::url::origin_key;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Origins kept in a [`RobotsCache`] by default
pub const MAX_CACHED_ORIGINS: usize = 10_000;

/// Decides whether a URL may be fetched
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    async fn is_allowed(&self, url: &str) -> bool;
}

/// Policy that allows every URL
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl RobotsPolicy for AllowAll {
    async fn is_allowed(&self, _url: &str) -> bool {
        true
    }
}

/// Per-origin robots.txt cache
pub struct RobotsCache {
    client: reqwest::Client,
    product_token: String,
    capacity: usize,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Full User-Agent header sent when fetching robots.txt
    /// * `product_token` - Name matched against `User-agent:` groups
    pub fn new(user_agent: &str, product_token: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            product_token: product_token.to_string(),
            capacity: MAX_CACHED_ORIGINS,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Limits how many origins are cached at once
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Number of origins currently cached
    pub fn cached_origins(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Caches rules for an origin, evicting stale entries and then the
    /// oldest one when the cache is full
    fn remember(&self, origin: String, rules: ParsedRobots) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if !entries.contains_key(&origin) && entries.len() >= self.capacity {
            entries.retain(|_, entry| !entry.is_stale());
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.fetched_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(origin, CachedRobots::new(rules));
    }

    fn cached(&self, origin: &str) -> Option<ParsedRobots> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(origin)
            .filter(|entry| !entry.is_stale())
            .map(|entry| entry.content.clone())
    }

    /// Fetches robots.txt for an origin
    ///
    /// Anything other than a successful response yields allow-all rules.
    async fn fetch(&self, origin: &str) -> ParsedRobots {
        let robots_url = format!("{}/robots.txt", origin);
        tracing::debug!("Fetching {}", robots_url);

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("robots.txt unreachable for {}: {}", origin, e);
                return ParsedRobots::allow_all();
            }
        };

        if !response.status().is_success() {
            return ParsedRobots::allow_all();
        }

        match response.text().await {
            Ok(body) => ParsedRobots::from_content(&body),
            Err(_) => ParsedRobots::allow_all(),
        }
    }
}

#[async_trait]
impl RobotsPolicy for RobotsCache {
    async fn is_allowed(&self, url: &str) -> bool {
        let Ok(origin) = origin_key(url) else {
            return false;
        };

        let rules = match self.cached(&origin) {
            Some(rules) => rules,
            None => {
                let rules = self.fetch(&origin).await;
                self.remember(origin, rules.clone());
                rules
            }
        };

        rules.is_allowed(url, &self.product_token)
    }
}
