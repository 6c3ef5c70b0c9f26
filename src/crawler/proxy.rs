//! Rotating outbound proxy pool
//!
//! The list is loaded from a URL serving one proxy per line (`host:port` or
//! `scheme://host:port`) or a JSON array of such strings, and reloaded once
//! it is older than an hour. Proxies that keep failing are benched for a
//! while; failure counts and bans survive a reload for proxies still listed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// How long a loaded list stays fresh
pub const PROXY_LIST_TTL: Duration = Duration::from_secs(60 * 60);

/// Consecutive failures that bench a proxy
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How long a benched proxy is skipped
pub const BAN_DURATION: Duration = Duration::from_secs(5 * 60);

const LIST_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const LIST_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Address of one proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddr {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    /// Proxy URL suitable for `reqwest::Proxy::all`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl std::fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A proxy and its health
#[derive(Debug, Clone)]
pub struct ProxyEntry {
    pub addr: ProxyAddr,
    pub consecutive_failures: u32,
    pub banned_until: Option<Instant>,
}

impl ProxyEntry {
    fn new(addr: ProxyAddr) -> Self {
        Self {
            addr,
            consecutive_failures: 0,
            banned_until: None,
        }
    }

    pub fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| until > now)
    }
}

#[derive(Default)]
struct ProxyPool {
    entries: Vec<ProxyEntry>,
    next: usize,
    loaded_at: Option<Instant>,
    retry_at: Option<Instant>,
}

impl ProxyPool {
    fn needs_refresh(&self, now: Instant) -> bool {
        if let Some(retry_at) = self.retry_at {
            if retry_at > now {
                return false;
            }
        }
        match self.loaded_at {
            Some(loaded) => self.entries.is_empty() || now.duration_since(loaded) >= PROXY_LIST_TTL,
            None => true,
        }
    }

    /// Replaces the list, carrying over health for proxies still present
    fn replace(&mut self, addrs: Vec<ProxyAddr>, now: Instant) {
        let mut previous: HashMap<(String, u16), ProxyEntry> = self
            .entries
            .drain(..)
            .map(|entry| ((entry.addr.host.clone(), entry.addr.port), entry))
            .collect();

        self.entries = addrs
            .into_iter()
            .map(|addr| match previous.remove(&(addr.host.clone(), addr.port)) {
                Some(existing) => ProxyEntry {
                    addr,
                    consecutive_failures: existing.consecutive_failures,
                    banned_until: existing.banned_until,
                },
                None => ProxyEntry::new(addr),
            })
            .collect();

        if self.next >= self.entries.len() {
            self.next = 0;
        }
        self.loaded_at = Some(now);
        self.retry_at = None;
    }

    fn next_available(&mut self, now: Instant) -> Option<ProxyAddr> {
        let len = self.entries.len();
        for _ in 0..len {
            let index = self.next % len;
            self.next = (index + 1) % len;
            let entry = &self.entries[index];
            if !entry.is_banned(now) {
                return Some(entry.addr.clone());
            }
        }
        None
    }

    fn entry_mut(&mut self, addr: &ProxyAddr) -> Option<&mut ProxyEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.addr.host == addr.host && entry.addr.port == addr.port)
    }
}

/// Round-robin proxy selection with health-based banning
pub struct ProxyManager {
    list_url: Option<String>,
    client: reqwest::Client,
    pool: Mutex<ProxyPool>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProxyManager {
    /// Creates a manager that loads its list from `list_url`
    ///
    /// Without a list URL every fetch goes direct.
    pub fn new(list_url: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(LIST_FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            list_url,
            client,
            pool: Mutex::new(ProxyPool::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Creates a manager over a fixed list that is never reloaded
    pub fn with_proxies(addrs: Vec<ProxyAddr>) -> Result<Self, reqwest::Error> {
        let manager = Self::new(None)?;
        manager.pool().replace(addrs, Instant::now());
        Ok(manager)
    }

    fn pool(&self) -> MutexGuard<'_, ProxyPool> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Picks the next proxy that is not banned
    ///
    /// Returns None when no list is configured, the list is empty, or every
    /// proxy is banned; the caller then connects directly.
    pub async fn get_proxy(&self) -> Option<ProxyAddr> {
        if self.list_url.is_some() {
            self.refresh_if_needed().await;
        }

        let mut pool = self.pool();
        if pool.entries.is_empty() {
            return None;
        }

        let picked = pool.next_available(Instant::now());
        if picked.is_none() {
            tracing::warn!("All proxies are banned, falling back to a direct connection");
        }
        picked
    }

    /// Counts a failure; the third in a row bans the proxy
    pub fn report_failure(&self, addr: &ProxyAddr) {
        let mut pool = self.pool();
        let Some(entry) = pool.entry_mut(addr) else {
            return;
        };

        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            entry.banned_until = Some(Instant::now() + BAN_DURATION);
            entry.consecutive_failures = 0;
            tracing::warn!("Banned proxy {} for {:?}", addr, BAN_DURATION);
        }
    }

    /// Clears the failure count and any ban
    pub fn report_success(&self, addr: &ProxyAddr) {
        if let Some(entry) = self.pool().entry_mut(addr) {
            entry.consecutive_failures = 0;
            entry.banned_until = None;
        }
    }

    /// Snapshot of the pool
    pub fn entries(&self) -> Vec<ProxyEntry> {
        self.pool().entries.clone()
    }

    async fn refresh_if_needed(&self) {
        if !self.pool().needs_refresh(Instant::now()) {
            return;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited
        if !self.pool().needs_refresh(Instant::now()) {
            return;
        }

        let Some(list_url) = self.list_url.as_deref() else {
            return;
        };

        match self.fetch_list(list_url).await {
            Ok(addrs) if !addrs.is_empty() => {
                let count = addrs.len();
                self.pool().replace(addrs, Instant::now());
                tracing::info!("Loaded {} proxies from {}", count, list_url);
            }
            Ok(_) => {
                tracing::warn!("Proxy list at {} has no usable entries", list_url);
                self.pool().retry_at = Some(Instant::now() + LIST_RETRY_AFTER);
            }
            Err(e) => {
                tracing::error!("Failed to fetch proxy list from {}: {}", list_url, e);
                self.pool().retry_at = Some(Instant::now() + LIST_RETRY_AFTER);
            }
        }
    }

    async fn fetch_list(&self, list_url: &str) -> Result<Vec<ProxyAddr>, reqwest::Error> {
        let body = self
            .client
            .get(list_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_proxy_list(&body))
    }
}

/// Parses a proxy list body
///
/// Accepts a JSON array of strings or one entry per line. Entries without a
/// scheme are taken as `http://`. Blank lines, `#` comments and unparseable
/// entries are skipped.
pub fn parse_proxy_list(body: &str) -> Vec<ProxyAddr> {
    let trimmed = body.trim();
    let lines: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed).unwrap_or_default()
    } else {
        trimmed.lines().map(str::to_string).collect()
    };

    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_proxy_line)
        .collect()
}

fn parse_proxy_line(line: &str) -> Option<ProxyAddr> {
    let with_scheme = if line.contains("://") {
        line.to_string()
    } else {
        format!("http://{}", line)
    };

    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;

    Some(ProxyAddr {
        protocol: url.scheme().to_string(),
        host,
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn addr(host: &str, port: u16) -> ProxyAddr {
        ProxyAddr {
            protocol: "http".to_string(),
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_parse_lines() {
        let list = parse_proxy_list("10.0.0.1:8080\n\n# comment\nhttps://proxy.example:3128\nsocks5://10.0.0.2:1080\n:::bad");
        assert_eq!(list.len(), 3);
        assert_eq!(list[0], addr("10.0.0.1", 8080));
        assert_eq!(list[1].protocol, "https");
        assert_eq!(list[1].port, 3128);
        assert_eq!(list[2].protocol, "socks5");
    }

    #[test]
    fn test_parse_default_ports() {
        let list = parse_proxy_list("http://a.example\nhttps://b.example");
        assert_eq!(list[0].port, 80);
        assert_eq!(list[1].port, 443);
    }

    #[test]
    fn test_parse_json_array() {
        let list = parse_proxy_list(r#"["10.0.0.1:8080", "http://10.0.0.2:8081"]"#);
        assert_eq!(list, vec![addr("10.0.0.1", 8080), addr("10.0.0.2", 8081)]);
    }

    #[tokio::test]
    async fn test_no_list_means_direct() {
        let manager = ProxyManager::new(None).unwrap();
        assert!(manager.get_proxy().await.is_none());
    }

    #[tokio::test]
    async fn test_round_robin() {
        let manager = ProxyManager::with_proxies(vec![addr("a", 1), addr("b", 2)]).unwrap();
        assert_eq!(manager.get_proxy().await, Some(addr("a", 1)));
        assert_eq!(manager.get_proxy().await, Some(addr("b", 2)));
        assert_eq!(manager.get_proxy().await, Some(addr("a", 1)));
    }

    #[tokio::test]
    async fn test_three_failures_ban_until_success() {
        let manager = ProxyManager::with_proxies(vec![addr("a", 1), addr("b", 2)]).unwrap();
        let a = addr("a", 1);

        manager.report_failure(&a);
        manager.report_failure(&a);
        assert_eq!(manager.entries()[0].consecutive_failures, 2);
        manager.report_failure(&a);

        let entry = &manager.entries()[0];
        assert_eq!(entry.consecutive_failures, 0);
        assert!(entry.banned_until.is_some());

        for _ in 0..4 {
            assert_eq!(manager.get_proxy().await, Some(addr("b", 2)));
        }

        manager.report_success(&a);
        let picks = [manager.get_proxy().await, manager.get_proxy().await];
        assert!(picks.contains(&Some(a)));
    }

    #[tokio::test]
    async fn test_all_banned_goes_direct() {
        let manager = ProxyManager::with_proxies(vec![addr("a", 1)]).unwrap();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            manager.report_failure(&addr("a", 1));
        }
        assert!(manager.get_proxy().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_expires() {
        let manager = ProxyManager::with_proxies(vec![addr("a", 1)]).unwrap();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            manager.report_failure(&addr("a", 1));
        }
        assert!(manager.get_proxy().await.is_none());

        tokio::time::advance(BAN_DURATION + Duration::from_secs(1)).await;
        assert_eq!(manager.get_proxy().await, Some(addr("a", 1)));
    }

    #[test]
    fn test_reload_preserves_health() {
        let mut pool = ProxyPool::default();
        let now = Instant::now();
        pool.replace(vec![addr("a", 1), addr("b", 2)], now);
        pool.entry_mut(&addr("a", 1)).unwrap().consecutive_failures = 2;

        pool.replace(vec![addr("c", 3), addr("a", 1)], now);
        assert_eq!(pool.entries.len(), 2);
        assert_eq!(pool.entry_mut(&addr("a", 1)).unwrap().consecutive_failures, 2);
        assert_eq!(pool.entry_mut(&addr("c", 3)).unwrap().consecutive_failures, 0);
        assert!(pool.entry_mut(&addr("b", 2)).is_none());
    }

    #[tokio::test]
    async fn test_loads_list_from_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("10.0.0.1:8080\n10.0.0.2:8080\n"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = ProxyManager::new(Some(format!("{}/proxies.txt", server.uri()))).unwrap();
        assert_eq!(manager.get_proxy().await, Some(addr("10.0.0.1", 8080)));
        assert_eq!(manager.get_proxy().await, Some(addr("10.0.0.2", 8080)));
        assert_eq!(manager.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_list_times_out_and_goes_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("10.0.0.1:8080\n")
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let manager = ProxyManager::new(Some(format!("{}/proxies.txt", server.uri()))).unwrap();
        let picked = tokio::time::timeout(LIST_FETCH_TIMEOUT * 2, manager.get_proxy())
            .await
            .expect("list fetch is bounded by its timeout");
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_list_goes_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let manager = ProxyManager::new(Some(format!("{}/proxies.txt", server.uri()))).unwrap();
        assert!(manager.get_proxy().await.is_none());
    }
}
