//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent
//! - Routing requests through an optional proxy
//! - Reading bodies as raw bytes, so binary payloads pass through intact
//! - Aborting in-flight requests when the job is cancelled

use crate::config::UserAgentConfig;
use crate::crawler::proxy::ProxyAddr;
use reqwest::{header::CONTENT_TYPE, Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Per-request timeout
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot use proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A fetched response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status: u16,

    /// Content-Type header value, if any
    pub content_type: Option<String>,

    /// Raw body bytes
    pub body: Vec<u8>,

    /// Time from request start to the last body byte
    pub elapsed: Duration,
}

impl FetchedPage {
    /// Media type without parameters, lowercased
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .filter(|ct| !ct.is_empty())
    }

    /// True for HTML responses; a missing content type counts as HTML
    pub fn is_html(&self) -> bool {
        match self.media_type() {
            Some(media) => media == "text/html" || media == "application/xhtml+xml",
            None => true,
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `proxy` - Route every request through this proxy
/// * `timeout` - Total time allowed per request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_fleet::config::UserAgentConfig;
/// use sumi_fleet::crawler::{build_http_client, FETCH_TIMEOUT};
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiFleet".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, None, FETCH_TIMEOUT).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    proxy: Option<&ProxyAddr>,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy.url())?);
    }

    builder.build()
}

/// Fetches pages directly or through a proxy
///
/// One client is kept per proxy so connections are pooled per route.
pub struct Fetcher {
    user_agent: UserAgentConfig,
    timeout: Duration,
    direct: Client,
    proxied: Mutex<HashMap<ProxyAddr, Client>>,
}

impl Fetcher {
    pub fn new(user_agent: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Self::with_timeout(user_agent, FETCH_TIMEOUT)
    }

    pub fn with_timeout(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            user_agent: user_agent.clone(),
            timeout,
            direct: build_http_client(user_agent, None, timeout)?,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyAddr>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, Some(proxy), self.timeout).map_err(
            |source| FetchError::Proxy {
                proxy: proxy.to_string(),
                source,
            },
        )?;
        clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }

    /// Fetches a URL
    ///
    /// Any HTTP status is returned as a page; only transport problems and
    /// cancellation are errors.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `proxy` - Optional proxy to route through
    /// * `cancel` - Aborts the request when cancelled
    pub async fn fetch(
        &self,
        url: &str,
        proxy: Option<&ProxyAddr>,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage, FetchError> {
        let client = self.client_for(proxy)?;
        let started = Instant::now();

        let request = async {
            let response = client.get(url).send().await?;
            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;

            Ok::<_, reqwest::Error>(FetchedPage {
                final_url,
                status,
                content_type,
                body: body.to_vec(),
                elapsed: started.elapsed(),
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result.map_err(|e| classify(url, e)),
        }
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        let config = create_test_config();
        assert!(build_http_client(&config, None, FETCH_TIMEOUT).is_ok());
    }

    #[test]
    fn test_build_proxied_client() {
        let config = create_test_config();
        let proxy = ProxyAddr {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3128,
        };
        assert!(build_http_client(&config, Some(&proxy), FETCH_TIMEOUT).is_ok());
    }

    #[test]
    fn test_media_type() {
        let page = FetchedPage {
            final_url: "https://example.com/".to_string(),
            status: 200,
            content_type: Some("Text/HTML; charset=utf-8".to_string()),
            body: Vec::new(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(page.media_type().as_deref(), Some("text/html"));
        assert!(page.is_html());

        let pdf = FetchedPage {
            content_type: Some("application/pdf".to_string()),
            ..page
        };
        assert!(!pdf.is_html());
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent_and_keeps_bytes() {
        let server = MockServer::start().await;
        let bytes = vec![0x25, 0x50, 0x44, 0x46, 0xff, 0xfe, 0x00];
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .and(header(
                "user-agent",
                "TestCrawler/1.0 (+https://example.com/about; admin@example.com)",
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(bytes.clone()),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let page = fetcher
            .fetch(&format!("{}/doc.pdf", server.uri()), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.body, bytes);
        assert!(!page.is_html());
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let page = fetcher
            .fetch(&server.uri(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.status, 503);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher =
            Fetcher::with_timeout(&create_test_config(), Duration::from_millis(200)).unwrap();
        let result = fetcher
            .fetch(&server.uri(), None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancel_aborts_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = fetcher.fetch(&server.uri(), None, &token).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let result = fetcher
            .fetch("http://127.0.0.1:1/", None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::Network { .. })));
    }
}
