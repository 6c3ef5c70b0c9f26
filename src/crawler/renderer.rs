//! Headless-render fallback
//!
//! Pages that look like client-side apps are handed to a render service that
//! executes their scripts and returns the resulting HTML. The crawler talks
//! to it through the [`Renderer`] trait.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Time allowed for one render, including waiting for network idle
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by a renderer
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render cancelled")]
    Cancelled,

    #[error("render of {url} timed out")]
    Timeout { url: String },

    #[error("render service returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("render request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Produces fully executed HTML for a URL
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, cancel: &CancellationToken) -> Result<String, RenderError>;
}

/// Client for an HTTP render service
///
/// Sends `GET {endpoint}?url={url}` and takes the response body as the
/// rendered HTML.
pub struct RenderServiceClient {
    endpoint: String,
    client: reqwest::Client,
}

impl RenderServiceClient {
    pub fn new(endpoint: impl Into<String>, user_agent: &str) -> Result<Self, RenderError> {
        Self::with_timeout(endpoint, user_agent, RENDER_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Renderer for RenderServiceClient {
    async fn render(&self, url: &str, cancel: &CancellationToken) -> Result<String, RenderError> {
        tracing::info!("Rendering {} via {}", url, self.endpoint);

        let request = async {
            let response = self
                .client
                .get(&self.endpoint)
                .query(&[("url", url)])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(RenderError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            Ok::<_, RenderError>(response.text().await?)
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RenderError::Cancelled),
            result = request => result,
        };

        result.map_err(|e| match e {
            RenderError::Request(source) if source.is_timeout() => RenderError::Timeout {
                url: url.to_string(),
            },
            other => other,
        })
    }
}
