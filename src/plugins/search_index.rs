//! Search-index push
//!
//! Posts each kept page as a JSON document to `{node}/{index}/_doc`, the
//! document endpoint of Elasticsearch-compatible engines.

use crate::config::IndexerConfig;
use crate::crawler::ParsedResult;
use crate::plugins::{Indexer, PluginError, PluginResult};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::time::Duration;

const INDEX_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct IndexDocument<'a> {
    url: &'a str,
    title: &'a str,
    content: &'a str,
    metadata: serde_json::Value,
    links_count: usize,
    timestamp: String,
}

/// Pushes parsed pages to a search index
pub struct SearchIndexer {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl SearchIndexer {
    pub fn new(config: &IndexerConfig) -> PluginResult<Self> {
        let client = reqwest::Client::builder().timeout(INDEX_TIMEOUT).build()?;
        Ok(Self {
            endpoint: document_endpoint(&config.node, &config.index),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn document_endpoint(node: &str, index: &str) -> String {
    format!("{}/{}/_doc", node.trim_end_matches('/'), index)
}

#[async_trait]
impl Indexer for SearchIndexer {
    fn name(&self) -> &str {
        "search-index"
    }

    async fn index(&self, result: &ParsedResult) -> PluginResult<()> {
        let metadata = result
            .extracted_data
            .as_ref()
            .and_then(|data| data.get("metadata").cloned())
            .unwrap_or_else(|| serde_json::json!({}));

        let document = IndexDocument {
            url: &result.url,
            title: &result.title,
            content: &result.text,
            metadata,
            links_count: result.links.len(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut request = self.client.post(&self.endpoint).json(&document);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("ApiKey {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PluginError::Failed(format!(
                "index returned HTTP {}",
                response.status().as_u16()
            )));
        }

        tracing::debug!("Indexed {}", result.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result() -> ParsedResult {
        let mut data = serde_json::Map::new();
        data.insert("metadata".to_string(), serde_json::json!({"author": "Ada"}));
        ParsedResult {
            url: "https://example.com/".to_string(),
            title: "Home".to_string(),
            links: vec!["https://example.com/a".to_string()],
            text: "hello".to_string(),
            extracted_data: Some(data),
            content_type: Some("text/html".to_string()),
        }
    }

    #[test]
    fn test_endpoint_trims_slashes() {
        assert_eq!(
            document_endpoint("http://search:9200//", "pages"),
            "http://search:9200/pages/_doc"
        );
    }

    #[tokio::test]
    async fn test_posts_document_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages/_doc"))
            .and(header("authorization", "ApiKey secret"))
            .and(body_partial_json(serde_json::json!({
                "url": "https://example.com/",
                "title": "Home",
                "content": "hello",
                "metadata": {"author": "Ada"},
                "links_count": 1
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let indexer = SearchIndexer::new(&IndexerConfig {
            node: server.uri(),
            index: "pages".to_string(),
            api_key: Some("secret".to_string()),
        })
        .unwrap();

        indexer.index(&result()).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let indexer = SearchIndexer::new(&IndexerConfig {
            node: server.uri(),
            index: "pages".to_string(),
            api_key: None,
        })
        .unwrap();

        assert!(indexer.index(&result()).await.is_err());
    }
}
