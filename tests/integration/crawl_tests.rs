//! End-to-end crawl tests
//!
//! These tests use wiremock to create mock HTTP servers and run the worker
//! pool against file-backed frontier and document databases.

use crate::support::{create_test_config, wait_for, TestFleet};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sumi_fleet::crawler::{JobOutcome, RenderError, Renderer};
use sumi_fleet::frontier::CrawlJob;
use sumi_fleet::storage::StorageService;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Home</title></head><body>
               <p>Welcome to the home page where the crawl begins.</p>
               <a href="/about">About</a>
               <a href="/blog">Blog</a>
               <a href="/private/admin">Admin</a>
               </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(
            r#"<html><head><title>About</title></head><body>
               <p>We build small tools for gardeners and beekeepers.</p>
               <a href="/">Home</a>
               </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(html(
            r#"<html><head><title>Blog</title></head><body>
               <p>Notes on compilers, parsers and incremental build systems.</p>
               </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private/admin"))
        .respond_with(html("<html><body>secret</body></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::new(&config);

    fleet.frontier.add_url(&format!("{}/", base), 0, None).unwrap();

    let pool = fleet.worker_pool(&config);
    let shutdown = CancellationToken::new();
    let running = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    let storage = Arc::clone(&fleet.storage);
    let frontier = Arc::clone(&fleet.frontier);
    wait_for(Duration::from_secs(10), "three stored pages and a drained frontier", || {
        storage.document_count().unwrap() == 3
            && frontier.counts().unwrap().pending() == 0
            && pool.active_jobs() == 0
    })
    .await;

    shutdown.cancel();
    running.await.unwrap().unwrap();

    let home = fleet
        .storage
        .get_parsed_data(&format!("{}/", base))
        .await
        .unwrap()
        .expect("home page stored");
    assert_eq!(home.title, "Home");
    assert_eq!(home.links.len(), 3);

    assert!(fleet
        .storage
        .get_document(&format!("{}/private/admin", base))
        .await
        .unwrap()
        .is_none());
    assert_eq!(fleet.frontier.counts().unwrap().failed, 0);
}

#[tokio::test]
async fn test_rate_limited_page_retries_then_dead_letters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::new(&config);
    let url = format!("{}/busy", server.uri());
    fleet.frontier.add_url(&url, 0, None).unwrap();

    let pool = fleet.worker_pool(&config);
    let shutdown = CancellationToken::new();
    let running = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    let frontier = Arc::clone(&fleet.frontier);
    wait_for(Duration::from_secs(10), "the job to be dead-lettered", || {
        frontier.counts().unwrap().failed == 1
    })
    .await;

    shutdown.cancel();
    running.await.unwrap().unwrap();

    let letters = fleet.frontier.dead_letters(10).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].job.url, url);
    assert_eq!(letters[0].attempts_made, 3);
    assert_eq!(letters[0].last_error.as_deref(), Some("HTTP 429"));

    let errors = fleet.frontier.recent_errors(10).unwrap();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0].attempt, 3);
    assert!(fleet.storage.get_document(&url).await.unwrap().is_none());
}

struct StaticRenderer {
    html: Option<String>,
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, url: &str, _cancel: &CancellationToken) -> Result<String, RenderError> {
        match &self.html {
            Some(html) => Ok(html.clone()),
            None => Err(RenderError::Status {
                url: url.to_string(),
                status: 502,
            }),
        }
    }
}

const APP_SHELL: &str = r#"<html><head><title>App</title></head>
    <body><div id="root"></div><script src="/bundle.js"></script></body></html>"#;

async fn app_shell_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app"))
        .respond_with(html(APP_SHELL))
        .mount(&server)
        .await;
    server
}

fn app_job(server: &MockServer) -> CrawlJob {
    CrawlJob {
        url: format!("{}/app", server.uri()),
        depth: 0,
        original_domain: "127.0.0.1".to_string(),
    }
}

#[tokio::test]
async fn test_spa_is_rendered_and_reparsed() {
    let server = app_shell_server().await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());

    let rendered = r#"<html><head><title>Rendered App</title></head><body>
        <p>Dashboard content produced by client-side scripts.</p>
        <a href="/app/one">One</a><a href="/app/two">Two</a><a href="/app/three">Three</a>
        </body></html>"#;
    let fleet = TestFleet::with_renderer(
        &config,
        Arc::new(StaticRenderer {
            html: Some(rendered.to_string()),
        }),
    );

    let job = app_job(&server);
    let outcome = fleet.pipeline.process(&job, &CancellationToken::new()).await;
    assert_eq!(outcome, JobOutcome::Success);

    let parsed = fleet.storage.get_parsed_data(&job.url).await.unwrap().unwrap();
    assert_eq!(parsed.title, "Rendered App");
    assert_eq!(parsed.links.len(), 3);

    let raw = fleet.storage.get_raw_content(&job.url).await.unwrap().unwrap();
    assert_eq!(String::from_utf8(raw).unwrap(), rendered);

    let queued = fleet.frontier.waiting_jobs(10).unwrap();
    assert_eq!(queued.len(), 3);
    assert!(queued.iter().all(|q| q.job.depth == 1));
}

#[tokio::test]
async fn test_render_failure_falls_back_to_fetched_html() {
    let server = app_shell_server().await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::with_renderer(&config, Arc::new(StaticRenderer { html: None }));

    let job = app_job(&server);
    let outcome = fleet.pipeline.process(&job, &CancellationToken::new()).await;
    assert_eq!(outcome, JobOutcome::Success);

    let parsed = fleet.storage.get_parsed_data(&job.url).await.unwrap().unwrap();
    assert_eq!(parsed.title, "App");
    assert!(parsed.links.is_empty());

    let raw = fleet.storage.get_raw_content(&job.url).await.unwrap().unwrap();
    assert_eq!(String::from_utf8(raw).unwrap(), APP_SHELL);
}

#[tokio::test]
async fn test_json_response_uses_plugin_parser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                format!(
                    r#"{{"next": "{0}/api/pages?page=2", "elsewhere": "https://other.test/x"}}"#,
                    server.uri()
                ),
                "application/json",
            ),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::new(&config);

    let job = CrawlJob {
        url: format!("{}/api/pages", server.uri()),
        depth: 0,
        original_domain: "127.0.0.1".to_string(),
    };
    let outcome = fleet.pipeline.process(&job, &CancellationToken::new()).await;
    assert_eq!(outcome, JobOutcome::Success);

    let parsed = fleet.storage.get_parsed_data(&job.url).await.unwrap().unwrap();
    assert_eq!(parsed.links, vec![format!("{}/api/pages?page=2", server.uri())]);
    let data = parsed.extracted_data.unwrap();
    assert_eq!(data["method"], "non-html-plugin");
}
