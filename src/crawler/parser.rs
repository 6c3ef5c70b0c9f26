//! Link and text extraction
//!
//! This module turns a fetched response into a [`ParsedResult`]:
//! - Page title and anchor links, resolved against the page URL
//! - Domain-scope and spider-trap filtering of those links
//! - Visible body text, used only for content fingerprinting
//! - Plugin dispatch: full-parse overrides for non-HTML types, field
//!   extractors over the HTML parse

use crate::plugins::PluginRegistry;
use crate::url::{extract_domain, is_spider_trap, resolve_link};
use crate::{UrlError, UrlResult};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Elements whose text never counts as page content
const NON_CONTENT_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "iframe", "embed", "object", "template", "svg",
];

/// Maximum extracted links for a page to still look like an unrendered app
const SPA_MAX_LINKS: usize = 2;

/// Output of parsing one page
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResult {
    pub url: String,
    pub title: String,
    pub links: Vec<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Parses fetched pages and filters their links
pub struct LinkExtractor {
    domain_filter: bool,
    max_depth: u32,
    plugins: Arc<PluginRegistry>,
}

impl LinkExtractor {
    /// Creates an extractor
    ///
    /// # Arguments
    ///
    /// * `domain_filter` - Keep off-site pages from leading further off-site
    /// * `max_depth` - Maximum path segment count of a followed link
    /// * `plugins` - Parser plugins to dispatch to
    pub fn new(domain_filter: bool, max_depth: u32, plugins: Arc<PluginRegistry>) -> Self {
        Self {
            domain_filter,
            max_depth,
            plugins,
        }
    }

    /// Parses a fetched response
    ///
    /// The first plugin claiming the media type parses the body; a plugin
    /// error falls through to the next claimant. HTML (and responses without
    /// a content type) take the default path. Anything else, e.g. PDFs or
    /// images, yields a result with no links and no text.
    ///
    /// # Arguments
    ///
    /// * `page_url` - URL the body was fetched from
    /// * `body` - Raw response bytes
    /// * `content_type` - Content-Type header, if any
    /// * `original_domain` - Domain of the crawl's seed, if known
    pub fn parse(
        &self,
        page_url: &str,
        body: &[u8],
        content_type: Option<&str>,
        original_domain: Option<&str>,
    ) -> UrlResult<ParsedResult> {
        let base = Url::parse(page_url).map_err(|e| UrlError::Parse(e.to_string()))?;
        let media_type = content_type.map(media_type_of).unwrap_or_default();

        if let Some(content_type) = content_type {
            for parser in self.plugins.parsers_for(&media_type) {
                match parser.parse(&base, body, original_domain, content_type) {
                    Ok(mut result) => {
                        result.links = self.filter_links(&base, result.links, original_domain);
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::warn!("Parser plugin {} failed on {}: {}", parser.name(), page_url, e);
                    }
                }
            }
        }

        if media_type.is_empty() || is_html_type(&media_type) {
            let html = String::from_utf8_lossy(body);
            let mut result = self.parse_document(&base, &html, original_domain);
            result.content_type = content_type.map(str::to_string);
            return Ok(result);
        }

        tracing::debug!("No parser for {} ({}), keeping raw content only", page_url, media_type);
        Ok(ParsedResult {
            url: base.to_string(),
            content_type: content_type.map(str::to_string),
            ..Default::default()
        })
    }

    /// Parses an HTML string, e.g. the output of the renderer
    pub fn parse_html(
        &self,
        page_url: &str,
        html: &str,
        original_domain: Option<&str>,
    ) -> UrlResult<ParsedResult> {
        let base = Url::parse(page_url).map_err(|e| UrlError::Parse(e.to_string()))?;
        let mut result = self.parse_document(&base, html, original_domain);
        result.content_type = Some("text/html".to_string());
        Ok(result)
    }

    fn parse_document(&self, base: &Url, html: &str, original_domain: Option<&str>) -> ParsedResult {
        let document = Html::parse_document(html);

        let links = extract_links(&document, base);
        let links = self.filter_links(base, links, original_domain);

        ParsedResult {
            url: base.to_string(),
            title: extract_title(&document).unwrap_or_default(),
            links,
            text: extract_text(&document),
            extracted_data: self.plugins.run_extractors(base, &document),
            content_type: None,
        }
    }

    /// Applies the domain-scope and spider-trap filters
    ///
    /// The scope filter only engages on pages whose host differs from the
    /// original domain; such a page is still parsed, but only its links back
    /// to the original domain are kept.
    fn filter_links(&self, page: &Url, links: Vec<String>, original_domain: Option<&str>) -> Vec<String> {
        let scope = original_domain
            .map(str::to_lowercase)
            .filter(|domain| self.domain_filter && extract_domain(page).as_deref() != Some(domain.as_str()));

        links
            .into_iter()
            .filter(|link| {
                let Ok(url) = Url::parse(link) else {
                    return false;
                };

                if let Some(domain) = &scope {
                    if extract_domain(&url).as_deref() != Some(domain.as_str()) {
                        return false;
                    }
                }

                if is_spider_trap(url.path(), self.max_depth) {
                    tracing::debug!("Dropping spider-trap link {}", link);
                    return false;
                }

                true
            })
            .collect()
    }
}

/// Media type without parameters, lowercased
fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

fn is_html_type(media_type: &str) -> bool {
    media_type == "text/html" || media_type == "application/xhtml+xml"
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts anchor targets, in document order and without duplicates
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Ok(a_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&a_selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Visible text of the body with whitespace collapsed
fn extract_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    let mut words: Vec<&str> = Vec::new();
    collect_text(root, &mut words);
    words.join(" ")
}

fn collect_text<'a>(element: ElementRef<'a>, words: &mut Vec<&'a str>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => words.extend(text.split_whitespace()),
            Node::Element(el) if NON_CONTENT_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, words);
                }
            }
            _ => {}
        }
    }
}

/// Whether an HTML page looks like an app shell that needs rendering
///
/// All three signals must be present: a `<script>` tag, a `#root` or `#app`
/// mount element, and at most two extracted links.
pub fn looks_like_spa(html: &str, link_count: usize) -> bool {
    if link_count > SPA_MAX_LINKS {
        return false;
    }

    let document = Html::parse_document(html);
    let has = |selector: &str| {
        Selector::parse(selector)
            .map(|s| document.select(&s).next().is_some())
            .unwrap_or(false)
    };

    has("script") && has("#root, #app")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{MetadataExtractor, NonHtmlParser, Plugin};

    fn extractor(domain_filter: bool) -> LinkExtractor {
        let plugins = PluginRegistry::new()
            .with(Plugin::Parser(Arc::new(NonHtmlParser::new())))
            .with(Plugin::Extractor(Arc::new(MetadataExtractor)));
        LinkExtractor::new(domain_filter, 5, Arc::new(plugins))
    }

    fn parse_html(html: &str) -> ParsedResult {
        extractor(false)
            .parse("https://example.com/page", html.as_bytes(), Some("text/html"), None)
            .unwrap()
    }

    #[test]
    fn test_extract_title() {
        let parsed = parse_html(r#"<html><head><title>  Test Page  </title></head><body></body></html>"#);
        assert_eq!(parsed.title, "Test Page");
    }

    #[test]
    fn test_no_title() {
        let parsed = parse_html(r#"<html><head></head><body></body></html>"#);
        assert_eq!(parsed.title, "");
    }

    #[test]
    fn test_extract_relative_and_absolute_links() {
        let parsed = parse_html(
            r#"<html><body>
                <a href="/page1">Link 1</a>
                <a href="page2">Link 2</a>
                <a href="https://other.com/page3">Link 3</a>
            </body></html>"#,
        );
        assert_eq!(
            parsed.links,
            vec![
                "https://example.com/page1",
                "https://example.com/page2",
                "https://other.com/page3"
            ]
        );
    }

    #[test]
    fn test_mixed_valid_and_invalid_links() {
        let parsed = parse_html(
            r##"<html><body>
                <a href="/valid">Valid</a>
                <a href="javascript:alert('no')">Invalid</a>
                <a href="mailto:test@example.com">Invalid</a>
                <a href="ftp://example.com/file">Invalid</a>
                <a href="#top">Invalid</a>
                <a href="/valid#section">Duplicate</a>
                <a href="/another-valid">Valid</a>
            </body></html>"##,
        );
        assert_eq!(
            parsed.links,
            vec!["https://example.com/valid", "https://example.com/another-valid"]
        );
    }

    #[test]
    fn test_spider_traps_are_dropped() {
        let parsed = parse_html(
            r#"<html><body>
                <a href="/calendar/2026/01/01/calendar/2026/01/01">Trap</a>
                <a href="/a/b/a/b">Trap</a>
                <a href="/x/x/x">Trap</a>
                <a href="/1/2/3/4/5/6">Too deep</a>
                <a href="/1/2/3">Fine</a>
                <a href="/normal/page">Fine</a>
            </body></html>"#,
        );
        assert_eq!(
            parsed.links,
            vec!["https://example.com/1/2/3", "https://example.com/normal/page"]
        );
    }

    #[test]
    fn test_scope_filter_only_off_site() {
        let html = r#"<html><body>
            <a href="https://example.com/back">Back</a>
            <a href="https://third.party/next">Next</a>
        </body></html>"#;

        // On-site page: links are unrestricted
        let on_site = extractor(true)
            .parse("https://example.com/", html.as_bytes(), Some("text/html"), Some("example.com"))
            .unwrap();
        assert_eq!(on_site.links.len(), 2);

        // Off-site page: only links back to the original domain survive
        let off_site = extractor(true)
            .parse("https://elsewhere.net/", html.as_bytes(), Some("text/html"), Some("example.com"))
            .unwrap();
        assert_eq!(off_site.links, vec!["https://example.com/back"]);

        // Filter disabled
        let unfiltered = extractor(false)
            .parse("https://elsewhere.net/", html.as_bytes(), Some("text/html"), Some("example.com"))
            .unwrap();
        assert_eq!(unfiltered.links.len(), 2);
    }

    #[test]
    fn test_body_text_strips_non_content() {
        let parsed = parse_html(
            r#"<html><head><title>T</title><style>.a{}</style></head><body>
                <h1>Hello</h1>
                <script>var tracking = 1;</script>
                <p>  crawl
                   the   web </p>
                <noscript>enable js</noscript>
                <template><p>hidden</p></template>
            </body></html>"#,
        );
        assert_eq!(parsed.text, "Hello crawl the web");
    }

    #[test]
    fn test_extractors_fill_extracted_data() {
        let parsed = parse_html(
            r#"<html lang="en"><head><meta name="description" content="About"></head><body></body></html>"#,
        );
        let data = parsed.extracted_data.unwrap();
        assert_eq!(data["metadata"]["description"], "About");
    }

    #[test]
    fn test_plugin_claims_json() {
        let parsed = extractor(false)
            .parse(
                "https://example.com/api",
                br#"{"next": "https://example.com/api?page=2"}"#,
                Some("application/json; charset=utf-8"),
                Some("example.com"),
            )
            .unwrap();
        assert_eq!(parsed.links, vec!["https://example.com/api?page=2"]);
        assert_eq!(parsed.extracted_data.unwrap()["method"], "non-html-plugin");
    }

    #[test]
    fn test_binary_content_passes_through_empty() {
        let parsed = extractor(false)
            .parse(
                "https://example.com/file.pdf",
                &[0x25, 0x50, 0x44, 0x46, 0xff],
                Some("application/pdf"),
                None,
            )
            .unwrap();
        assert!(parsed.links.is_empty());
        assert!(parsed.text.is_empty());
        assert_eq!(parsed.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_missing_content_type_is_html() {
        let parsed = extractor(false)
            .parse("https://example.com/", b"<a href=\"/x\">x</a>", None, None)
            .unwrap();
        assert_eq!(parsed.links, vec!["https://example.com/x"]);
    }

    #[test]
    fn test_invalid_page_url() {
        assert!(extractor(false).parse("not a url", b"", None, None).is_err());
    }

    #[test]
    fn test_spa_signals() {
        let shell = r#"<html><body><div id="root"></div><script src="/app.js"></script></body></html>"#;
        assert!(looks_like_spa(shell, 0));
        assert!(looks_like_spa(shell, 2));
        assert!(!looks_like_spa(shell, 3));

        let no_mount = r#"<html><body><div id="main"></div><script></script></body></html>"#;
        assert!(!looks_like_spa(no_mount, 0));

        let no_script = r#"<html><body><div id="app"></div></body></html>"#;
        assert!(!looks_like_spa(no_script, 0));
    }
}
