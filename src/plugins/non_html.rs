//! Parser for JSON, XML feeds, sitemaps and plain text

use crate::crawler::ParsedResult;
use crate::plugins::{FullParser, PluginResult};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

const HANDLED_TYPES: &[&str] = &[
    "application/json",
    "text/plain",
    "application/xml",
    "text/xml",
    "application/rss+xml",
    "application/atom+xml",
];

const MAX_TITLE_CHARS: usize = 200;
const MAX_TEXT_CHARS: usize = 1000;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>]+"#).expect("URL regex is valid") // Static pattern, safe to panic
});

static LOC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc\b[^>]*>(.*?)</loc>").expect("loc regex is valid") // Static pattern, safe to panic
});

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<link\b([^>]*?)(?:/>|>(.*?)</link>)").expect("link regex is valid") // Static pattern, safe to panic
});

static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("href regex is valid") // Static pattern, safe to panic
});

static TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("title regex is valid") // Static pattern, safe to panic
});

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<[^>]*>").expect("tag regex is valid") // Static pattern, safe to panic
});

/// Extracts links from structured, non-HTML responses
///
/// - JSON and plain text: every `http(s)://` URL in the body
/// - XML: sitemap `<loc>` entries and RSS/Atom `<link>` targets, falling back
///   to a URL scan when the document has neither
///
/// Links are defragmented and deduplicated. When the crawl's original domain
/// is known, only links whose host ends with it are kept.
#[derive(Debug, Default)]
pub struct NonHtmlParser;

impl NonHtmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl FullParser for NonHtmlParser {
    fn name(&self) -> &str {
        "non-html"
    }

    fn handles(&self, media_type: &str) -> bool {
        HANDLED_TYPES.contains(&media_type)
    }

    fn parse(
        &self,
        base_url: &Url,
        body: &[u8],
        original_domain: Option<&str>,
        content_type: &str,
    ) -> PluginResult<ParsedResult> {
        let content = String::from_utf8_lossy(body);
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        tracing::debug!("Parsing {} as {}", base_url, media_type);

        let mut title = base_url.to_string();
        let (raw_links, text) = if media_type.contains("json") {
            (scan_urls(&content), json_text(&content))
        } else if media_type.contains("xml") {
            if let Some(found) = TITLE_PATTERN
                .captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| unescape_xml(strip_cdata(m.as_str())))
                .filter(|t| !t.is_empty())
            {
                title = found;
            }

            let mut links = xml_links(&content);
            if links.is_empty() {
                links = scan_urls(&content);
            }
            (links, truncate(&collapse(&TAG_PATTERN.replace_all(&content, " ")), MAX_TEXT_CHARS))
        } else {
            (scan_urls(&content), truncate(&content, MAX_TEXT_CHARS))
        };

        let mut seen = HashSet::new();
        let links = raw_links
            .iter()
            .filter_map(|link| normalize(link, base_url))
            .filter(|link| within_domain(link, original_domain))
            .filter(|link| seen.insert(link.clone()))
            .collect();

        let mut extracted = serde_json::Map::new();
        extracted.insert("method".to_string(), "non-html-plugin".into());
        extracted.insert("type".to_string(), content_type.into());

        Ok(ParsedResult {
            url: base_url.to_string(),
            title: truncate(&title, MAX_TITLE_CHARS),
            links,
            text,
            extracted_data: Some(extracted),
            content_type: Some(content_type.to_string()),
        })
    }
}

fn scan_urls(content: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn xml_links(content: &str) -> Vec<String> {
    let mut links: Vec<String> = LOC_PATTERN
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| unescape_xml(strip_cdata(m.as_str())))
        .filter(|s| !s.is_empty())
        .collect();

    for captures in LINK_PATTERN.captures_iter(content) {
        let href = captures
            .get(1)
            .and_then(|attrs| HREF_ATTR.captures(attrs.as_str()))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let inner = captures.get(2).map(|m| strip_cdata(m.as_str()).to_string());

        if let Some(target) = href.or(inner).map(|s| unescape_xml(s.trim())) {
            if !target.is_empty() {
                links.push(target);
            }
        }
    }

    links
}

/// String values of a JSON document, or the raw body when it is not JSON
fn json_text(content: &str) -> String {
    fn collect(value: &serde_json::Value, out: &mut Vec<String>) {
        match value {
            serde_json::Value::String(s) => out.push(s.clone()),
            serde_json::Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            serde_json::Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }

    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => {
            let mut parts = Vec::new();
            collect(&value, &mut parts);
            truncate(&collapse(&parts.join(" ")), MAX_TEXT_CHARS)
        }
        Err(_) => truncate(content, MAX_TEXT_CHARS),
    }
}

fn normalize(link: &str, base_url: &Url) -> Option<String> {
    let mut url = base_url.join(link.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn within_domain(link: &str, original_domain: Option<&str>) -> bool {
    let Some(domain) = original_domain else {
        return true;
    };
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .is_some_and(|host| host.ends_with(&domain.to_lowercase()))
}

fn strip_cdata(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
        .unwrap_or(s)
        .trim()
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
