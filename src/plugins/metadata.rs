//! SEO and OpenGraph metadata extractor

use crate::plugins::{FieldExtractor, PluginResult};
use scraper::{Html, Selector};
use serde_json::json;
use url::Url;

/// Collects description, keywords, author, OpenGraph fields, the canonical
/// URL and the document language
///
/// Missing values are empty strings; the language defaults to `en`.
#[derive(Debug, Default)]
pub struct MetadataExtractor;

impl FieldExtractor for MetadataExtractor {
    fn name(&self) -> &str {
        "metadata"
    }

    fn extract(&self, _url: &Url, document: &Html) -> PluginResult<serde_json::Value> {
        let description = non_empty(meta(document, "description"))
            .unwrap_or_else(|| meta(document, "og:description"));

        let language = attr(document, "html", "lang")
            .or_else(|| non_empty(meta(document, "og:locale")))
            .unwrap_or_else(|| "en".to_string());

        Ok(json!({
            "description": description,
            "keywords": meta(document, "keywords"),
            "author": meta(document, "author"),
            "ogTitle": meta(document, "og:title"),
            "ogImage": meta(document, "og:image"),
            "ogUrl": meta(document, "og:url"),
            "canonicalUrl": attr(document, r#"link[rel="canonical"]"#, "href").unwrap_or_default(),
            "language": language,
        }))
    }
}

/// Content of `<meta name=...>` or, failing that, `<meta property=...>`
fn meta(document: &Html, key: &str) -> String {
    attr(document, &format!(r#"meta[name="{}"]"#, key), "content")
        .or_else(|| attr(document, &format!(r#"meta[property="{}"]"#, key), "content"))
        .unwrap_or_default()
}

/// Trimmed, non-empty attribute of the first element matching a selector
fn attr(document: &Html, selector: &str, name: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr(name))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
