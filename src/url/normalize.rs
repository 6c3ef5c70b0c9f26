use url::Url;

/// Resolves a link href against a base URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel:, data: schemes
/// - fragment-only links (same page anchors)
/// - invalid URLs
/// - non-HTTP(S) URLs after resolution
///
/// The fragment of the resolved URL is dropped so `/page#a` and `/page#b`
/// count as one URL for duplicate elimination.
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/docs/index.html").unwrap();
/// assert_eq!(
///     resolve_link("guide#intro", &base),
///     Some("https://example.com/docs/guide".to_string())
/// );
/// assert_eq!(resolve_link("mailto:a@b.com", &base), None);
/// ```
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    if absolute.host_str().is_none() {
        return None;
    }

    absolute.set_fragment(None);
    Some(absolute.to_string())
}
