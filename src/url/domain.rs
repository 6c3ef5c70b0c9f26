use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// If the URL has no host, it returns None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_fleet::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a URL string and returns its lowercase host
///
/// Used wherever a job's domain must be derived from a raw URL, e.g. when a
/// seed is added without an explicit original domain.
pub fn domain_of(url_str: &str) -> UrlResult<String> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    extract_domain(&url).ok_or(UrlError::MissingDomain)
}

/// Returns the origin (`scheme://host[:port]`) of a URL
///
/// Politeness state is keyed by origin, so `http://a.com` and `https://a.com`
/// are paced independently.
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::origin_key;
///
/// assert_eq!(origin_key("https://example.com/a/b?q=1").unwrap(), "https://example.com");
/// assert_eq!(origin_key("http://example.com:8080/").unwrap(), "http://example.com:8080");
/// ```
pub fn origin_key(url_str: &str) -> UrlResult<String> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }
    Ok(url.origin().ascii_serialization())
}
