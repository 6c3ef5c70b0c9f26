use crate::config::types::{Config, CrawlerConfig, DedupConfig, QueueConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_queue_config(&config.queue)?;
    validate_dedup_config(&config.dedup)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "storage database_path cannot be empty".to_string(),
        ));
    }

    if let Some(renderer) = &config.renderer {
        validate_http_url("renderer endpoint", &renderer.endpoint)?;
    }

    if let Some(indexer) = &config.indexer {
        validate_http_url("indexer node", &indexer.node)?;
        if indexer.index.trim().is_empty() {
            return Err(ConfigError::Validation(
                "indexer index cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.fetcher_concurrency < 1 || config.fetcher_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "fetcher_concurrency must be between 1 and 100, got {}",
            config.fetcher_concurrency
        )));
    }

    if config.queue_partitions < 1 {
        return Err(ConfigError::Validation(
            "queue_partitions must be >= 1, got 0".to_string(),
        ));
    }

    if config.simhash_threshold > 64 {
        return Err(ConfigError::Validation(format!(
            "simhash_threshold must be <= 64 bits, got {}",
            config.simhash_threshold
        )));
    }

    if let Some(list_url) = &config.proxy_list_url {
        validate_http_url("proxy_list_url", list_url)?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates shared queue configuration
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "queue database_path cannot be empty".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1, got 0".to_string(),
        ));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    Ok(())
}

/// Validates bloom filter and fingerprint window sizing
fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    if config.bloom_capacity < 1 {
        return Err(ConfigError::Validation(
            "bloom_capacity must be >= 1".to_string(),
        ));
    }

    let rate = config.bloom_false_positive_rate;
    if !(rate > 0.0 && rate < 1.0) {
        return Err(ConfigError::Validation(format!(
            "bloom_false_positive_rate must be within (0, 1), got {}",
            rate
        )));
    }

    if config.fingerprint_window < 1 {
        return Err(ConfigError::Validation(
            "fingerprint_window must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates that a configured endpoint is an absolute HTTP(S) URL
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler_config() -> CrawlerConfig {
        CrawlerConfig {
            max_depth: 5,
            fetcher_concurrency: 10,
            crawl_delay_ms: 2000,
            queue_partitions: 10,
            domain_filter: false,
            use_renderer: false,
            simhash_threshold: 3,
            proxy_list_url: None,
        }
    }

    #[test]
    fn test_validate_crawler_config() {
        assert!(validate_crawler_config(&crawler_config()).is_ok());

        let mut config = crawler_config();
        config.fetcher_concurrency = 0;
        assert!(validate_crawler_config(&config).is_err());

        let mut config = crawler_config();
        config.simhash_threshold = 65;
        assert!(validate_crawler_config(&config).is_err());

        let mut config = crawler_config();
        config.proxy_list_url = Some("ftp://proxies.example.com".to_string());
        assert!(validate_crawler_config(&config).is_err());
    }

    #[test]
    fn test_validate_dedup_config() {
        assert!(validate_dedup_config(&DedupConfig::default()).is_ok());

        let mut config = DedupConfig::default();
        config.bloom_false_positive_rate = 1.0;
        assert!(validate_dedup_config(&config).is_err());

        let mut config = DedupConfig::default();
        config.fingerprint_window = 0;
        assert!(validate_dedup_config(&config).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
    }
}
