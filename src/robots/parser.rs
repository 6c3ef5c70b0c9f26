//! Robots.txt rules, matched with the robotstxt crate

use robotstxt::DefaultMatcher;

/// Robots.txt rules for one origin
///
/// Empty content allows everything.
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    content: String,
}

impl ParsedRobots {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules that allow every URL
    ///
    /// Used when robots.txt is missing or the origin is unreachable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks if a URL is allowed for a user-agent product token
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check
    /// * `user_agent` - Product token such as `SumiFleet`
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }
}
