//! robots.txt parsing and matching.

use robotstxt::DefaultMatcher;
use tracing::debug;

/// Cached robots.txt rules for one origin.
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    pub fn parse(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules for origins with no robots.txt (or a failed fetch): allow all.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        let allowed = matcher.one_agent_allowed_by_robots(&self.content, user_agent, path);
        if !allowed {
            debug!("robots.txt disallows {} for {}", path, user_agent);
        }
        allowed
    }
}
