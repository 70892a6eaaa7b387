use std::str::FromStr;
use std::time::Duration;

use crate::error::EngineError;

/// Tunables for pagination, toggle timeouts, and content limits. All limits
/// count Unicode scalar values, not bytes.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Upper bound on documents scanned per request when a feed filter
    /// must be applied client-side.
    pub feed_scan_limit: usize,
    pub toggle_timeout_ms: u64,
    pub max_title_chars: usize,
    pub max_body_chars: usize,
    pub max_comment_chars: usize,
    pub max_message_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            feed_scan_limit: 500,
            toggle_timeout_ms: 10_000,
            max_title_chars: 120,
            max_body_chars: 8_000,
            max_comment_chars: 2_200,
            max_message_chars: 4_000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let config = Self {
            default_page_size: env_or_parse("FEED_PAGE_SIZE", "20")?,
            max_page_size: env_or_parse("FEED_MAX_PAGE_SIZE", "100")?,
            feed_scan_limit: env_or_parse("FEED_SCAN_LIMIT", "500")?,
            toggle_timeout_ms: env_or_parse("TOGGLE_TIMEOUT_MS", "10000")?,
            max_title_chars: env_or_parse("MAX_TITLE_CHARS", "120")?,
            max_body_chars: env_or_parse("MAX_BODY_CHARS", "8000")?,
            max_comment_chars: env_or_parse("MAX_COMMENT_CHARS", "2200")?,
            max_message_chars: env_or_parse("MAX_MESSAGE_CHARS", "4000")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn toggle_timeout(&self) -> Duration {
        Duration::from_millis(self.toggle_timeout_ms)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.default_page_size == 0 {
            return Err(EngineError::Config(
                "FEED_PAGE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.max_page_size < self.default_page_size {
            return Err(EngineError::Config(
                "FEED_MAX_PAGE_SIZE must be >= FEED_PAGE_SIZE".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T, EngineError>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| EngineError::Config(format!("invalid {}: {}", key, err)))
}
