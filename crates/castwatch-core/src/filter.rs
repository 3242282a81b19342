//! Content filtering for post bodies and live-room titles.
//!
//! Patterns are plain regex strings supplied in the subscriptions file and
//! compiled once at load. A matching pattern suppresses the notification;
//! for live rooms the suppression sticks for the whole session so that a
//! filtered start never produces an orphaned end notification.

use regex::Regex;
use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub post_patterns: Vec<String>,
    #[serde(default)]
    pub live_title_patterns: Vec<String>,
}

/// Compiled filter, shared read-only by the detector and the monitor.
pub struct ContentFilter {
    post_patterns: Vec<Regex>,
    live_title_patterns: Vec<Regex>,
}

impl ContentFilter {
    /// Compiles all patterns from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilterPattern`] on the first pattern that
    /// fails to compile.
    pub fn compile(config: &FilterConfig) -> Result<Self, ConfigError> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| ConfigError::InvalidFilterPattern {
                        pattern: p.clone(),
                        source: e,
                    })
                })
                .collect()
        };

        Ok(Self {
            post_patterns: compile_all(&config.post_patterns)?,
            live_title_patterns: compile_all(&config.live_title_patterns)?,
        })
    }

    /// Returns the pattern that blocks `text`, or `None` if the post passes.
    #[must_use]
    pub fn post_block_reason(&self, text: &str) -> Option<String> {
        self.post_patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str().to_owned())
    }

    /// Returns `true` if a live-room title should be suppressed.
    #[must_use]
    pub fn title_blocked(&self, title: &str) -> bool {
        self.live_title_patterns.iter().any(|re| re.is_match(title))
    }
}
