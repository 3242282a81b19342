use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::filter::FilterConfig;
use crate::ConfigError;

/// A chat destination a subscription delivers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Opaque channel identifier understood by the notification sink.
    pub channel: String,
    #[serde(default = "default_true")]
    pub wants_posts: bool,
    #[serde(default = "default_true")]
    pub wants_live: bool,
}

/// One monitored upstream account.
///
/// Immutable after load; configuration changes produce a fresh set of
/// subscriptions via reload rather than in-place mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subject_id: String,
    pub display_name: String,
    #[serde(default)]
    pub wants_posts: bool,
    #[serde(default)]
    pub wants_live: bool,
    pub targets: Vec<Destination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionsFile {
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub filter: FilterConfig,
}

fn default_true() -> bool {
    true
}

/// Load and validate the subscriptions configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_subscriptions(path: &Path) -> Result<SubscriptionsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SubscriptionsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let file: SubscriptionsFile = serde_yaml::from_str(&content)?;
    validate_subscriptions(&file)?;
    Ok(file)
}

fn validate_subscriptions(file: &SubscriptionsFile) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for sub in &file.subscriptions {
        if sub.subject_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "subject_id must be non-empty".to_string(),
            ));
        }
        if !seen_ids.insert(sub.subject_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate subject_id: {}",
                sub.subject_id
            )));
        }
        if !sub.wants_posts && !sub.wants_live {
            return Err(ConfigError::Validation(format!(
                "subscription {} must want posts, live, or both",
                sub.subject_id
            )));
        }
        if sub.targets.is_empty() {
            return Err(ConfigError::Validation(format!(
                "subscription {} has no targets",
                sub.subject_id
            )));
        }
        for target in &sub.targets {
            if target.channel.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "subscription {} has a target with an empty channel",
                    sub.subject_id
                )));
            }
        }
    }

    Ok(())
}
