//! Shared configuration, subscription model, content filtering, and the
//! notification contract for the castwatch workspace.

pub mod app_config;
pub mod config;
pub mod filter;
pub mod notify;
pub mod status;
pub mod subscriptions;

pub use app_config::{AppConfig, DEFAULT_USER_AGENTS};
pub use config::{load_app_config, load_app_config_from_env};
pub use filter::{ContentFilter, FilterConfig};
pub use notify::{
    deliver_with_retry, Notification, NotificationKind, NotificationSink, NotifyError,
};
pub use status::{RiskControlStatus, ServiceStatus};
pub use subscriptions::{load_subscriptions, Destination, Subscription, SubscriptionsFile};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read subscriptions file {path}: {source}")]
    SubscriptionsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse subscriptions file: {0}")]
    SubscriptionsFileParse(#[from] serde_yaml::Error),

    #[error("invalid filter pattern \"{pattern}\": {source}")]
    InvalidFilterPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),
}
