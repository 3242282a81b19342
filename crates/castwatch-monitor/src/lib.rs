//! Update detection and relay: the post-update detector, the live-session
//! monitor with its real-time push bridge, and the service orchestrator that
//! owns their periodic tasks.

pub mod live;
pub mod posts;
pub mod push;
pub mod service;
pub mod task;

pub use live::{LiveMonitor, MonitorConfig};
pub use posts::PostDetector;
pub use push::{PushBridge, PushConfig, PushEvent};
pub use service::WatchService;
pub use task::TaskHandle;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] castwatch_core::ConfigError),

    #[error("upstream error: {0}")]
    Api(#[from] castwatch_api::ApiError),
}
