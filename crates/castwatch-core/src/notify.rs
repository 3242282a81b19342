//! Notification contract consumed from the hosting chat framework.
//!
//! The core never talks to a chat platform directly; it hands a formatted
//! [`Notification`] to a [`NotificationSink`] implementation and retries a
//! bounded number of times. Delivery is at-least-once: a send that errors
//! after the upstream actually accepted it may be repeated.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PostUpdate,
    LiveStart,
    LiveEnd,
    LiveOngoing,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Display name of the monitored subject.
    pub user: String,
    pub content: String,
    pub url: Option<String>,
    /// Destination channel identifier, opaque to the core.
    pub target: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {target} failed: {reason}")]
    Delivery { target: String, reason: String },
}

/// Outbound delivery seam implemented by the hosting framework.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification to its target.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Delivery`] when the message could not be handed
    /// to the destination channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Gap between delivery attempts. Deliberately short and fixed: the chat
/// framework has its own queueing, so long waits here only delay later
/// notifications in the same pass.
const RETRY_GAP_SECS: u64 = 2;

/// Delivers `notification` with up to `max_attempts` tries.
///
/// Returns `true` once a send succeeds. Exhausted attempts are logged and
/// swallowed — a lost notification must never take down the monitor loop.
pub async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    notification: &Notification,
    max_attempts: u32,
) -> bool {
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.send(notification).await {
            Ok(()) => return true,
            Err(e) => {
                if attempt == attempts {
                    tracing::error!(
                        target_channel = %notification.target,
                        kind = ?notification.kind,
                        error = %e,
                        "notification delivery failed after {attempts} attempts"
                    );
                } else {
                    tracing::warn!(
                        target_channel = %notification.target,
                        attempt,
                        error = %e,
                        "notification delivery failed — retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_GAP_SECS)).await;
                }
            }
        }
    }
    false
}
