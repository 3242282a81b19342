//! Post-update detection: diff the freshly fetched feed against the
//! last-seen post id and emit only genuinely new items.
//!
//! Last-seen state is in-memory only. A restart re-seeds from "latest is
//! the baseline", so a long outage never floods targets with backlog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use castwatch_api::types::Post;
use castwatch_api::{ApiError, RiskTracker, UpstreamClient};
use castwatch_core::{
    deliver_with_retry, ContentFilter, Notification, NotificationKind, NotificationSink,
    Subscription,
};

/// Computes the new items in `feed` (newest-first) relative to `last_seen`.
///
/// Returned in oldest-to-newest order, which is the order notifications are
/// emitted in — subscribers read a burst chronologically.
///
/// Rules:
/// - no last-seen id: only the single newest item (first-run baseline);
/// - last-seen id found at index `i`: every item before it;
/// - last-seen id absent (feed rotated past it): only the newest item.
#[must_use]
pub fn new_posts<'a>(feed: &'a [Post], last_seen: Option<&str>) -> Vec<&'a Post> {
    let Some(newest) = feed.first() else {
        return Vec::new();
    };
    match last_seen {
        None => vec![newest],
        Some(id) => match feed.iter().position(|p| p.id == id) {
            Some(index) => feed[..index].iter().rev().collect(),
            None => vec![newest],
        },
    }
}

pub struct PostDetector {
    client: Arc<UpstreamClient>,
    risk: Arc<RiskTracker>,
    filter: Arc<ContentFilter>,
    sink: Arc<dyn NotificationSink>,
    subscriptions: Vec<Subscription>,
    last_seen: HashMap<String, String>,
    inter_subject_delay: Duration,
    notify_max_attempts: u32,
}

impl PostDetector {
    #[must_use]
    pub fn new(
        client: Arc<UpstreamClient>,
        risk: Arc<RiskTracker>,
        filter: Arc<ContentFilter>,
        sink: Arc<dyn NotificationSink>,
        subscriptions: &[Subscription],
        inter_subject_delay: Duration,
        notify_max_attempts: u32,
    ) -> Self {
        Self {
            client,
            risk,
            filter,
            sink,
            subscriptions: subscriptions
                .iter()
                .filter(|s| s.wants_posts)
                .cloned()
                .collect(),
            last_seen: HashMap::new(),
            inter_subject_delay,
            notify_max_attempts,
        }
    }

    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// One detection pass over all post-subscribed subjects, sequentially
    /// with a small inter-subject delay.
    pub async fn run_pass(&mut self) {
        if self.risk.is_blocked() {
            if self.risk.should_log_warning() {
                let status = self.risk.status();
                tracing::warn!(
                    remaining_secs = status.remaining_secs,
                    "posts polling paused by risk control"
                );
            }
            return;
        }

        for index in 0..self.subscriptions.len() {
            let subscription = self.subscriptions[index].clone();
            self.check_subject(&subscription).await;
            if index + 1 < self.subscriptions.len() {
                tokio::time::sleep(self.inter_subject_delay).await;
            }
        }
    }

    async fn check_subject(&mut self, subscription: &Subscription) {
        let Ok(uid) = subscription.subject_id.parse::<u64>() else {
            tracing::error!(
                subject = %subscription.subject_id,
                "subject id is not a numeric uid — skipping"
            );
            return;
        };

        let feed = match self.client.fetch_post_feed(uid).await {
            Ok(feed) => feed,
            Err(e) => {
                self.risk
                    .record_failure(&e, &format!("post feed for {uid}"));
                self.log_fetch_failure(subscription, &e);
                return;
            }
        };
        self.risk.record_success();

        let previous = self.last_seen.get(&subscription.subject_id).cloned();
        let fresh: Vec<Post> = new_posts(&feed, previous.as_deref())
            .into_iter()
            .cloned()
            .collect();

        // Always advance to the newest fetched id, even when nothing was
        // emitted — self-healing against transient feed gaps.
        if let Some(newest) = feed.first() {
            self.last_seen
                .insert(subscription.subject_id.clone(), newest.id.clone());
        }

        for post in &fresh {
            if let Some(pattern) = self.filter.post_block_reason(&post.text) {
                tracing::debug!(
                    subject = %subscription.subject_id,
                    post_id = %post.id,
                    pattern = %pattern,
                    "post suppressed by content filter"
                );
                continue;
            }
            self.notify_post(subscription, post).await;
        }
    }

    fn log_fetch_failure(&self, subscription: &Subscription, err: &ApiError) {
        match err {
            ApiError::AbuseDetected { .. } => {
                tracing::warn!(
                    subject = %subscription.subject_id,
                    error = %err,
                    "feed fetch hit abuse detection"
                );
            }
            ApiError::NotFound { .. } => {
                tracing::error!(
                    subject = %subscription.subject_id,
                    error = %err,
                    "subject does not exist upstream"
                );
            }
            _ => {
                tracing::warn!(
                    subject = %subscription.subject_id,
                    error = %err,
                    "feed fetch failed"
                );
            }
        }
    }

    async fn notify_post(&self, subscription: &Subscription, post: &Post) {
        for target in &subscription.targets {
            if !target.wants_posts {
                continue;
            }
            let notification = Notification {
                kind: NotificationKind::PostUpdate,
                user: subscription.display_name.clone(),
                content: post.text.clone(),
                url: post.url.clone(),
                target: target.channel.clone(),
            };
            deliver_with_retry(self.sink.as_ref(), &notification, self.notify_max_attempts).await;
        }
    }
}

#[cfg(test)]
#[path = "posts_test.rs"]
mod tests;
