//! Live-session monitoring: a per-room state machine fed by polling and,
//! when available, by the real-time push bridge.
//!
//! `is_live` changes only through the start/end handlers here — push events
//! and polls both funnel into the same transition code, so a room can never
//! double-announce a session regardless of which channel noticed it first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use castwatch_api::types::RoomStatus;
use castwatch_api::{ApiError, RiskTracker, UpstreamClient};
use castwatch_core::{
    deliver_with_retry, AppConfig, ContentFilter, Destination, Notification, NotificationKind,
    NotificationSink, Subscription,
};

use crate::push::{PushBridge, PushEvent};
use crate::task::TaskHandle;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub base_poll_interval: Duration,
    pub repeat_notify_interval: Duration,
    /// Delay between consecutive rooms within one `check_all` sweep.
    pub inter_room_delay: Duration,
    /// Randomized delay range between subjects during room-id resolution.
    pub resolve_delay_min_ms: u64,
    pub resolve_delay_max_ms: u64,
    pub notify_max_attempts: u32,
}

impl MonitorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_poll_interval: Duration::from_secs(config.live_poll_interval_secs),
            repeat_notify_interval: Duration::from_secs(config.repeat_notify_interval_secs),
            inter_room_delay: Duration::from_millis(config.inter_subject_delay_ms),
            resolve_delay_min_ms: 2_000,
            resolve_delay_max_ms: 5_000,
            notify_max_attempts: config.notify_max_attempts,
        }
    }
}

pub struct LiveRoomState {
    pub room_id: u64,
    pub subject_id: String,
    pub display_name: String,
    pub is_live: bool,
    pub title: String,
    pub session_started_at: Option<DateTime<Utc>>,
    /// Set while the current session's title is filter-suppressed; also
    /// suppresses the eventual end notification.
    pub is_filtered: bool,
    pub viewer_count: Option<u64>,
    pub uses_push_channel: bool,
    targets: Vec<Destination>,
    repeat_timer: Option<TaskHandle>,
}

enum Change {
    Start(String),
    End,
    Title(String),
    None,
}

pub struct LiveMonitor {
    client: Arc<UpstreamClient>,
    risk: Arc<RiskTracker>,
    filter: Arc<ContentFilter>,
    sink: Arc<dyn NotificationSink>,
    config: MonitorConfig,
    scope: CancellationToken,
    rooms: HashMap<u64, LiveRoomState>,
    push: Option<Arc<PushBridge>>,
}

impl LiveMonitor {
    #[must_use]
    pub fn new(
        client: Arc<UpstreamClient>,
        risk: Arc<RiskTracker>,
        filter: Arc<ContentFilter>,
        sink: Arc<dyn NotificationSink>,
        config: MonitorConfig,
        scope: CancellationToken,
    ) -> Self {
        Self {
            client,
            risk,
            filter,
            sink,
            config,
            scope,
            rooms: HashMap::new(),
            push: None,
        }
    }

    pub fn set_push_bridge(&mut self, bridge: Arc<PushBridge>) {
        self.push = Some(bridge);
    }

    /// Resolves room ids for all live-subscribed subjects and attempts a
    /// push connection per room (best-effort; failures fall back to
    /// poll-only). Subjects are spaced by a randomized delay to avoid a
    /// burst of resolution calls at startup.
    pub async fn init(&mut self, subscriptions: &[Subscription]) {
        let live_subs: Vec<Subscription> = subscriptions
            .iter()
            .filter(|s| s.wants_live)
            .cloned()
            .collect();

        for (index, subscription) in live_subs.iter().enumerate() {
            if index > 0 && self.config.resolve_delay_max_ms > 0 {
                let delay_ms = rand::random_range(
                    self.config.resolve_delay_min_ms..=self.config.resolve_delay_max_ms,
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            self.init_subject(subscription).await;
        }
    }

    async fn init_subject(&mut self, subscription: &Subscription) {
        let Ok(uid) = subscription.subject_id.parse::<u64>() else {
            tracing::error!(
                subject = %subscription.subject_id,
                "subject id is not a numeric uid — skipping live monitoring"
            );
            return;
        };

        let profile = match self.client.fetch_profile(uid).await {
            Ok(profile) => profile,
            Err(e) => {
                self.risk.record_failure(&e, &format!("profile for {uid}"));
                tracing::warn!(subject = %subscription.subject_id, error = %e, "profile fetch failed during init");
                return;
            }
        };
        self.risk.record_success();

        let Some(configured_room) = profile.live_room_id else {
            tracing::warn!(
                subject = %subscription.subject_id,
                "subject has no live room — skipping live monitoring"
            );
            return;
        };

        let room_id = self.client.resolve_room_id(configured_room).await;
        self.rooms.insert(
            room_id,
            LiveRoomState {
                room_id,
                subject_id: subscription.subject_id.clone(),
                display_name: subscription.display_name.clone(),
                is_live: false,
                title: String::new(),
                session_started_at: None,
                is_filtered: false,
                viewer_count: None,
                uses_push_channel: false,
                targets: subscription.targets.clone(),
                repeat_timer: None,
            },
        );
        tracing::info!(
            subject = %subscription.subject_id,
            room_id,
            "live room registered"
        );

        if let Some(bridge) = self.push.clone() {
            if !bridge.connect_room(room_id).await {
                tracing::info!(room_id, "push channel unavailable — room is poll-only");
            }
        }
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn live_room_count(&self) -> usize {
        self.rooms.values().filter(|r| r.is_live).count()
    }

    #[must_use]
    pub fn push_connected_count(&self) -> usize {
        self.rooms.values().filter(|r| r.uses_push_channel).count()
    }

    /// Effective interval for the recurring sweep: doubled (but never below
    /// 60 s) while any push channel carries transitions, since polling is
    /// then only a safety net.
    #[must_use]
    pub fn effective_poll_interval(&self) -> Duration {
        if self.rooms.values().any(|r| r.uses_push_channel) {
            (self.config.base_poll_interval * 2).max(Duration::from_secs(60))
        } else {
            self.config.base_poll_interval
        }
    }

    /// One sweep over all rooms: push-healthy rooms get a lightweight title
    /// sync, the rest get the full poll check.
    pub async fn check_all(&mut self) {
        if self.risk.is_blocked() {
            if self.risk.should_log_warning() {
                let status = self.risk.status();
                tracing::warn!(
                    remaining_secs = status.remaining_secs,
                    "live polling paused by risk control"
                );
            }
            return;
        }

        let mut ids: Vec<u64> = self.rooms.keys().copied().collect();
        ids.sort_unstable();

        for (index, room_id) in ids.iter().copied().enumerate() {
            let push_healthy = self
                .push
                .as_ref()
                .is_some_and(|bridge| bridge.is_healthy(room_id));
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.uses_push_channel = push_healthy;
            }

            if push_healthy {
                self.sync_room(room_id).await;
            } else {
                self.poll_room(room_id).await;
            }

            if index + 1 < ids.len() {
                tokio::time::sleep(self.config.inter_room_delay).await;
            }
        }
    }

    /// Full poll check: fetch status and run the transition logic.
    async fn poll_room(&mut self, room_id: u64) {
        match self.client.fetch_room_status(room_id).await {
            Ok(status) => {
                self.risk.record_success();
                self.apply_status(room_id, &status).await;
            }
            Err(e) => {
                self.risk
                    .record_failure(&e, &format!("room status for {room_id}"));
                self.log_fetch_failure(room_id, &e);
            }
        }
    }

    /// Lightweight sync for push-connected rooms: refresh title and viewer
    /// count only. Start/end transitions for these rooms come from push
    /// events; a title change while live still goes through the title
    /// handler so the filter state cannot drift.
    async fn sync_room(&mut self, room_id: u64) {
        match self.client.fetch_room_status(room_id).await {
            Ok(status) => {
                self.risk.record_success();
                let title_change = {
                    let Some(room) = self.rooms.get_mut(&room_id) else {
                        return;
                    };
                    room.viewer_count = status.online;
                    if room.is_live && status.is_live() && room.title != status.title {
                        Some(status.title.clone())
                    } else {
                        if !room.is_live {
                            room.title = status.title.clone();
                        }
                        None
                    }
                };
                if let Some(title) = title_change {
                    self.handle_title_change(room_id, title).await;
                }
            }
            Err(e) => {
                self.risk
                    .record_failure(&e, &format!("room sync for {room_id}"));
                tracing::debug!(room_id, error = %e, "push-room sync failed");
            }
        }
    }

    /// Applies a freshly fetched status to the room's state machine.
    pub async fn apply_status(&mut self, room_id: u64, status: &RoomStatus) {
        let change = {
            let Some(room) = self.rooms.get_mut(&room_id) else {
                return;
            };
            room.viewer_count = status.online;
            let now_live = status.is_live();
            if !room.is_live && now_live {
                Change::Start(status.title.clone())
            } else if room.is_live && !now_live {
                Change::End
            } else if now_live && room.title != status.title {
                Change::Title(status.title.clone())
            } else {
                if !now_live {
                    room.title = status.title.clone();
                }
                Change::None
            }
        };

        match change {
            Change::Start(title) => self.handle_live_start(room_id, &title).await,
            Change::End => self.handle_live_end(room_id).await,
            Change::Title(title) => self.handle_title_change(room_id, title).await,
            Change::None => {}
        }
    }

    /// Applies one push-bridge event. A push live-start performs a single
    /// authoritative status fetch before the normal start logic, guarding
    /// against stale or duplicate push signals.
    pub async fn handle_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected { room_id } => {
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    room.uses_push_channel = true;
                    tracing::info!(room_id, "push channel connected");
                }
            }
            PushEvent::Disconnected { room_id } => {
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    room.uses_push_channel = false;
                    tracing::info!(room_id, "push channel disconnected — falling back to polling");
                }
            }
            PushEvent::LiveStart { room_id } => {
                let already_live = match self.rooms.get(&room_id) {
                    Some(room) => room.is_live,
                    None => return,
                };
                if already_live {
                    tracing::debug!(room_id, "push live-start for a room already marked live");
                    return;
                }
                match self.client.fetch_room_status(room_id).await {
                    Ok(status) if status.is_live() => {
                        self.risk.record_success();
                        self.apply_status(room_id, &status).await;
                    }
                    Ok(_) => {
                        self.risk.record_success();
                        tracing::debug!(room_id, "push live-start but room reports offline");
                    }
                    Err(e) => {
                        self.risk
                            .record_failure(&e, &format!("push-start confirm for {room_id}"));
                        tracing::warn!(room_id, error = %e, "could not confirm push live-start");
                    }
                }
            }
            PushEvent::LiveEnd { room_id } => {
                let is_live = self.rooms.get(&room_id).is_some_and(|r| r.is_live);
                if is_live {
                    self.handle_live_end(room_id).await;
                }
            }
            PushEvent::ViewerCountChange { room_id, count } => {
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    room.viewer_count = Some(count);
                }
            }
            PushEvent::GuardBuy { room_id, user } => {
                tracing::info!(room_id, user = %user, "guard purchase in monitored room");
            }
            PushEvent::Error { room_id, message } => {
                tracing::error!(room_id, message = %message, "push channel error");
            }
        }
    }

    async fn handle_live_start(&mut self, room_id: u64, title: &str) {
        let filtered = self.filter.title_blocked(title);
        let (display_name, targets) = {
            let Some(room) = self.rooms.get_mut(&room_id) else {
                return;
            };
            room.is_live = true;
            room.title = title.to_string();
            room.session_started_at = Some(Utc::now());
            room.is_filtered = filtered;
            (room.display_name.clone(), room.targets.clone())
        };

        if filtered {
            tracing::info!(room_id, title, "live start suppressed by title filter");
            return;
        }

        tracing::info!(room_id, user = %display_name, title, "live session started");
        let url = self.client.room_url(room_id);
        self.send_live(
            &targets,
            NotificationKind::LiveStart,
            &display_name,
            format!("{display_name} is live: {title}"),
            Some(url),
        )
        .await;
        self.arm_repeat_timer(room_id);
    }

    async fn handle_live_end(&mut self, room_id: u64) {
        let (was_filtered, display_name, targets, started_at, timer) = {
            let Some(room) = self.rooms.get_mut(&room_id) else {
                return;
            };
            room.is_live = false;
            let was_filtered = room.is_filtered;
            room.is_filtered = false;
            (
                was_filtered,
                room.display_name.clone(),
                room.targets.clone(),
                room.session_started_at.take(),
                room.repeat_timer.take(),
            )
        };

        // Taking the handle out makes double-cancel structurally impossible.
        if let Some(timer) = timer {
            timer.cancel();
        }

        if was_filtered {
            tracing::debug!(room_id, "filtered session ended — no notification");
            return;
        }

        let duration_text = started_at
            .map(|s| format_duration(Utc::now().signed_duration_since(s)))
            .unwrap_or_else(|| "unknown duration".to_string());
        tracing::info!(room_id, user = %display_name, %duration_text, "live session ended");
        self.send_live(
            &targets,
            NotificationKind::LiveEnd,
            &display_name,
            format!("{display_name} is offline (live for {duration_text})"),
            None,
        )
        .await;
    }

    async fn handle_title_change(&mut self, room_id: u64, new_title: String) {
        let now_filtered = self.filter.title_blocked(&new_title);
        let (was_filtered, timer) = {
            let Some(room) = self.rooms.get_mut(&room_id) else {
                return;
            };
            let was_filtered = room.is_filtered;
            room.title = new_title.clone();
            room.is_filtered = now_filtered;
            let timer = if was_filtered != now_filtered && now_filtered {
                room.repeat_timer.take()
            } else {
                None
            };
            (was_filtered, timer)
        };

        if was_filtered && !now_filtered {
            tracing::info!(room_id, title = %new_title, "title no longer filtered — resuming notifications");
            self.arm_repeat_timer(room_id);
        } else if !was_filtered && now_filtered {
            tracing::info!(room_id, title = %new_title, "title now filtered — suppressing notifications");
            if let Some(timer) = timer {
                timer.cancel();
            }
        } else {
            tracing::debug!(room_id, title = %new_title, "live title changed");
        }
    }

    fn arm_repeat_timer(&mut self, room_id: u64) {
        let interval = self.config.repeat_notify_interval;
        let attempts = self.config.notify_max_attempts;
        let sink = Arc::clone(&self.sink);
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let display_name = room.display_name.clone();
        let targets = room.targets.clone();

        let handle = TaskHandle::spawn("live-repeat-notify", &self.scope, |token| async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        for target in targets.iter().filter(|t| t.wants_live) {
                            let notification = Notification {
                                kind: NotificationKind::LiveOngoing,
                                user: display_name.clone(),
                                content: format!("{display_name} is still live"),
                                url: None,
                                target: target.channel.clone(),
                            };
                            deliver_with_retry(sink.as_ref(), &notification, attempts).await;
                        }
                    }
                }
            }
        });

        if let Some(previous) = room.repeat_timer.replace(handle) {
            previous.cancel();
        }
    }

    async fn send_live(
        &self,
        targets: &[Destination],
        kind: NotificationKind,
        display_name: &str,
        content: String,
        url: Option<String>,
    ) {
        for target in targets.iter().filter(|t| t.wants_live) {
            let notification = Notification {
                kind,
                user: display_name.to_string(),
                content: content.clone(),
                url: url.clone(),
                target: target.channel.clone(),
            };
            deliver_with_retry(self.sink.as_ref(), &notification, self.config.notify_max_attempts)
                .await;
        }
    }

    fn log_fetch_failure(&self, room_id: u64, err: &ApiError) {
        match err {
            ApiError::AbuseDetected { .. } => {
                tracing::warn!(room_id, error = %err, "room poll hit abuse detection");
            }
            ApiError::NotFound { .. } => {
                tracing::error!(room_id, error = %err, "room does not exist upstream");
            }
            _ => {
                tracing::warn!(room_id, error = %err, "room poll failed");
            }
        }
    }

    /// Cancels all per-room repeat timers. The service calls this during
    /// teardown before disconnecting the push bridge.
    pub fn shutdown(&mut self) {
        for room in self.rooms.values_mut() {
            if let Some(timer) = room.repeat_timer.take() {
                timer.cancel();
            }
        }
    }
}

fn format_duration(elapsed: chrono::Duration) -> String {
    let total_minutes = elapsed.num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
#[path = "live_test.rs"]
mod tests;
