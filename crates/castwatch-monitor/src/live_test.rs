use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use castwatch_api::http::HttpConfig;
use castwatch_api::{RateLimitedClient, RiskConfig, RiskTracker};
use castwatch_core::{Destination, FilterConfig, NotifyError};

use super::*;

struct CaptureSink {
    sent: std::sync::Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for CaptureSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn client_for(uri: &str) -> Arc<UpstreamClient> {
    let config = HttpConfig {
        timeout_secs: 5,
        user_agents: vec!["test-agent".to_string()],
        ua_rotate_chance: 0.0,
        spacing_min_ms: 0,
        spacing_max_ms: 0,
        startup_spacing_min_ms: 0,
        startup_spacing_max_ms: 0,
        startup_window_secs: 30,
        warmup_spacing_min_ms: 0,
        warmup_spacing_max_ms: 0,
        warmup_window_secs: 300,
        backoff_base_ms: 0,
        max_retries: 0,
    };
    let http = Arc::new(RateLimitedClient::new(config, CancellationToken::new()).unwrap());
    Arc::new(UpstreamClient::with_base_urls(
        http,
        uri,
        uri,
        None,
        None,
        Duration::from_secs(300),
    ))
}

fn monitor_for(
    uri: &str,
    sink: Arc<CaptureSink>,
    title_patterns: &[&str],
    repeat_interval: Duration,
) -> LiveMonitor {
    let filter = ContentFilter::compile(&FilterConfig {
        post_patterns: vec![],
        live_title_patterns: title_patterns.iter().map(|s| (*s).to_string()).collect(),
    })
    .unwrap();
    let config = MonitorConfig {
        base_poll_interval: Duration::from_secs(60),
        repeat_notify_interval: repeat_interval,
        inter_room_delay: Duration::ZERO,
        resolve_delay_min_ms: 0,
        resolve_delay_max_ms: 0,
        notify_max_attempts: 1,
    };
    LiveMonitor::new(
        client_for(uri),
        Arc::new(RiskTracker::new("live", RiskConfig::default())),
        Arc::new(filter),
        sink,
        config,
        CancellationToken::new(),
    )
}

fn register_room(monitor: &mut LiveMonitor, room_id: u64) {
    monitor.rooms.insert(
        room_id,
        LiveRoomState {
            room_id,
            subject_id: "42".to_string(),
            display_name: "streamer".to_string(),
            is_live: false,
            title: String::new(),
            session_started_at: None,
            is_filtered: false,
            viewer_count: None,
            uses_push_channel: false,
            targets: vec![
                Destination {
                    channel: "group:1".to_string(),
                    wants_posts: true,
                    wants_live: true,
                },
                Destination {
                    channel: "group:2".to_string(),
                    wants_posts: true,
                    wants_live: false,
                },
            ],
            repeat_timer: None,
        },
    );
}

fn status(room_id: u64, live_status: u8, title: &str) -> RoomStatus {
    RoomStatus {
        room_id,
        live_status,
        title: title.to_string(),
        online: Some(100),
        cover: None,
    }
}

fn capture() -> Arc<CaptureSink> {
    Arc::new(CaptureSink {
        sent: std::sync::Mutex::new(Vec::new()),
    })
}

#[tokio::test]
async fn live_start_notifies_live_targets_only() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 1, "first stream")).await;

    let room = &monitor.rooms[&7];
    assert!(room.is_live);
    assert_eq!(room.title, "first stream");
    assert!(room.session_started_at.is_some());
    assert!(room.repeat_timer.is_some(), "repeat timer armed on start");
    assert_eq!(monitor.live_room_count(), 1);

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "live-disabled target skipped");
    assert_eq!(sent[0].target, "group:1");
    assert!(matches!(sent[0].kind, NotificationKind::LiveStart));
    assert!(sent[0].content.contains("first stream"));
    assert!(sent[0].url.as_deref().unwrap().ends_with("/7"));
}

#[tokio::test]
async fn rerun_status_is_not_a_live_start() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 2, "rerun loop")).await;

    assert!(!monitor.rooms[&7].is_live);
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn live_end_notifies_with_a_duration() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 1, "t")).await;
    monitor.apply_status(7, &status(7, 0, "t")).await;

    let room = &monitor.rooms[&7];
    assert!(!room.is_live);
    assert!(room.session_started_at.is_none());
    assert!(room.repeat_timer.is_none(), "timer cancelled on end");

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert!(matches!(sent[1].kind, NotificationKind::LiveEnd));
    assert!(sent[1].content.contains("live for"));
}

#[tokio::test]
async fn filtered_title_suppresses_start_and_end() {
    let sink = capture();
    let mut monitor = monitor_for(
        "http://127.0.0.1:9",
        Arc::clone(&sink),
        &["sponsored"],
        Duration::from_secs(3600),
    );
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 1, "sponsored segment")).await;
    assert!(monitor.rooms[&7].is_live, "state still tracks the session");
    assert!(monitor.rooms[&7].is_filtered);
    assert!(monitor.rooms[&7].repeat_timer.is_none());

    monitor.apply_status(7, &status(7, 0, "sponsored segment")).await;
    assert!(!monitor.rooms[&7].is_live);
    assert!(!monitor.rooms[&7].is_filtered);
    assert!(sink.sent.lock().unwrap().is_empty(), "no notifications either way");
}

#[tokio::test]
async fn title_change_into_filtered_stops_repeats() {
    let sink = capture();
    let mut monitor = monitor_for(
        "http://127.0.0.1:9",
        Arc::clone(&sink),
        &["sponsored"],
        Duration::from_secs(3600),
    );
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 1, "normal stream")).await;
    assert!(monitor.rooms[&7].repeat_timer.is_some());

    monitor.apply_status(7, &status(7, 1, "sponsored break")).await;
    assert!(monitor.rooms[&7].is_filtered);
    assert!(monitor.rooms[&7].repeat_timer.is_none());

    monitor.apply_status(7, &status(7, 1, "back to normal")).await;
    assert!(!monitor.rooms[&7].is_filtered);
    assert!(monitor.rooms[&7].repeat_timer.is_some(), "re-armed when unfiltered");

    // Only the initial start notified; title flips are state-only.
    assert_eq!(sink.sent.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeat_timer_emits_ongoing_reminders() {
    let sink = capture();
    let mut monitor = monitor_for(
        "http://127.0.0.1:9",
        Arc::clone(&sink),
        &[],
        Duration::from_secs(10),
    );
    register_room(&mut monitor, 7);

    monitor.apply_status(7, &status(7, 1, "marathon")).await;
    tokio::time::sleep(Duration::from_secs(25)).await;

    {
        let sent = sink.sent.lock().unwrap();
        let ongoing = sent
            .iter()
            .filter(|n| matches!(n.kind, NotificationKind::LiveOngoing))
            .count();
        assert_eq!(ongoing, 2, "one reminder per interval");
    }

    monitor.apply_status(7, &status(7, 0, "marathon")).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    let sent = sink.sent.lock().unwrap();
    let ongoing = sent
        .iter()
        .filter(|n| matches!(n.kind, NotificationKind::LiveOngoing))
        .count();
    assert_eq!(ongoing, 2, "no reminders after the session ends");
}

#[tokio::test]
async fn effective_interval_doubles_with_a_push_channel() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", sink, &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    assert_eq!(monitor.effective_poll_interval(), Duration::from_secs(60));

    monitor.handle_push_event(PushEvent::Connected { room_id: 7 }).await;
    assert_eq!(monitor.effective_poll_interval(), Duration::from_secs(120));
    assert_eq!(monitor.push_connected_count(), 1);

    monitor
        .handle_push_event(PushEvent::Disconnected { room_id: 7 })
        .await;
    assert_eq!(monitor.effective_poll_interval(), Duration::from_secs(60));
}

#[tokio::test]
async fn push_live_start_is_confirmed_against_the_room_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/room/v1/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "",
            "data": {"room_id": 7, "live_status": 1, "title": "pushed live", "online": 5}
        })))
        .mount(&server)
        .await;

    let sink = capture();
    let mut monitor = monitor_for(&server.uri(), Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    monitor.handle_push_event(PushEvent::LiveStart { room_id: 7 }).await;

    assert!(monitor.rooms[&7].is_live);
    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].content.contains("pushed live"));
}

#[tokio::test]
async fn push_live_start_for_an_already_live_room_is_ignored() {
    let server = MockServer::start().await;

    let sink = capture();
    let mut monitor = monitor_for(&server.uri(), Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);
    monitor.rooms.get_mut(&7).unwrap().is_live = true;

    monitor.handle_push_event(PushEvent::LiveStart { room_id: 7 }).await;

    assert!(
        server.received_requests().await.unwrap().is_empty(),
        "no confirmation fetch when already live"
    );
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn push_live_end_ends_the_session_directly() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", Arc::clone(&sink), &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);
    monitor.apply_status(7, &status(7, 1, "t")).await;

    monitor.handle_push_event(PushEvent::LiveEnd { room_id: 7 }).await;
    assert!(!monitor.rooms[&7].is_live);

    // A second end event is a no-op.
    monitor.handle_push_event(PushEvent::LiveEnd { room_id: 7 }).await;
    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 2, "start + one end");
}

#[tokio::test]
async fn viewer_count_updates_from_push() {
    let sink = capture();
    let mut monitor = monitor_for("http://127.0.0.1:9", sink, &[], Duration::from_secs(3600));
    register_room(&mut monitor, 7);

    monitor
        .handle_push_event(PushEvent::ViewerCountChange { room_id: 7, count: 1234 })
        .await;
    assert_eq!(monitor.rooms[&7].viewer_count, Some(1234));
}

#[test]
fn duration_formatting() {
    assert_eq!(format_duration(chrono::Duration::minutes(5)), "5m");
    assert_eq!(format_duration(chrono::Duration::minutes(65)), "1h05m");
    assert_eq!(format_duration(chrono::Duration::seconds(-10)), "0m");
}
