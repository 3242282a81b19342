//! Service orchestrator: wires the shared HTTP gateway, the post detector,
//! the live monitor and the push bridge together and owns their periodic
//! tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use castwatch_api::http::HttpConfig;
use castwatch_api::{RateLimitedClient, RiskConfig, RiskTracker, UpstreamClient};
use castwatch_core::{
    AppConfig, ContentFilter, NotificationSink, ServiceStatus, Subscription, SubscriptionsFile,
};

use crate::live::{LiveMonitor, MonitorConfig};
use crate::posts::PostDetector;
use crate::push::{PushBridge, PushConfig, PushEvent};
use crate::task::TaskHandle;
use crate::MonitorError;

const PUSH_EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct WatchService {
    scope: CancellationToken,
    subscriptions: Vec<Subscription>,
    post_poll_interval: Duration,
    detector: Arc<tokio::sync::Mutex<PostDetector>>,
    monitor: Arc<tokio::sync::Mutex<LiveMonitor>>,
    bridge: Arc<PushBridge>,
    posts_risk: Arc<RiskTracker>,
    live_risk: Arc<RiskTracker>,
    events: Option<mpsc::Receiver<PushEvent>>,
    tasks: Vec<TaskHandle>,
    running: bool,
}

impl WatchService {
    /// Builds the full component graph without starting any tasks.
    ///
    /// # Errors
    ///
    /// Fails on an invalid filter pattern or if the HTTP client cannot be
    /// constructed.
    pub fn new(
        config: &AppConfig,
        file: &SubscriptionsFile,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, MonitorError> {
        Self::with_http_config(config, HttpConfig::from_app_config(config), file, sink)
    }

    /// Constructor with an explicit HTTP configuration, for tests that need
    /// pacing disabled.
    ///
    /// # Errors
    ///
    /// Same conditions as [`WatchService::new`].
    pub fn with_http_config(
        config: &AppConfig,
        http_config: HttpConfig,
        file: &SubscriptionsFile,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, MonitorError> {
        let scope = CancellationToken::new();
        let http = Arc::new(RateLimitedClient::new(http_config, scope.clone())?);
        let client = Arc::new(UpstreamClient::from_app_config(http, config));
        let filter = Arc::new(ContentFilter::compile(&file.filter)?);

        let posts_risk = Arc::new(RiskTracker::new("posts", risk_config(config)));
        let live_risk = Arc::new(RiskTracker::new("live", risk_config(config)));

        let detector = PostDetector::new(
            Arc::clone(&client),
            Arc::clone(&posts_risk),
            Arc::clone(&filter),
            Arc::clone(&sink),
            &file.subscriptions,
            Duration::from_millis(config.inter_subject_delay_ms),
            config.notify_max_attempts,
        );

        let (events_tx, events_rx) = mpsc::channel(PUSH_EVENT_CHANNEL_CAPACITY);
        let bridge = Arc::new(PushBridge::new(
            Arc::clone(&client),
            PushConfig::from_app_config(config),
            scope.clone(),
            events_tx,
        ));

        let mut monitor = LiveMonitor::new(
            client,
            Arc::clone(&live_risk),
            filter,
            sink,
            MonitorConfig::from_app_config(config),
            scope.clone(),
        );
        monitor.set_push_bridge(Arc::clone(&bridge));

        Ok(Self {
            scope,
            subscriptions: file.subscriptions.clone(),
            post_poll_interval: Duration::from_secs(config.post_poll_interval_secs),
            detector: Arc::new(tokio::sync::Mutex::new(detector)),
            monitor: Arc::new(tokio::sync::Mutex::new(monitor)),
            bridge,
            posts_risk,
            live_risk,
            events: Some(events_rx),
            tasks: Vec::new(),
            running: false,
        })
    }

    /// Resolves live rooms, opens push connections where possible and starts
    /// the periodic tasks. Idempotent; a second call is a no-op.
    pub async fn start(&mut self) {
        if self.running {
            return;
        }

        self.monitor.lock().await.init(&self.subscriptions).await;

        let detector = Arc::clone(&self.detector);
        let post_interval = self.post_poll_interval;
        self.tasks.push(TaskHandle::spawn(
            "post-poll",
            &self.scope,
            move |token| async move {
                loop {
                    detector.lock().await.run_pass().await;
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(post_interval) => {}
                    }
                }
            },
        ));

        let monitor = Arc::clone(&self.monitor);
        self.tasks.push(TaskHandle::spawn(
            "live-poll",
            &self.scope,
            move |token| async move {
                loop {
                    // The sleep is re-derived each cycle: the effective
                    // interval stretches while push channels are healthy.
                    let interval = {
                        let mut guard = monitor.lock().await;
                        guard.check_all().await;
                        guard.effective_poll_interval()
                    };
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            },
        ));

        if let Some(mut events) = self.events.take() {
            let monitor = Arc::clone(&self.monitor);
            self.tasks.push(TaskHandle::spawn(
                "push-events",
                &self.scope,
                move |token| async move {
                    loop {
                        tokio::select! {
                            () = token.cancelled() => break,
                            event = events.recv() => match event {
                                Some(event) => {
                                    monitor.lock().await.handle_push_event(event).await;
                                }
                                None => break,
                            },
                        }
                    }
                },
            ));
        }

        self.running = true;
        tracing::info!(
            subjects = self.subscriptions.len(),
            "watch service started"
        );
    }

    /// Stops all periodic tasks, per-room timers and push connections.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        for task in self.tasks.drain(..) {
            task.cancel();
        }
        self.monitor.lock().await.shutdown();
        self.bridge.shutdown();
        self.scope.cancel();
        self.running = false;
        tracing::info!("watch service stopped");
    }

    /// One-shot detection pass over all post subjects, without starting any
    /// periodic tasks. Used by cron-style invocations.
    pub async fn run_detection_pass(&self) {
        self.detector.lock().await.run_pass().await;
    }

    pub async fn status(&self) -> ServiceStatus {
        let (room_count, live_room_count) = {
            let monitor = self.monitor.lock().await;
            (monitor.room_count(), monitor.live_room_count())
        };
        ServiceStatus {
            is_running: self.running,
            subject_count: self.detector.lock().await.subject_count(),
            room_count,
            live_room_count,
            push_connected_count: self.bridge.connected_count(),
            posts_risk: self.posts_risk.status(),
            live_risk: self.live_risk.status(),
        }
    }
}

fn risk_config(config: &AppConfig) -> RiskConfig {
    RiskConfig {
        failure_threshold: config.risk_failure_threshold,
        base_block_secs: config.risk_base_block_secs,
        max_block_secs: config.risk_max_block_secs,
        log_interval_secs: config.risk_log_interval_secs,
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
