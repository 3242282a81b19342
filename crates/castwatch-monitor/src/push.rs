//! Real-time push bridge: one websocket connection per monitored room,
//! translating upstream frames into [`PushEvent`] values on a channel.
//!
//! The bridge is best-effort by design. Every failure path — missing
//! session, credential refusal, dial errors, exhausted reconnects — ends in
//! the room falling back to polling, never in a hard error for the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use castwatch_api::types::PushCredentials;
use castwatch_api::UpstreamClient;
use castwatch_core::AppConfig;

use crate::task::TaskHandle;

/// Events emitted by room push connections, all keyed by the canonical
/// room id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Connected { room_id: u64 },
    Disconnected { room_id: u64 },
    LiveStart { room_id: u64 },
    LiveEnd { room_id: u64 },
    ViewerCountChange { room_id: u64, count: u64 },
    GuardBuy { room_id: u64, user: String },
    /// Terminal failure for a room's connection; the room stays poll-only.
    Error { room_id: u64, message: String },
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl PushConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.push_max_connections,
            heartbeat_interval: Duration::from_secs(config.push_heartbeat_secs),
            reconnect_interval: Duration::from_secs(config.push_reconnect_secs),
            max_reconnect_attempts: config.push_max_reconnects,
        }
    }
}

struct Connection {
    handle: TaskHandle,
    connected: Arc<AtomicBool>,
    last_frame_at: Arc<Mutex<Instant>>,
}

pub struct PushBridge {
    client: Arc<UpstreamClient>,
    config: PushConfig,
    scope: CancellationToken,
    events: mpsc::Sender<PushEvent>,
    connections: Mutex<HashMap<u64, Connection>>,
}

impl PushBridge {
    #[must_use]
    pub fn new(
        client: Arc<UpstreamClient>,
        config: PushConfig,
        scope: CancellationToken,
        events: mpsc::Sender<PushEvent>,
    ) -> Self {
        Self {
            client,
            config,
            scope,
            events,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to open a push connection for `room_id`. Returns `false`
    /// when the room cannot be connected — over capacity, no authenticated
    /// session, or credential fetch refused — leaving it poll-only.
    pub async fn connect_room(&self, room_id: u64) -> bool {
        {
            let mut connections = self.lock_connections();
            // A worker that has hit its reconnect ceiling has exited; its
            // entry must not keep occupying a capacity slot.
            connections.retain(|room, connection| {
                let alive = !connection.handle.is_finished();
                if !alive {
                    tracing::debug!(room_id = room, "pruned terminal push connection");
                }
                alive
            });
            if connections.contains_key(&room_id) {
                return true;
            }
            if connections.len() >= self.config.max_connections {
                tracing::warn!(
                    room_id,
                    max = self.config.max_connections,
                    "push connection capacity reached — room stays poll-only"
                );
                return false;
            }
        }

        if !self.client.has_session() || self.client.self_uid().is_none() {
            tracing::info!(
                room_id,
                "push channel requires an authenticated session — room stays poll-only"
            );
            return false;
        }

        let credentials = match self.client.fetch_push_credentials(room_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(room_id, error = %e, "push credential fetch refused");
                return false;
            }
        };
        if credentials.host_list.is_empty() {
            tracing::warn!(room_id, "push credentials carry no hosts");
            return false;
        }

        let connected = Arc::new(AtomicBool::new(false));
        let last_frame_at = Arc::new(Mutex::new(Instant::now()));
        let worker = ConnectionWorker {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            events: self.events.clone(),
            room_id,
            connected: Arc::clone(&connected),
            last_frame_at: Arc::clone(&last_frame_at),
        };
        let handle = TaskHandle::spawn("push-connection", &self.scope, move |token| async move {
            worker.run(credentials, token).await;
        });

        self.lock_connections().insert(
            room_id,
            Connection {
                handle,
                connected,
                last_frame_at,
            },
        );
        true
    }

    pub fn disconnect_room(&self, room_id: u64) {
        if let Some(connection) = self.lock_connections().remove(&room_id) {
            connection.handle.cancel();
            tracing::info!(room_id, "push connection closed");
        }
    }

    #[must_use]
    pub fn is_connected(&self, room_id: u64) -> bool {
        self.lock_connections()
            .get(&room_id)
            .is_some_and(|c| c.connected.load(Ordering::SeqCst))
    }

    /// Connected and recently heard from: a session that has gone silent for
    /// five heartbeat intervals is treated as dead even before the socket
    /// errors out.
    #[must_use]
    pub fn is_healthy(&self, room_id: u64) -> bool {
        let connections = self.lock_connections();
        let Some(connection) = connections.get(&room_id) else {
            return false;
        };
        if !connection.connected.load(Ordering::SeqCst) {
            return false;
        }
        let last = *connection
            .last_frame_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.elapsed() < self.config.heartbeat_interval * 5
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.lock_connections()
            .values()
            .filter(|c| c.connected.load(Ordering::SeqCst))
            .count()
    }

    pub fn shutdown(&self) {
        let mut connections = self.lock_connections();
        for (room_id, connection) in connections.drain() {
            connection.handle.cancel();
            tracing::debug!(room_id, "push connection cancelled");
        }
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// State owned by one room's connection task.
struct ConnectionWorker {
    client: Arc<UpstreamClient>,
    config: PushConfig,
    events: mpsc::Sender<PushEvent>,
    room_id: u64,
    connected: Arc<AtomicBool>,
    last_frame_at: Arc<Mutex<Instant>>,
}

enum SessionEnd {
    Shutdown,
    /// The socket dropped; `joined` says whether the session ever came up.
    Dropped { joined: bool },
}

impl ConnectionWorker {
    async fn run(self, initial: PushCredentials, token: CancellationToken) {
        let mut credentials = Some(initial);
        let mut failure_streak: u32 = 0;

        loop {
            let current = match credentials.take() {
                Some(c) => c,
                None => match self.client.fetch_push_credentials(self.room_id).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(room_id = self.room_id, error = %e, "push credential refresh failed");
                        failure_streak += 1;
                        if self.reconnect_exhausted(failure_streak).await {
                            return;
                        }
                        if self.wait_before_reconnect(&token).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            if current.host_list.is_empty() {
                tracing::warn!(room_id = self.room_id, "refreshed push credentials carry no hosts");
                failure_streak += 1;
                if self.reconnect_exhausted(failure_streak).await {
                    return;
                }
                if self.wait_before_reconnect(&token).await {
                    return;
                }
                continue;
            }

            match self.run_session(&current, &token).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Dropped { joined } => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        let _ = self
                            .events
                            .send(PushEvent::Disconnected {
                                room_id: self.room_id,
                            })
                            .await;
                    }
                    failure_streak = if joined { 1 } else { failure_streak + 1 };
                    if self.reconnect_exhausted(failure_streak).await {
                        return;
                    }
                    if self.wait_before_reconnect(&token).await {
                        return;
                    }
                }
            }
        }
    }

    async fn reconnect_exhausted(&self, failure_streak: u32) -> bool {
        if failure_streak <= self.config.max_reconnect_attempts {
            return false;
        }
        tracing::error!(
            room_id = self.room_id,
            attempts = failure_streak - 1,
            "push reconnect attempts exhausted — room is poll-only from here"
        );
        let _ = self
            .events
            .send(PushEvent::Error {
                room_id: self.room_id,
                message: "reconnect attempts exhausted".to_string(),
            })
            .await;
        true
    }

    /// Waits out the reconnect interval plus a settle second. Returns `true`
    /// when cancelled during the wait.
    async fn wait_before_reconnect(&self, token: &CancellationToken) -> bool {
        let wait = self.config.reconnect_interval + Duration::from_secs(1);
        tokio::select! {
            () = token.cancelled() => true,
            () = tokio::time::sleep(wait) => false,
        }
    }

    async fn run_session(
        &self,
        credentials: &PushCredentials,
        token: &CancellationToken,
    ) -> SessionEnd {
        let host = &credentials.host_list[0];
        let url = format!("wss://{}:{}/sub", host.host, host.wss_port);

        let (stream, _) = match connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(room_id = self.room_id, url = %url, error = %e, "push dial failed");
                return SessionEnd::Dropped { joined: false };
            }
        };
        let (mut write, mut read) = stream.split();

        // Self-uid presence was checked before the task was spawned.
        let uid = self.client.self_uid().unwrap_or_default();
        let join = serde_json::json!({
            "uid": uid,
            "room_id": self.room_id,
            "token": credentials.token,
        });
        if let Err(e) = write.send(Message::Text(join.to_string())).await {
            tracing::warn!(room_id = self.room_id, error = %e, "push join frame failed");
            return SessionEnd::Dropped { joined: false };
        }

        self.touch();
        self.connected.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(PushEvent::Connected {
                room_id: self.room_id,
            })
            .await;
        tracing::info!(room_id = self.room_id, url = %url, "push channel joined");

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let read_deadline = self.config.heartbeat_interval * 5;

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    let ping = serde_json::json!({"cmd": "HEARTBEAT"});
                    if let Err(e) = write.send(Message::Text(ping.to_string())).await {
                        tracing::debug!(room_id = self.room_id, error = %e, "heartbeat send failed");
                        return SessionEnd::Dropped { joined: true };
                    }
                }
                next = tokio::time::timeout(read_deadline, read.next()) => {
                    match next {
                        Err(_) => {
                            tracing::warn!(room_id = self.room_id, "push session silent — treating as dropped");
                            return SessionEnd::Dropped { joined: true };
                        }
                        Ok(None) => {
                            tracing::info!(room_id = self.room_id, "push session closed by peer");
                            return SessionEnd::Dropped { joined: true };
                        }
                        Ok(Some(Err(e))) => {
                            tracing::warn!(room_id = self.room_id, error = %e, "push read error");
                            return SessionEnd::Dropped { joined: true };
                        }
                        Ok(Some(Ok(message))) => {
                            self.touch();
                            if let Message::Text(text) = message {
                                if let Some(event) = parse_frame(self.room_id, &text) {
                                    let _ = self.events.send(event).await;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn touch(&self) {
        *self
            .last_frame_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

/// Parses one text frame into an event. Unknown commands and heartbeat
/// replies yield `None`.
#[must_use]
pub fn parse_frame(room_id: u64, text: &str) -> Option<PushEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("cmd")?.as_str()? {
        "LIVE" => Some(PushEvent::LiveStart { room_id }),
        "PREPARING" => Some(PushEvent::LiveEnd { room_id }),
        "ONLINE" => {
            let count = value.get("data")?.get("count")?.as_u64()?;
            Some(PushEvent::ViewerCountChange { room_id, count })
        }
        "GUARD_BUY" => {
            let user = value.get("data")?.get("user")?.as_str()?.to_string();
            Some(PushEvent::GuardBuy {
                room_id,
                user,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "push_test.rs"]
mod tests;
