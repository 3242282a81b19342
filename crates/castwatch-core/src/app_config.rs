use std::path::PathBuf;

/// Default identity pool used when `CASTWATCH_USER_AGENTS` is not set.
///
/// The rate-limited client rotates through these; a short list is enough
/// because rotation frequency, not pool size, is what the upstream's
/// automation heuristics react to.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:126.0) Gecko/20100101 Firefox/126.0",
];

#[derive(Clone)]
pub struct AppConfig {
    /// Base URL of the main upstream API.
    pub api_base_url: String,
    /// Base URL of the live-room API (separate host on the real platform).
    pub live_base_url: String,
    /// Session cookie string for authenticated endpoints (push credentials).
    pub session_cookie: Option<String>,
    /// Authenticated account id, required alongside the cookie for push.
    pub self_uid: Option<u64>,
    pub subscriptions_path: PathBuf,
    pub request_timeout_secs: u64,
    pub user_agents: Vec<String>,
    /// Probability per request of rotating to the next identity.
    pub ua_rotate_chance: f64,
    /// Steady-state minimum spacing between upstream requests.
    pub spacing_min_ms: u64,
    pub spacing_max_ms: u64,
    pub post_poll_interval_secs: u64,
    pub live_poll_interval_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub risk_base_block_secs: u64,
    pub risk_max_block_secs: u64,
    pub risk_failure_threshold: u32,
    pub risk_log_interval_secs: u64,
    /// Interval for repeated "still live" notifications per room.
    pub repeat_notify_interval_secs: u64,
    pub push_max_connections: usize,
    pub push_heartbeat_secs: u64,
    pub push_reconnect_secs: u64,
    pub push_max_reconnects: u32,
    /// Delay between consecutive subjects within one detection pass.
    pub inter_subject_delay_ms: u64,
    pub sign_key_ttl_secs: u64,
    pub notify_max_attempts: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_base_url", &self.api_base_url)
            .field("live_base_url", &self.live_base_url)
            .field(
                "session_cookie",
                &self.session_cookie.as_ref().map(|_| "[redacted]"),
            )
            .field("self_uid", &self.self_uid)
            .field("subscriptions_path", &self.subscriptions_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agents", &self.user_agents.len())
            .field("ua_rotate_chance", &self.ua_rotate_chance)
            .field("spacing_min_ms", &self.spacing_min_ms)
            .field("spacing_max_ms", &self.spacing_max_ms)
            .field("post_poll_interval_secs", &self.post_poll_interval_secs)
            .field("live_poll_interval_secs", &self.live_poll_interval_secs)
            .field("max_retries", &self.max_retries)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("risk_base_block_secs", &self.risk_base_block_secs)
            .field("risk_max_block_secs", &self.risk_max_block_secs)
            .field("risk_failure_threshold", &self.risk_failure_threshold)
            .field("risk_log_interval_secs", &self.risk_log_interval_secs)
            .field(
                "repeat_notify_interval_secs",
                &self.repeat_notify_interval_secs,
            )
            .field("push_max_connections", &self.push_max_connections)
            .field("push_heartbeat_secs", &self.push_heartbeat_secs)
            .field("push_reconnect_secs", &self.push_reconnect_secs)
            .field("push_max_reconnects", &self.push_max_reconnects)
            .field("inter_subject_delay_ms", &self.inter_subject_delay_ms)
            .field("sign_key_ttl_secs", &self.sign_key_ttl_secs)
            .field("notify_max_attempts", &self.notify_max_attempts)
            .finish()
    }
}
