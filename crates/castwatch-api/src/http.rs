//! Shared rate-limited HTTP gateway for all upstream calls.
//!
//! One instance serializes outbound pacing for the whole process: every call
//! sleeps until a randomized minimum gap since the previous call has passed.
//! The gap is graduated from process start (a fresh process looks the least
//! like a browser, so the first windows pace differently), identities rotate
//! probabilistically, and retries use exponential backoff with a much longer
//! randomized penalty once the upstream's abuse detection has objected.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use castwatch_core::AppConfig;

use crate::error::{self, ApiError, CODE_REQUEST_BLOCKED};

/// Ordinary exponential backoff is capped here; abuse penalties are not
/// derived from this value.
const ORDINARY_BACKOFF_CAP_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agents: Vec<String>,
    /// Probability per request of rotating to the next identity.
    pub ua_rotate_chance: f64,
    /// Steady-state spacing range.
    pub spacing_min_ms: u64,
    pub spacing_max_ms: u64,
    /// Spacing applied during the first window after process start.
    pub startup_spacing_min_ms: u64,
    pub startup_spacing_max_ms: u64,
    pub startup_window_secs: u64,
    /// Spacing applied after the startup window, before steady state.
    pub warmup_spacing_min_ms: u64,
    pub warmup_spacing_max_ms: u64,
    pub warmup_window_secs: u64,
    pub backoff_base_ms: u64,
    pub max_retries: u32,
}

impl HttpConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            timeout_secs: config.request_timeout_secs,
            user_agents: config.user_agents.clone(),
            ua_rotate_chance: config.ua_rotate_chance,
            spacing_min_ms: config.spacing_min_ms,
            spacing_max_ms: config.spacing_max_ms,
            startup_spacing_min_ms: 2_000,
            startup_spacing_max_ms: 4_000,
            startup_window_secs: 30,
            warmup_spacing_min_ms: 5_000,
            warmup_spacing_max_ms: 8_000,
            warmup_window_secs: 300,
            backoff_base_ms: config.backoff_base_ms,
            max_retries: config.max_retries,
        }
    }
}

/// Picks the spacing range applicable `since_start` after process launch.
pub(crate) fn spacing_window_ms(config: &HttpConfig, since_start: Duration) -> (u64, u64) {
    if since_start < Duration::from_secs(config.startup_window_secs) {
        (config.startup_spacing_min_ms, config.startup_spacing_max_ms)
    } else if since_start
        < Duration::from_secs(config.startup_window_secs + config.warmup_window_secs)
    {
        (config.warmup_spacing_min_ms, config.warmup_spacing_max_ms)
    } else {
        (config.spacing_min_ms, config.spacing_max_ms)
    }
}

/// Backoff before retry `attempt` (0-based) for a non-abuse failure.
pub(crate) fn ordinary_backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let ms = base_ms
        .saturating_mul(1u64 << attempt.min(10))
        .min(ORDINARY_BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

/// Backoff before an abuse-penalized retry: 10–30 s the first time within a
/// call chain, 30–90 s from the second abuse retry onward.
pub(crate) fn abuse_backoff_delay(abuse_retries_so_far: u32) -> Duration {
    let ms = if abuse_retries_so_far == 0 {
        rand::random_range(10_000..30_000)
    } else {
        rand::random_range(30_000..90_000)
    };
    Duration::from_millis(ms)
}

struct PacerState {
    /// When the most recent request fired (or is reserved to fire).
    last_request_at: Option<Instant>,
    ua_index: usize,
}

pub struct RateLimitedClient {
    inner: reqwest::Client,
    config: HttpConfig,
    started_at: Instant,
    state: Mutex<PacerState>,
    scope: CancellationToken,
}

impl RateLimitedClient {
    /// Creates the single shared gateway instance.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn new(config: HttpConfig, scope: CancellationToken) -> Result<Self, ApiError> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner,
            config,
            started_at: Instant::now(),
            state: Mutex::new(PacerState {
                last_request_at: None,
                ua_index: 0,
            }),
            scope,
        })
    }

    /// Index of the identity currently in use, for abuse diagnostics.
    #[must_use]
    pub fn identity_index(&self) -> usize {
        self.lock_state().ua_index
    }

    /// Rotates to the next identity unconditionally. Called by the retry
    /// path after every abuse-detection failure.
    pub fn rotate_identity(&self) -> usize {
        let mut state = self.lock_state();
        state.ua_index = (state.ua_index + 1) % self.config.user_agents.len().max(1);
        tracing::debug!(identity_index = state.ua_index, "rotated request identity");
        state.ua_index
    }

    /// Sleeps until this call's reserved pacing slot, then returns the
    /// User-Agent to use (rotating first with the configured probability).
    async fn pace(&self) -> String {
        let (wait, ua) = {
            let mut state = self.lock_state();
            if rand::random::<f64>() < self.config.ua_rotate_chance {
                state.ua_index = (state.ua_index + 1) % self.config.user_agents.len().max(1);
            }
            let ua = self
                .config
                .user_agents
                .get(state.ua_index)
                .cloned()
                .unwrap_or_default();

            let (min_ms, max_ms) = spacing_window_ms(&self.config, self.started_at.elapsed());
            let gap = if max_ms > min_ms {
                Duration::from_millis(rand::random_range(min_ms..=max_ms))
            } else {
                Duration::from_millis(min_ms)
            };
            let now = Instant::now();
            // Reserve the slot while holding the lock so concurrent callers
            // queue behind each other rather than sharing one gap.
            let fire_at = match state.last_request_at {
                Some(prev) => {
                    let earliest = prev + gap;
                    if earliest > now {
                        earliest
                    } else {
                        now
                    }
                }
                None => now,
            };
            state.last_request_at = Some(fire_at);
            (fire_at.saturating_duration_since(now), ua)
        };

        if !wait.is_zero() {
            tracing::trace!(wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "pacing upstream request");
            tokio::time::sleep(wait).await;
        }
        ua
    }

    /// Issues a paced GET and parses the body as JSON.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ScopeTornDown`] once shutdown has begun.
    /// - [`ApiError::NotFound`] on HTTP 404.
    /// - [`ApiError::AbuseDetected`] on HTTP 412 (upstream block status).
    /// - [`ApiError::Upstream`] on any other non-2xx status.
    /// - [`ApiError::Http`] / [`ApiError::Deserialize`] on transport or body
    ///   failures.
    pub async fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<Value, ApiError> {
        if self.scope.is_cancelled() {
            return Err(ApiError::ScopeTornDown);
        }
        let ua = self.pace().await;
        let mut request = self.inner.get(url).header(reqwest::header::USER_AGENT, &ua);
        let mut has_session = false;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("cookie") {
                has_session = true;
            }
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        self.map_response(response, url, has_session).await
    }

    /// Issues a paced POST with a JSON body and parses the response as JSON.
    ///
    /// # Errors
    ///
    /// Same mapping as [`RateLimitedClient::get_json`].
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        if self.scope.is_cancelled() {
            return Err(ApiError::ScopeTornDown);
        }
        let ua = self.pace().await;
        let mut request = self
            .inner
            .post(url)
            .header(reqwest::header::USER_AGENT, &ua)
            .json(body);
        let mut has_session = false;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("cookie") {
                has_session = true;
            }
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        self.map_response(response, url, has_session).await
    }

    /// GET with the configured retry policy.
    ///
    /// # Errors
    ///
    /// Re-raises the last error once retries are exhausted; see
    /// [`RateLimitedClient::get_json`] for the mapping.
    pub async fn get_json_with_retry(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        self.with_retry(|| self.get_json(url, headers)).await
    }

    /// POST with the configured retry policy.
    ///
    /// # Errors
    ///
    /// Re-raises the last error once retries are exhausted.
    pub async fn post_json_with_retry(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        self.with_retry(|| self.post_json(url, body, headers)).await
    }

    pub(crate) async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0u32;
        let mut abuse_retries = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if self.scope.is_cancelled() {
                        return Err(ApiError::ScopeTornDown);
                    }
                    if !error::is_retriable(&err) || attempt >= self.config.max_retries {
                        if err.is_abuse() {
                            // An objected-to identity is never kept for the
                            // next call, even when no retry follows here.
                            self.rotate_identity();
                        }
                        return Err(err);
                    }
                    let delay = if err.is_abuse() {
                        // Identity rotation is mandatory here: retrying with
                        // the same identity after a block is what escalates a
                        // soft objection into a hard one.
                        self.rotate_identity();
                        let delay = abuse_backoff_delay(abuse_retries);
                        abuse_retries += 1;
                        delay
                    } else {
                        ordinary_backoff_delay(attempt, self.config.backoff_base_ms)
                    };
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient upstream error — retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn map_response(
        &self,
        response: reqwest::Response,
        url: &str,
        has_session: bool,
    ) -> Result<Value, ApiError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                what: url.to_string(),
            });
        }
        if status == reqwest::StatusCode::PRECONDITION_FAILED {
            // The upstream signals a hard block with 412 at the HTTP layer,
            // before any JSON envelope is produced.
            return Err(ApiError::AbuseDetected {
                code: CODE_REQUEST_BLOCKED,
                message: "request blocked by upstream defense".to_string(),
                identity_index: self.identity_index(),
                has_session,
            });
        }
        if !status.is_success() {
            return Err(ApiError::Upstream {
                code: i64::from(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Deserialize {
            context: url.to_string(),
            source: e,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PacerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
