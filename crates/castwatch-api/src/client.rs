//! Typed facade over the upstream endpoints.
//!
//! Every operation builds its query (signing it where the upstream demands),
//! goes through the shared [`RateLimitedClient`] with retry, checks the JSON
//! envelope, and maps non-zero codes to typed [`ApiError`] values. Callers
//! pattern-match on the result; nothing here throws across component
//! boundaries.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use castwatch_core::AppConfig;

use crate::error::{
    reason_for_code, ApiError, CODE_ABUSE_DETECTED, CODE_NOT_FOUND, CODE_REQUEST_BLOCKED,
    CODE_UNAUTHENTICATED,
};
use crate::http::RateLimitedClient;
use crate::sign::Signer;
use crate::types::{
    ApiEnvelope, FeedData, Post, Profile, PushCredentials, RoomInit, RoomStatus, SignKeysData,
};

pub struct UpstreamClient {
    http: Arc<RateLimitedClient>,
    signer: Signer,
    api_base: String,
    live_base: String,
    session_cookie: Option<String>,
    self_uid: Option<u64>,
}

impl UpstreamClient {
    #[must_use]
    pub fn from_app_config(http: Arc<RateLimitedClient>, config: &AppConfig) -> Self {
        Self::with_base_urls(
            http,
            &config.api_base_url,
            &config.live_base_url,
            config.session_cookie.clone(),
            config.self_uid,
            Duration::from_secs(config.sign_key_ttl_secs),
        )
    }

    /// Constructor with explicit base URLs, for pointing at a mock server.
    #[must_use]
    pub fn with_base_urls(
        http: Arc<RateLimitedClient>,
        api_base: &str,
        live_base: &str,
        session_cookie: Option<String>,
        self_uid: Option<u64>,
        sign_key_ttl: Duration,
    ) -> Self {
        Self {
            http,
            signer: Signer::new(sign_key_ttl),
            api_base: api_base.trim_end_matches('/').to_string(),
            live_base: live_base.trim_end_matches('/').to_string(),
            session_cookie,
            self_uid,
        }
    }

    /// Public watch URL for a room, for notification bodies.
    #[must_use]
    pub fn room_url(&self, room_id: u64) -> String {
        format!("{}/{room_id}", self.live_base)
    }

    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session_cookie.is_some()
    }

    #[must_use]
    pub fn self_uid(&self) -> Option<u64> {
        self.self_uid
    }

    /// Fetches the public profile of an account.
    ///
    /// # Errors
    ///
    /// Typed per the envelope mapping: [`ApiError::NotFound`] for unknown
    /// accounts, [`ApiError::AbuseDetected`] under risk control, and the
    /// transport/deserialize variants from the HTTP layer.
    pub async fn fetch_profile(&self, uid: u64) -> Result<Profile, ApiError> {
        let url = format!("{}/x/space/info?uid={uid}", self.api_base);
        let data = self.get_enveloped(&url).await?;
        parse_data(data, &format!("fetch_profile(uid={uid})"))
    }

    /// Fetches the post feed of an account, newest-first.
    ///
    /// This endpoint is signature-protected; the query is signed with the
    /// cached key pair, refreshing it when expired.
    ///
    /// # Errors
    ///
    /// [`ApiError::SigningUnavailable`] when no key pair has ever been
    /// obtained, otherwise the standard envelope mapping.
    pub async fn fetch_post_feed(&self, uid: u64) -> Result<Vec<Post>, ApiError> {
        let params = vec![
            ("host_uid".to_string(), uid.to_string()),
            ("offset".to_string(), "0".to_string()),
        ];
        let query = self.signed_query(&params).await?;
        let url = format!("{}/x/feed/space?{query}", self.api_base);
        let data = self.get_enveloped(&url).await?;
        let feed: FeedData = parse_data(data, &format!("fetch_post_feed(uid={uid})"))?;
        Ok(feed.items)
    }

    /// Fetches the current status of a live room.
    ///
    /// # Errors
    ///
    /// Standard envelope mapping; [`ApiError::NotFound`] for unknown rooms.
    pub async fn fetch_room_status(&self, room_id: u64) -> Result<RoomStatus, ApiError> {
        let url = format!("{}/room/v1/info?room_id={room_id}", self.live_base);
        let data = self.get_enveloped(&url).await?;
        parse_data(data, &format!("fetch_room_status(room_id={room_id})"))
    }

    /// Resolves a possibly short-form room id to its canonical long form.
    ///
    /// Normalization failure is not fatal: the input id is returned and a
    /// warning logged, matching the upstream's own tolerance for short ids
    /// on most endpoints.
    pub async fn resolve_room_id(&self, room_id: u64) -> u64 {
        let url = format!("{}/room/v1/init?id={room_id}", self.live_base);
        let resolved: Result<RoomInit, ApiError> = match self.get_enveloped(&url).await {
            Ok(data) => parse_data(data, &format!("resolve_room_id(room_id={room_id})")),
            Err(e) => Err(e),
        };
        match resolved {
            Ok(init) => init.room_id,
            Err(e) => {
                tracing::warn!(
                    room_id,
                    error = %e,
                    "room id normalization failed — using the configured id as-is"
                );
                room_id
            }
        }
    }

    /// Fetches the rotating signing key pair.
    ///
    /// # Errors
    ///
    /// Standard envelope mapping.
    pub async fn fetch_sign_keys(&self) -> Result<SignKeysData, ApiError> {
        let url = format!("{}/x/auth/keys", self.api_base);
        let data = self.get_enveloped(&url).await?;
        parse_data(data, "fetch_sign_keys")
    }

    /// Fetches push-channel join credentials for a room.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthenticated`] without a session cookie — the upstream
    /// only issues push tokens to logged-in accounts.
    pub async fn fetch_push_credentials(
        &self,
        room_id: u64,
    ) -> Result<PushCredentials, ApiError> {
        if self.session_cookie.is_none() {
            return Err(ApiError::Unauthenticated(
                "push credentials require a session cookie".to_string(),
            ));
        }
        let url = format!("{}/push/v1/conf?room_id={room_id}", self.live_base);
        let data = self.get_enveloped(&url).await?;
        parse_data(data, &format!("fetch_push_credentials(room_id={room_id})"))
    }

    /// Builds a signed query string for `params`, refreshing the key cache
    /// when expired and falling back to a stale pair if refresh fails.
    ///
    /// # Errors
    ///
    /// [`ApiError::SigningUnavailable`] only when no pair has ever been
    /// cached and the refresh fails.
    pub async fn signed_query(&self, params: &[(String, String)]) -> Result<String, ApiError> {
        let (key_a, key_b) = self.signing_keys().await?;
        let ts = chrono::Utc::now().timestamp();
        Ok(crate::sign::signed_query_with(params, &key_a, &key_b, ts))
    }

    async fn signing_keys(&self) -> Result<(String, String), ApiError> {
        if let Some(pair) = self.signer.fresh() {
            return Ok(pair);
        }
        match self.fetch_sign_keys().await {
            Ok(keys) => {
                self.signer.store(&keys.key_a, &keys.key_b);
                Ok((keys.key_a, keys.key_b))
            }
            Err(e) => {
                if let Some(pair) = self.signer.stale() {
                    tracing::warn!(error = %e, "sign-key refresh failed — using stale cached pair");
                    Ok(pair)
                } else {
                    Err(ApiError::SigningUnavailable(e.to_string()))
                }
            }
        }
    }

    /// GET + envelope check, together inside the retry loop so that
    /// envelope-level transient and abuse codes also hit the retry policy.
    async fn get_enveloped(&self, url: &str) -> Result<Value, ApiError> {
        let headers = self.header_pairs();
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.http
            .with_retry(|| async {
                let body = self.http.get_json(url, &header_refs).await?;
                self.check_envelope(body, url)
            })
            .await
    }

    fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Referer", format!("{}/", self.live_base))];
        if let Some(cookie) = &self.session_cookie {
            headers.push(("Cookie", cookie.clone()));
        }
        headers
    }

    fn check_envelope(&self, body: Value, url: &str) -> Result<Value, ApiError> {
        let envelope: ApiEnvelope =
            serde_json::from_value(body).map_err(|e| ApiError::Deserialize {
                context: url.to_string(),
                source: e,
            })?;

        if envelope.code == 0 {
            return Ok(envelope.data);
        }

        let message = reason_for_code(envelope.code)
            .map_or_else(|| envelope.message.clone(), str::to_string);

        match envelope.code {
            CODE_ABUSE_DETECTED | CODE_REQUEST_BLOCKED => {
                let identity_index = self.http.identity_index();
                let cookie_len = self.session_cookie.as_ref().map_or(0, String::len);
                tracing::warn!(
                    code = envelope.code,
                    identity_index,
                    cookie_len,
                    url,
                    "upstream abuse detection triggered"
                );
                Err(ApiError::AbuseDetected {
                    code: envelope.code,
                    message,
                    identity_index,
                    has_session: self.session_cookie.is_some(),
                })
            }
            CODE_NOT_FOUND => Err(ApiError::NotFound {
                what: url.to_string(),
            }),
            CODE_UNAUTHENTICATED => Err(ApiError::Unauthenticated(message)),
            code => Err(ApiError::Upstream {
                code,
                message,
                url: url.to_string(),
            }),
        }
    }
}

fn parse_data<T: DeserializeOwned>(data: Value, context: &str) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::Deserialize {
        context: context.to_string(),
        source: e,
    })
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
