use thiserror::Error;

/// Upstream envelope code for triggered automated-traffic defense.
pub const CODE_ABUSE_DETECTED: i64 = -352;
/// Upstream envelope (and HTTP) code for an outright blocked request.
pub const CODE_REQUEST_BLOCKED: i64 = -412;
pub const CODE_NOT_FOUND: i64 = -404;
pub const CODE_UNAUTHENTICATED: i64 = -101;
/// Transient overload: upstream asks the caller to slow down, not abuse.
pub const CODE_RATE_LIMITED: i64 = -509;
/// Transient upstream-side timeout.
pub const CODE_UPSTREAM_TIMEOUT: i64 = -504;

/// Envelope codes treated as transient and retried with ordinary backoff.
pub const TRANSIENT_CODES: &[i64] = &[CODE_RATE_LIMITED, CODE_UPSTREAM_TIMEOUT, 500, 502, 503];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("upstream error {code} from {url}: {message}")]
    Upstream {
        code: i64,
        message: String,
        url: String,
    },

    #[error("abuse detection triggered (code {code}, identity #{identity_index}, session: {has_session}): {message}")]
    AbuseDetected {
        code: i64,
        message: String,
        /// Index of the identity (User-Agent) in use when the upstream objected.
        identity_index: usize,
        has_session: bool,
    },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("request signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("execution scope torn down")]
    ScopeTornDown,
}

impl ApiError {
    /// Short machine-friendly label for status snapshots and logs.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            ApiError::Http(_) => "transient_network",
            ApiError::Deserialize { .. } => "deserialize",
            ApiError::Upstream { .. } => "upstream",
            ApiError::AbuseDetected { .. } => "abuse_detected",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::SigningUnavailable(_) => "signing_unavailable",
            ApiError::ScopeTornDown => "scope_torn_down",
        }
    }

    #[must_use]
    pub fn is_abuse(&self) -> bool {
        matches!(self, ApiError::AbuseDetected { .. })
    }
}

/// Returns `true` for errors worth retrying after a backoff delay.
///
/// **Retriable:**
/// - [`ApiError::Http`] — network-level failure (timeout, reset).
/// - [`ApiError::AbuseDetected`] — retried with the extended abuse backoff.
/// - [`ApiError::Upstream`] with a code in [`TRANSIENT_CODES`], or with a
///   code outside the known map (assumed transient).
///
/// **Not retriable:** not-found, unauthenticated, signing unavailable,
/// deserialize failures, and torn-down scopes.
#[must_use]
pub fn is_retriable(err: &ApiError) -> bool {
    match err {
        ApiError::Http(_) | ApiError::AbuseDetected { .. } => true,
        ApiError::Upstream { code, .. } => {
            TRANSIENT_CODES.contains(code) || !is_known_code(*code)
        }
        ApiError::Deserialize { .. }
        | ApiError::NotFound { .. }
        | ApiError::Unauthenticated(_)
        | ApiError::SigningUnavailable(_)
        | ApiError::ScopeTornDown => false,
    }
}

/// Maps a known upstream envelope code to a human-readable reason.
#[must_use]
pub fn reason_for_code(code: i64) -> Option<&'static str> {
    match code {
        CODE_ABUSE_DETECTED => Some("risk control triggered"),
        CODE_REQUEST_BLOCKED => Some("request blocked by upstream defense"),
        CODE_NOT_FOUND => Some("resource does not exist"),
        CODE_UNAUTHENTICATED => Some("account not logged in"),
        CODE_RATE_LIMITED => Some("rate limited"),
        CODE_UPSTREAM_TIMEOUT => Some("upstream timeout"),
        _ => None,
    }
}

fn is_known_code(code: i64) -> bool {
    reason_for_code(code).is_some()
}
