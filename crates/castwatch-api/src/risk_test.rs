use super::*;
use crate::error::CODE_RATE_LIMITED;

fn abuse_error() -> ApiError {
    ApiError::AbuseDetected {
        code: CODE_ABUSE_DETECTED,
        message: "risk control triggered".to_string(),
        identity_index: 0,
        has_session: false,
    }
}

fn network_error_like() -> ApiError {
    ApiError::NotFound {
        what: "user 42".to_string(),
    }
}

fn config() -> RiskConfig {
    RiskConfig::default()
}

#[test]
fn abuse_variant_is_risk_signal() {
    assert!(is_risk_signal(&abuse_error()));
}

#[test]
fn abuse_codes_and_markers_qualify() {
    let coded = ApiError::Upstream {
        code: CODE_REQUEST_BLOCKED,
        message: String::new(),
        url: "u".to_string(),
    };
    assert!(is_risk_signal(&coded));

    let marked = ApiError::Upstream {
        code: CODE_RATE_LIMITED,
        message: "rate limited".to_string(),
        url: "u".to_string(),
    };
    assert!(is_risk_signal(&marked));
}

#[test]
fn ordinary_failures_do_not_qualify() {
    assert!(!is_risk_signal(&network_error_like()));
    let unknown = ApiError::Upstream {
        code: -9999,
        message: "mystery".to_string(),
        url: "u".to_string(),
    };
    assert!(!is_risk_signal(&unknown));
}

#[test]
fn blocks_after_exactly_three_qualifying_failures() {
    let tracker = RiskTracker::new("posts", config());
    tracker.record_failure(&abuse_error(), "pass");
    tracker.record_failure(&abuse_error(), "pass");
    assert!(!tracker.is_blocked());
    tracker.record_failure(&abuse_error(), "pass");
    assert!(tracker.is_blocked());
}

#[test]
fn interleaved_success_resets_counter() {
    let tracker = RiskTracker::new("posts", config());
    tracker.record_failure(&abuse_error(), "pass");
    tracker.record_failure(&abuse_error(), "pass");
    tracker.record_success();
    tracker.record_failure(&abuse_error(), "pass");
    tracker.record_failure(&abuse_error(), "pass");
    assert!(!tracker.is_blocked());
    tracker.record_failure(&abuse_error(), "pass");
    assert!(tracker.is_blocked());
}

#[test]
fn non_qualifying_failures_never_block() {
    let tracker = RiskTracker::new("posts", config());
    for _ in 0..10 {
        tracker.record_failure(&network_error_like(), "pass");
    }
    assert!(!tracker.is_blocked());
    assert_eq!(tracker.status().consecutive_failures, 0);
}

#[test]
fn block_duration_grows_monotonically_and_caps() {
    let tracker = RiskTracker::new("posts", config());
    let mut previous = 0;
    for _ in 0..12 {
        tracker.record_failure(&abuse_error(), "pass");
        let duration = tracker.status().block_duration_secs;
        assert!(duration >= previous, "duration shrank: {previous} -> {duration}");
        assert!(duration <= 3_600);
        previous = duration;
    }
    assert_eq!(previous, 3_600, "expected escalation to reach the cap");
}

#[test]
fn success_does_not_clear_active_block() {
    let tracker = RiskTracker::new("posts", config());
    for _ in 0..3 {
        tracker.record_failure(&abuse_error(), "pass");
    }
    assert!(tracker.is_blocked());
    tracker.record_success();
    assert!(tracker.is_blocked());
    assert_eq!(tracker.status().consecutive_failures, 0);
}

#[test]
fn zero_duration_block_expires_lazily() {
    let tracker = RiskTracker::new(
        "posts",
        RiskConfig {
            base_block_secs: 0,
            max_block_secs: 0,
            ..config()
        },
    );
    for _ in 0..3 {
        tracker.record_failure(&abuse_error(), "pass");
    }
    // expiry is evaluated on the next observation, not by a timer
    assert!(!tracker.is_blocked());
    assert_eq!(tracker.status().remaining_secs, 0);
}

#[test]
fn warning_log_is_throttled() {
    let tracker = RiskTracker::new("posts", config());
    assert!(!tracker.should_log_warning(), "not blocked yet");
    for _ in 0..3 {
        tracker.record_failure(&abuse_error(), "pass");
    }
    assert!(tracker.should_log_warning());
    assert!(!tracker.should_log_warning(), "second call within interval");
}

#[test]
fn status_reports_remaining_time_while_blocked() {
    let tracker = RiskTracker::new("posts", config());
    for _ in 0..3 {
        tracker.record_failure(&abuse_error(), "pass");
    }
    let status = tracker.status();
    assert!(status.is_blocked);
    assert!(status.remaining_secs > 0 && status.remaining_secs <= 600);
    assert_eq!(status.last_error_kind.as_deref(), Some("abuse_detected"));
}
