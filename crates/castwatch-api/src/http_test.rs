use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

/// Config with all pacing zeroed so tests never sleep.
fn test_config(max_retries: u32) -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        user_agents: vec!["ua-0".to_string(), "ua-1".to_string(), "ua-2".to_string()],
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
        max_retries,
    }
}

fn client(max_retries: u32) -> RateLimitedClient {
    RateLimitedClient::new(test_config(max_retries), CancellationToken::new()).unwrap()
}

#[test]
fn ordinary_backoff_doubles_and_caps() {
    assert_eq!(ordinary_backoff_delay(0, 1_000).as_millis(), 1_000);
    assert_eq!(ordinary_backoff_delay(1, 1_000).as_millis(), 2_000);
    assert_eq!(ordinary_backoff_delay(2, 1_000).as_millis(), 4_000);
    // capped at 10 s no matter how far the attempts go
    assert_eq!(ordinary_backoff_delay(9, 1_000).as_millis(), 10_000);
    assert_eq!(ordinary_backoff_delay(60, 1_000).as_millis(), 10_000);
}

#[test]
fn abuse_backoff_first_retry_within_10_to_30s() {
    for _ in 0..200 {
        let d = abuse_backoff_delay(0);
        assert!(d.as_millis() >= 10_000 && d.as_millis() < 30_000, "got {d:?}");
    }
}

#[test]
fn abuse_backoff_later_retries_within_30_to_90s() {
    for retry in 1..4u32 {
        for _ in 0..200 {
            let d = abuse_backoff_delay(retry);
            assert!(d.as_millis() >= 30_000 && d.as_millis() < 90_000, "got {d:?}");
        }
    }
}

#[test]
fn spacing_graduates_from_startup_to_steady_state() {
    let config = HttpConfig {
        spacing_min_ms: 3_000,
        spacing_max_ms: 5_000,
        startup_spacing_min_ms: 2_000,
        startup_spacing_max_ms: 4_000,
        warmup_spacing_min_ms: 5_000,
        warmup_spacing_max_ms: 8_000,
        ..test_config(0)
    };
    assert_eq!(
        spacing_window_ms(&config, Duration::from_secs(5)),
        (2_000, 4_000)
    );
    assert_eq!(
        spacing_window_ms(&config, Duration::from_secs(60)),
        (5_000, 8_000)
    );
    assert_eq!(
        spacing_window_ms(&config, Duration::from_secs(400)),
        (3_000, 5_000)
    );
}

#[test]
fn rotate_identity_cycles_through_pool() {
    let client = client(0);
    assert_eq!(client.identity_index(), 0);
    assert_eq!(client.rotate_identity(), 1);
    assert_eq!(client.rotate_identity(), 2);
    assert_eq!(client.rotate_identity(), 0);
}

#[tokio::test]
async fn get_json_parses_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .mount(&server)
        .await;

    let client = client(0);
    let value = client
        .get_json(&format!("{}/ok", server.uri()), &[])
        .await
        .unwrap();
    assert_eq!(value["code"], 0);
}

#[tokio::test]
async fn post_json_sends_body_and_parses_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(wiremock::matchers::body_json(json!({"offset": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": 9})))
        .mount(&server)
        .await;

    let client = client(0);
    let value = client
        .post_json(
            &format!("{}/submit", server.uri()),
            &json!({"offset": 0}),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(value["data"], 9);
}

#[tokio::test]
async fn post_json_with_retry_recovers_from_transient_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": 3})))
        .mount(&server)
        .await;

    let client = client(2);
    let value = client
        .post_json_with_retry(&format!("{}/flaky", server.uri()), &json!({}), &[])
        .await
        .unwrap();
    assert_eq!(value["data"], 3);
}

#[tokio::test]
async fn get_json_maps_404_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(0);
    let err = client.get_json(&server.uri(), &[]).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { .. }), "got: {err:?}");
}

#[tokio::test]
async fn get_json_maps_412_to_abuse_with_diagnostics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let client = client(0);
    let err = client
        .get_json(&server.uri(), &[("Cookie", "SESSDATA=x")])
        .await
        .unwrap_err();
    match err {
        ApiError::AbuseDetected {
            code, has_session, ..
        } => {
            assert_eq!(code, CODE_REQUEST_BLOCKED);
            assert!(has_session);
        }
        other => panic!("expected AbuseDetected, got: {other:?}"),
    }
}

#[tokio::test]
async fn with_retry_recovers_from_transient_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": 7})))
        .mount(&server)
        .await;

    let client = client(3);
    let value = client
        .get_json_with_retry(&format!("{}/flaky", server.uri()), &[])
        .await
        .unwrap();
    assert_eq!(value["data"], 7);
}

#[tokio::test]
async fn with_retry_exhaustion_reraises_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client(1);
    let err = client
        .get_json_with_retry(&server.uri(), &[])
        .await
        .unwrap_err();
    assert!(
        matches!(err, ApiError::Upstream { code: 500, .. }),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn abuse_on_final_attempt_still_rotates_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let client = client(0);
    assert_eq!(client.identity_index(), 0);
    let err = client
        .get_json_with_retry(&server.uri(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AbuseDetected { .. }), "got: {err:?}");
    assert_eq!(
        client.identity_index(),
        1,
        "identity rotated even though no retry followed"
    );
}

#[tokio::test(start_paused = true)]
async fn abuse_failure_rotates_identity_before_the_retry() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let client = client(1);
    let calls = AtomicU32::new(0);
    let indices_seen = Mutex::new(Vec::new());

    let result = client
        .with_retry(|| {
            indices_seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(client.identity_index());
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ApiError::AbuseDetected {
                        code: error::CODE_ABUSE_DETECTED,
                        message: "risk control triggered".to_string(),
                        identity_index: 0,
                        has_session: false,
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    let seen = indices_seen
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    assert_eq!(*seen, vec![0, 1], "retry ran under the next identity");
}

#[tokio::test]
async fn cancelled_scope_fails_fast() {
    let token = CancellationToken::new();
    let client = RateLimitedClient::new(test_config(3), token.clone()).unwrap();
    token.cancel();
    let err = client
        .get_json("http://127.0.0.1:1/unreachable", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ScopeTornDown), "got: {err:?}");
}
