//! Integration tests for `FetchClient::fetch`.
//!
//! Each test stands up a `wiremock` server. Pacing and backoff are configured
//! in single milliseconds so retry scenarios run quickly while still
//! exercising the real sleep paths.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use radar_scraper::{FetchClient, FetchError, PacingPolicy};

fn test_client(max_retries: u32) -> FetchClient {
    FetchClient::new(
        Duration::from_secs(5),
        max_retries,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
    .expect("failed to build test FetchClient")
}

fn fast_pacing() -> PacingPolicy {
    PacingPolicy {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        burst_probability: 0.0,
        burst_multiplier: 2.5,
        widen_factor: 1.5,
        min_cap: Duration::from_millis(10),
        max_cap: Duration::from_millis(20),
    }
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_returns_parsed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/shopify/new.json"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"children": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(3);
    let pacing = fast_pacing();
    let (result, next) = client
        .fetch(&format!("{}/r/shopify/new.json", server.uri()), pacing)
        .await;

    assert_eq!(result.unwrap(), json!({"data": {"children": []}}));
    assert_eq!(next, pacing, "pacing must not change without rate limiting");
    assert_eq!(client.stats().requests(), 1);
    assert_eq!(client.stats().successes(), 1);
    assert_eq!(client.stats().retries(), 0);
}

#[tokio::test]
async fn fetch_sends_a_pooled_browser_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = test_client(0);
    let _ = client.fetch(&server.uri(), fast_pacing()).await;

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    let ua = requests[0]
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(ua.starts_with("Mozilla/5.0"), "unexpected user agent: {ua}");
    assert_eq!(
        requests[0].headers.get("sec-fetch-site").unwrap(),
        "none"
    );
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_survives_three_rate_limits_then_succeeds() {
    let server = MockServer::start().await;

    // Mounted first so it answers the first three requests, then falls through.
    Mock::given(method("GET"))
        .and(path("/hot"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(3);
    let pacing = fast_pacing();
    let (result, next) = client
        .fetch(&format!("{}/hot", server.uri()), pacing)
        .await;

    assert_eq!(result.unwrap(), json!({"ok": true}));
    assert_eq!(client.stats().retries(), 3);
    assert_eq!(client.stats().rate_limited(), 3);
    assert_eq!(client.stats().requests(), 4);
    assert!(
        next.min_delay > pacing.min_delay && next.max_delay > pacing.max_delay,
        "pacing window should have widened: {next:?}"
    );
    assert!(next.max_delay <= pacing.max_cap);
}

#[tokio::test]
async fn fetch_gives_up_after_retries_are_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(2);
    let (result, _) = client.fetch(&server.uri(), fast_pacing()).await;

    match result {
        Err(FetchError::RetriesExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::RateLimited { .. }));
        }
        other => panic!("expected RetriesExhausted, got: {other:?}"),
    }
    assert_eq!(client.stats().failures(), 1);
    assert_eq!(client.stats().retries(), 2);
}

// ---------------------------------------------------------------------------
// Server and transport errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_retries_server_errors_without_widening() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;

    let client = test_client(3);
    let pacing = fast_pacing();
    let (result, next) = client.fetch(&server.uri(), pacing).await;

    assert_eq!(result.unwrap(), json!([1, 2]));
    assert_eq!(client.stats().retries(), 2);
    assert_eq!(client.stats().rate_limited(), 0);
    assert_eq!(next, pacing);
}

#[tokio::test]
async fn fetch_retries_transport_failures() {
    // Nothing listens on port 1; every attempt is refused at connect time.
    let uri = "http://127.0.0.1:1/r/shopify/new.json";

    let client = test_client(1);
    let (result, _) = client.fetch(uri, fast_pacing()).await;

    match result {
        Err(FetchError::RetriesExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, FetchError::Transport(_)));
        }
        other => panic!("expected RetriesExhausted, got: {other:?}"),
    }
    assert_eq!(client.stats().requests(), 2);
}

// ---------------------------------------------------------------------------
// Definitive failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(3);
    let (result, _) = client.fetch(&server.uri(), fast_pacing()).await;

    assert!(
        matches!(result, Err(FetchError::UnexpectedStatus { status: 403, .. })),
        "expected UnexpectedStatus(403), got: {result:?}"
    );
    assert_eq!(client.stats().retries(), 0);
    assert_eq!(client.stats().failures(), 1);
}

#[tokio::test]
async fn fetch_does_not_retry_malformed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(3);
    let (result, _) = client.fetch(&server.uri(), fast_pacing()).await;

    assert!(matches!(result, Err(FetchError::Deserialize { .. })));
}
