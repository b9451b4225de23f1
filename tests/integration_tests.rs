use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use hyper::header::CONTENT_TYPE;
use slidegate::client_identifier::{ClientIdentifier, ForwardedHop};
use slidegate::handlers::AppState;
use slidegate::rate_limit_config::{Quota, QuotaPolicy};
use slidegate::rate_limiter::DEFAULT_STORE_TIMEOUT;
use slidegate::response::ServerSection;
use slidegate::{create_app, InMemoryStore, RateLimitEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app(policy: QuotaPolicy) -> Router {
    let engine = Arc::new(RateLimitEngine::new(
        Arc::new(InMemoryStore::new()),
        DEFAULT_STORE_TIMEOUT,
    ));
    let state = Arc::new(AppState::new(
        engine,
        ClientIdentifier::new(ForwardedHop::First),
        policy,
        "test-region".to_string(),
        ServerSection {
            bind_addr: "127.0.0.1:0".to_string(),
            region: "test-region".to_string(),
            request_timeout: Duration::from_secs(5),
        },
    ));
    create_app(state, Duration::from_secs(5))
}

fn quota(limit: i64, window: Duration) -> QuotaPolicy {
    QuotaPolicy::new(Quota::new(limit, window))
}

fn check_request(api_key: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/check")
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_check_allows_then_denies() {
    let app = test_app(quota(3, Duration::from_secs(60)));

    for expected in [2, 1, 0] {
        let response = app.clone().oneshot(check_request("client-a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected.to_string().as_str()
        );
        let body = json_body(response).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["remaining"], expected);
        assert_eq!(body["client_id"], "client-a");
        assert_eq!(body["region"], "test-region");
    }

    let response = app.clone().oneshot(check_request("client-a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = json_body(response).await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["remaining"], 0);
}

#[tokio::test]
async fn test_clients_have_independent_quotas() {
    let app = test_app(quota(1, Duration::from_secs(60)));

    let a1 = app.clone().oneshot(check_request("clientA")).await.unwrap();
    let a2 = app.clone().oneshot(check_request("clientA")).await.unwrap();
    let b1 = app.clone().oneshot(check_request("clientB")).await.unwrap();

    assert_eq!(a1.status(), StatusCode::OK);
    assert_eq!(a2.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(b1.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_per_key_override() {
    let policy = quota(1, Duration::from_secs(60))
        .with_overrides("blocked=0/1m")
        .unwrap();
    let app = test_app(policy);

    let blocked = app.clone().oneshot(check_request("blocked")).await.unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(blocked.headers()["x-ratelimit-limit"], "0");

    let other = app.clone().oneshot(check_request("someone-else")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = test_app(quota(5, Duration::from_secs(60)));

    let request = Request::builder()
        .method("POST")
        .uri("/check")
        .header("x-client-id", "svc-7")
        .header("x-request-id", "req-abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-abc-123");
    let body = json_body(response).await;
    assert_eq!(body["request_id"], "req-abc-123");
    assert_eq!(body["client_id"], "svc-7");
}

#[tokio::test]
async fn test_request_id_is_generated_when_missing() {
    let app = test_app(quota(5, Duration::from_secs(60)));

    let response = app.oneshot(check_request("k")).await.unwrap();
    let header = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(!header.is_empty());

    let body = json_body(response).await;
    assert_eq!(body["request_id"], header.as_str());
}

#[tokio::test]
async fn test_check_rejects_get() {
    let app = test_app(quota(5, Duration::from_secs(60)));
    let request = Request::builder()
        .method("GET")
        .uri("/check")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(quota(5, Duration::from_secs(60)));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("application/json"));

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_stats_track_decisions() {
    let app = test_app(quota(1, Duration::from_secs(60)));

    app.clone().oneshot(check_request("k")).await.unwrap();
    app.clone().oneshot(check_request("k")).await.unwrap();

    let request = Request::builder().uri("/admin/stats").body(Body::empty()).unwrap();
    let body = json_body(app.oneshot(request).await.unwrap()).await;

    assert_eq!(body["requests_total"], 2);
    assert_eq!(body["requests_allowed"], 1);
    assert_eq!(body["requests_denied"], 1);
    assert_eq!(body["requests_failed"], 0);
}

#[tokio::test]
async fn test_config_endpoint() {
    let policy = quota(100, Duration::from_secs(60))
        .with_overrides("a=1/1s,b=2/2s")
        .unwrap();
    let app = test_app(policy);

    let request = Request::builder().uri("/admin/config").body(Body::empty()).unwrap();
    let body = json_body(app.oneshot(request).await.unwrap()).await;

    assert_eq!(body["rate_limit"]["default_limit"], 100);
    assert_eq!(body["rate_limit"]["default_window"], "1m");
    assert_eq!(body["rate_limit"]["overrides"], 2);
    assert_eq!(body["rate_limit"]["store"], "memory");
    assert_eq!(body["server"]["region"], "test-region");
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = test_app(quota(5, Duration::from_secs(60)));
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/check")
        .header("origin", "https://example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "x-api-key")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_live_server_uses_peer_address() {
    let app = test_app(quota(1, Duration::from_secs(60)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{}/check", addr);

    let first = client.post(&url).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 200);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["client_id"], "127.0.0.1");

    let second = client.post(&url).send().await.unwrap();
    assert_eq!(second.status().as_u16(), 429);
}
