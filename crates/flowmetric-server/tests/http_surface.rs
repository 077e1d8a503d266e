//! End-to-end tests of the HTTP surface over a fresh server context.

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use flowmetric_cache::{ArtifactHeader, CacheKey};
use flowmetric_events::{Event, EventType};
use flowmetric_server::{auth::hash_password, build_router, ServerContext, SharedContext};
use flowmetric_types::{MetricsBundle, MetricsMetadata, RangeSpec, TeamMetrics};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tower::ServiceExt;

fn config_toml(dir: &std::path::Path, extra: &str) -> String {
    format!(
        r#"
        [sourceHost]
        token = "t"
        organization = "acme"
        baseUrl = "https://source.example.com/api/graphql"

        [issueTracker]
        server = "https://tracker.example.com"
        username = "svc"
        apiToken = "s"

        [issueTracker.pagination]
        hugeThreshold = 150

        [[teams]]
        name = "platform"
        repositories = ["acme/widgets"]

        [[teams.members]]
        name = "Alice"
        sourceLogin = "alice"
        issueTrackerLogin = "alice@example.com"

        [cache]
        artifactDir = "{cache_dir}"

        [performanceTracker]
        dbPath = "{db_path}"

        {extra}
        "#,
        cache_dir = dir.join("cache").display(),
        db_path = dir.join("perf.db").display(),
    )
}

fn context(dir: &std::path::Path, extra: &str) -> SharedContext {
    let config = flowmetric_config::parse(&config_toml(dir, extra)).unwrap();
    ServerContext::new(config).unwrap()
}

fn bundle(team: &str, partial: bool) -> MetricsBundle {
    MetricsBundle {
        teams: vec![TeamMetrics {
            team: team.to_string(),
            ..Default::default()
        }],
        persons: vec![],
        comparison: vec![],
        metadata: MetricsMetadata {
            generated_at: Utc::now(),
            range_spec: "90d".to_string(),
            environment: "default".to_string(),
        },
        partial,
    }
}

fn header_for(env: &str) -> ArtifactHeader {
    ArtifactHeader {
        created_at: Utc::now(),
        range_spec: "90d".to_string(),
        environment: env.to_string(),
        collector_versions: BTreeMap::new(),
    }
}

fn request(uri: &str) -> Request<Body> {
    let mut request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn post_request(uri: &str, body: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(req).await.unwrap()
}

#[tokio::test]
async fn test_health_and_security_headers() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(context(dir.path(), ""));

    let response = send(&router, request("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(
        headers["referrer-policy"],
        "strict-origin-when-cross-origin"
    );
    assert_eq!(headers["content-security-policy"], "default-src 'self'");
    // HSTS only when enabled.
    assert!(!headers.contains_key("strict-transport-security"));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_hsts_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(context(dir.path(), "[dashboard]\nenableHsts = true\n"));
    let response = send(&router, request("/api/health")).await;
    assert!(response.headers().contains_key("strict-transport-security"));
}

#[tokio::test]
async fn test_metrics_flow() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    // No artifact yet: 404.
    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Malformed range: 400.
    let response = send(&router, request("/api/metrics?range=45d")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown environment: 404.
    let response = send(&router, request("/api/metrics?range=90d&env=ghost")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Persist, then serve.
    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", false))
        .unwrap();

    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["teams"][0]["team"], "platform");
    assert_eq!(body["metadata"]["rangeSpec"], "90d");
}

#[tokio::test]
async fn test_partial_artifact_served_with_status_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", true))
        .unwrap();

    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "partial");
}

#[tokio::test]
async fn test_partial_artifact_refused_when_opted_in() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "[dashboard]\nrefusePartial = true\n");
    let router = build_router(ctx.clone());

    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", true))
        .unwrap();

    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_data_collected_event_refreshes_served_payload() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", false))
        .unwrap();
    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(body_json(response).await["teams"][0]["team"], "platform");

    // A collection job (separate cache instance, same directory)
    // replaces the artifact and announces it.
    let producer = context(dir.path(), "");
    producer
        .cache
        .persist(&key, header_for("default"), bundle("platform-v2", false))
        .unwrap();
    ctx.bus
        .publish(Event::new(EventType::DataCollected).with_key("90d", "default"));

    let response = send(&router, request("/api/metrics?range=90d")).await;
    assert_eq!(body_json(response).await["teams"][0]["team"], "platform-v2");
}

#[tokio::test]
async fn test_basic_auth_gate() {
    let dir = tempfile::tempdir().unwrap();
    let stored = hash_password("hunter2", 600_000, b"integration-salt");
    let extra = format!(
        "[dashboard.auth]\nenabled = true\n[[dashboard.auth.users]]\nusername = \"ops\"\npasswordHashPbkdf2Sha256 = \"{stored}\"\n"
    );
    let router = build_router(context(dir.path(), &extra));

    let response = send(&router, request("/api/health")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let mut authed = request("/api/health");
    let credentials = base64_encode("ops:hunter2");
    authed.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Basic {credentials}").parse().unwrap(),
    );
    let response = send(&router, authed).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_weights_endpoint_validates_sum() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(context(dir.path(), ""));

    let ok = r#"{"prs":0.19,"reviews":0.15,"commits":0.1,"cycleTime":0.1,"jiraCompleted":0.15,
                 "mergeRate":0.05,"deploymentFrequency":0.08,"leadTime":0.07,
                 "changeFailureRate":0.05,"mttr":0.05}"#;
    let response = send(&router, post_request("/api/settings/weights", ok)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bad = ok.replace("0.19", "0.18");
    let response = send(&router, post_request("/api/settings/weights", &bad)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_validation_and_csv() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", false))
        .unwrap();

    let response = send(&router, request("/api/export/team/platform/csv?range=90d")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));

    // Unknown format: 400. Unknown team: 404. Bad team charset: 400.
    let response = send(&router, request("/api/export/team/platform/xml?range=90d")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = send(&router, request("/api/export/team/ghosts/csv?range=90d")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&router, request("/api/export/team/bad*name/csv?range=90d")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    let key = CacheKey::new(RangeSpec::Days(90), "default");
    ctx.cache
        .persist(&key, header_for("default"), bundle("platform", false))
        .unwrap();
    send(&router, request("/api/metrics?range=90d")).await;

    let response = send(&router, request("/api/cache/stats")).await;
    let stats = body_json(response).await;
    assert_eq!(stats["entryCount"], 1);
    assert_eq!(stats["memoryHits"], 1);

    let response = send(&router, post_request("/api/cache/clear", "")).await;
    assert_eq!(body_json(response).await["cleared"], 1);
}

#[tokio::test]
async fn test_reload_cache_404_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(context(dir.path(), ""));
    let response = send(&router, post_request("/api/reload-cache?range=30d", "")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(context(
        dir.path(),
        "[dashboard.rateLimiting]\nenabled = true\ndefaultLimit = 2\n",
    ));

    assert_eq!(
        send(&router, request("/api/health")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&router, request("/api/health")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&router, request("/api/health")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_perf_surface_records_requests() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "");
    let router = build_router(ctx.clone());

    send(&router, request("/api/health")).await;
    send(&router, request("/api/health")).await;

    let response = send(&router, request("/metrics/api/health-score")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["health"]["sampleCount"], 2);

    let response = send(&router, request("/metrics/api/route-trend?route=/api/health")).await;
    let body = body_json(response).await;
    assert_eq!(body["stats"]["count"], 2);
}

fn base64_encode(raw: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(raw)
}
