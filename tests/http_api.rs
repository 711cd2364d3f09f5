mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bizcard_proxy::clock::MockClock;
use bizcard_proxy::config::Config;
use bizcard_proxy::server::{self, AppState};
use bizcard_proxy::signature::sign;
use common::{CannedTransport, START_MS};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(config: &Config, transport: Arc<CannedTransport>, metrics_enabled: bool) -> Router {
    let clock = MockClock::new(START_MS);
    let pipeline = common::pipeline(config, common::local_backends(&clock), &clock, transport);
    server::router(AppState::new(pipeline, config), metrics_enabled)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_format_card_then_rate_limited() {
    let mut config = common::test_config();
    config.rate_limit.max_per_window = 1;
    let transport = CannedTransport::replying(&[
        "```json\n{\"Name\": \"John Doe\", \"Company\": \"ACME Corp\"}\n```",
    ]);
    let app = app(&config, transport.clone(), false);
    let body = r#"{"raw_text":"John Doe, ACME Corp"}"#;

    let response = app.clone().oneshot(post("/format-card", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["source"], "ai");
    assert_eq!(json["data"]["Company"], "ACME Corp");

    let response = app.oneshot(post("/format-card", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        json_body(response).await,
        json!({"ok": false, "error": "rate_limited"})
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_validation_errors() {
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&[]), false);

    let cases = [
        (r#"{"session_id":"s"}"#, "missing_raw_text"),
        ("not json", "missing_body"),
        (r#"{"raw_text":"x","template":"Name"}"#, "invalid_template_format"),
        (r#"{"raw_text":"x","template":["Na<me"]}"#, "template_header_invalid_chars"),
    ];
    for (body, kind) in cases {
        let response = app.clone().oneshot(post("/format-card", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(json_body(response).await["error"], kind);
    }
}

#[tokio::test]
async fn test_signed_requests() {
    let mut config = common::test_config();
    config.signature.enabled = Some(true);
    config.signature.secret = Some("secret".to_string());
    let app = app(
        &config,
        CannedTransport::replying(&["{\"Name\": \"J\"}"]),
        false,
    );
    let body = r#"{"raw_text":"J","session_id":"signed"}"#;

    let response = app.clone().oneshot(post("/format-card", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "missing_signature");

    let signature = sign("secret", START_MS, body.as_bytes());
    let signed = || {
        let mut request = post("/format-card", body);
        request
            .headers_mut()
            .insert("x-proxy-signature", signature.parse().unwrap());
        request
    };

    let response = app.clone().oneshot(signed()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(signed()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "replay");
}

#[tokio::test]
async fn test_signature_enabled_without_secret() {
    let mut config = common::test_config();
    config.signature.enabled = Some(true);
    let app = app(&config, CannedTransport::replying(&[]), false);

    let response = app
        .oneshot(post("/format-card", r#"{"raw_text":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "server_misconfigured");
}

#[tokio::test]
async fn test_bearer_auth() {
    let mut config = common::test_config();
    config.auth.enabled = true;
    config.auth.app_tokens = vec!["app-token".to_string()];
    let app = app(&config, CannedTransport::replying(&["{}"]), false);

    let response = app
        .clone()
        .oneshot(post("/format-card", r#"{"raw_text":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "missing_auth");

    let mut request = post("/format-card", r#"{"raw_text":"x"}"#);
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer app-token".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_parse_error_keeps_quota() {
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&["no json here"]), false);

    let response = app
        .clone()
        .oneshot(post(
            "/format-card",
            r#"{"raw_text":"John Doe, ACME Corp","session_id":"q1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "parse_error");

    let response = app.oneshot(get("/quota-status/q1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["status"]["units"], 5);
    assert_eq!(json["status"]["requests"], 1);
    assert_eq!(json["status"]["maxRequests"], 1000);
}

#[tokio::test]
async fn test_process_ocr() {
    let config = common::test_config();
    let app = app(
        &config,
        CannedTransport::replying(&[
            " Jane Roe ",
            "{\"Name\": \"Jane Roe\"}",
            "{\"name\": \"Jane Roe\"}",
        ]),
        false,
    );

    let response = app
        .oneshot(post("/process-ocr", r#"{"raw_text":"Jane  R0e"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["cleaned_text"], "Jane Roe");
    assert_eq!(json["structured_json"]["Name"], "Jane Roe");
    assert_eq!(json["final_json"]["name"], "Jane Roe");
}

#[tokio::test]
async fn test_process_ocr_refine_failed() {
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&["   "]), false);

    let response = app
        .oneshot(post("/process-ocr", r#"{"raw_text":"noise"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "refine_failed");
}

#[tokio::test]
async fn test_body_too_large() {
    let mut config = common::test_config();
    config.server.max_body_bytes = 64;
    let app = app(&config, CannedTransport::replying(&[]), false);

    let body = json!({"raw_text": "x".repeat(200)}).to_string();
    let response = app.oneshot(post("/format-card", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health_endpoints() {
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&[]), false);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/health/redis")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        json_body(response).await,
        json!({"ok": false, "error": "redis_unconfigured"})
    );

    // Metrics route is off
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    bizcard_proxy::metrics::init();
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&["{}"]), true);

    let response = app
        .clone()
        .oneshot(post("/format-card", r#"{"raw_text":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("admission_decisions_total"));
    assert!(text.contains("downstream_attempts_total"));
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/format-card")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cors_allow_list() {
    let mut config = common::test_config();
    config.server.allowed_origins = vec!["https://app.example.com".to_string()];
    let app = app(&config, CannedTransport::replying(&[]), false);

    let response = app
        .clone()
        .oneshot(preflight("https://app.example.com"))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );

    let response = app
        .oneshot(preflight("https://evil.example.net"))
        .await
        .unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn test_cors_any_origin_when_unconfigured() {
    let config = common::test_config();
    let app = app(&config, CannedTransport::replying(&[]), false);

    let response = app
        .oneshot(preflight("https://anywhere.example.org"))
        .await
        .unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
