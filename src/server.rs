// HTTP surface of the admission proxy
//
// Routes:
// - POST /format-card          one completion, card text to a JSON record
// - POST /process-ocr          refine, structure and finalize OCR output
// - GET  /quota-status/{id}    quota consumption for an identity
// - GET  /health               liveness
// - GET  /health/redis         shared store reachability
// - GET  /metrics              Prometheus text format (when enabled)

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::admission::{AdmissionError, AdmissionPipeline, InboundRequest, RequestKind};
use crate::ai::{self, PromptBuilder};
use crate::config::Config;
use crate::metrics;
use crate::store::SharedHealth;

/// State shared by all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pipeline: Arc<AdmissionPipeline>,
    prompts: Arc<PromptBuilder>,
    signature_header: String,
    max_body_bytes: usize,
    allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(pipeline: AdmissionPipeline, config: &Config) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            prompts: Arc::new(PromptBuilder::new()),
            signature_header: config.signature.header.to_ascii_lowercase(),
            max_body_bytes: config.server.max_body_bytes,
            allowed_origins: config.server.allowed_origins.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: &'static str,
}

fn error_json(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorBody { ok: false, error })).into_response()
}

/// JSON error response for an admission failure, with `Retry-After` on 429.
pub fn error_response(e: &AdmissionError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = error_json(status, e.kind());
    if let Some(secs) = e.retry_after_secs() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// CORS for browser callers: any origin when `allowed_origins` is empty,
/// otherwise only the listed ones. Requests without an `Origin` header are
/// unaffected.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    cors.allow_origin(origins)
}

/// Build the application router
pub fn router(state: AppState, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/format-card", post(format_card_handler))
        .route("/process-ocr", post(process_ocr_handler))
        .route("/quota-status/{session_id}", get(quota_status_handler))
        .route("/health", get(health_handler))
        .route("/health/redis", get(redis_health_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    let cors = cors_layer(&state.allowed_origins);
    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, "bizcard-proxy listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Collect the raw body and the headers the pipeline needs.
async fn inbound_request(state: &AppState, request: Request) -> Result<InboundRequest, Response> {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = request.into_parts();

    let body: Bytes = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| {
            warn!(error = %e, "Request body rejected");
            error_json(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
        })?;

    Ok(InboundRequest {
        body,
        signature: header_string(&parts.headers, &state.signature_header),
        authorization: header_string(&parts.headers, header::AUTHORIZATION.as_str()),
        client_ip,
    })
}

async fn format_card_handler(State(state): State<AppState>, request: Request) -> Response {
    let inbound = match inbound_request(&state, request).await {
        Ok(inbound) => inbound,
        Err(response) => return response,
    };

    let prompts = state.prompts.clone();
    let result = state
        .pipeline
        .run(&inbound, RequestKind::FormatCard, |admission, client| async move {
            ai::format_card(admission, client, &prompts).await
        })
        .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn process_ocr_handler(State(state): State<AppState>, request: Request) -> Response {
    let inbound = match inbound_request(&state, request).await {
        Ok(inbound) => inbound,
        Err(response) => return response,
    };

    let prompts = state.prompts.clone();
    let result = state
        .pipeline
        .run(&inbound, RequestKind::ProcessOcr, |admission, client| async move {
            ai::process_ocr(admission, client, &prompts).await
        })
        .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn quota_status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let status = state.pipeline.quota_status(&session_id).await;
    Json(json!({ "ok": true, "status": status })).into_response()
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn redis_health_handler(State(state): State<AppState>) -> Response {
    match state.pipeline.store_health().await {
        SharedHealth::Healthy => Json(json!({ "ok": true })).into_response(),
        SharedHealth::Unconfigured => {
            error_json(StatusCode::SERVICE_UNAVAILABLE, "redis_unconfigured")
        }
        SharedHealth::Unavailable(reason) => {
            warn!(error = %reason, "Shared store health check failed");
            error_json(StatusCode::SERVICE_UNAVAILABLE, "redis_unavailable")
        }
    }
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AuthError, ValidationError};

    #[test]
    fn test_error_response_status_and_retry_after() {
        let response = error_response(&AdmissionError::RateLimited {
            retry_after: Some(std::time::Duration::from_millis(2500)),
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");

        let response = error_response(&ValidationError::MissingBody.into());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let response = error_response(&AuthError::InvalidToken.into());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_header_string() {
        let mut headers = HeaderMap::new();
        headers.insert("x-proxy-signature", HeaderValue::from_static("1:ab"));
        assert_eq!(
            header_string(&headers, "x-proxy-signature").as_deref(),
            Some("1:ab")
        );
        assert_eq!(header_string(&headers, "x-other"), None);
    }
}
