//! # Inbound HTTP server
//!
//! Exposes `GET /health`, one `POST /{provider}` route per enabled backend,
//! and optionally `GET /metrics` for a Prometheus scraper.
//!
//! The request body is read as raw bytes and decoded here rather than through
//! axum's `Json` extractor, so that malformed input produces the same
//! `{"error": ...}` body as every other failure. Dispatch runs on its own
//! task; neither the server timeout nor a dropped connection cuts it short.

use crate::config::Config;
use crate::core::{AlertPayload, DeliveryOutcome};
use crate::dispatch::{Channel, DispatchError, Dispatcher};
use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn, Instrument};

/// Largest accepted webhook body, matching axum's default extractor limit.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// State shared by every request handler.
pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
    pub prometheus: Option<PrometheusHandle>,
}

/// Builds the router for the given state and provider channels.
///
/// `server.timeout` bounds `/health` and `/metrics` as a whole, but only the
/// body read of a webhook request: a delivery that has started always runs
/// to its outcome.
pub fn router(state: Arc<AppState>, channels: Vec<Channel>) -> Router {
    let timeout = state.config.server.timeout;
    let mut router = Router::new().route("/health", get(health));

    if let Some(handle) = state.prometheus.clone() {
        router = router.route("/metrics", get(move || async move { handle.render() }));
    }
    router = router.route_layer(TimeoutLayer::new(timeout));

    for channel in channels {
        let path = format!("/{}", channel.kind.name());
        let channel = Arc::new(channel);
        router = router.route(
            &path,
            post(move |State(state): State<Arc<AppState>>, request: Request| {
                let channel = channel.clone();
                async move { receive_alerts(state, channel, request).await }
            }),
        );
    }

    router.with_state(state).layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let enabled_webhooks: Map<String, Value> = state
        .config
        .webhooks
        .enabled()
        .map(|(kind, provider)| (kind.name().to_string(), Value::from(provider.webhook_url.clone())))
        .collect();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "version": env!("CARGO_PKG_VERSION"),
        "enabled_webhooks": enabled_webhooks,
    }))
}

async fn receive_alerts(state: Arc<AppState>, channel: Arc<Channel>, request: Request) -> Response {
    let provider = channel.kind;
    let read = to_bytes(request.into_body(), MAX_BODY_BYTES);
    let body = match tokio::time::timeout(state.config.server.timeout, read).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            warn!(%provider, error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
        Err(_) => {
            warn!(%provider, "Timed out reading request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };
    debug!(%provider, payload = %String::from_utf8_lossy(&body), "Received raw webhook payload");

    let payload: AlertPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(%provider, error = %e, "Rejected invalid alert payload");
            return error_response(StatusCode::BAD_REQUEST, "invalid JSON payload");
        }
    };
    let alerts = payload.alerts.len();
    info!(
        %provider,
        alerts,
        status = %payload.overall_status(),
        "Received alerts"
    );

    // Detached so a client disconnect cannot cancel a delivery in progress.
    let dispatcher = state.dispatcher.clone();
    let task_channel = channel.clone();
    let dispatch = tokio::spawn(
        async move { dispatcher.dispatch(&payload, &task_channel).await }.in_current_span(),
    );
    let result = match dispatch.await {
        Ok(result) => result,
        Err(e) => {
            error!(%provider, error = %e, "Dispatch task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to send message");
        }
    };

    match result {
        Ok(DeliveryOutcome::Delivered) => (
            StatusCode::OK,
            Json(json!({
                "message": "alerts processed",
                "sent_to": channel.config.webhook_url,
                "alerts": alerts,
            })),
        )
            .into_response(),
        Ok(DeliveryOutcome::Failed {
            reason,
            attempts_made,
        }) => {
            error!(%provider, %reason, attempts_made, "Failed to deliver alerts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to send message")
        }
        Err(e) => {
            let message = match &e {
                DispatchError::TemplateLoad(_) => "failed to load template",
                DispatchError::TemplateRender(_) => "failed to render template",
                DispatchError::Envelope(_) => "rendered message is not a valid envelope",
            };
            error!(%provider, error = %e, "Failed to dispatch alerts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
