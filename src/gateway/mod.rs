//! HTTP surface: webhook receiver, outbound send endpoints, message admin.
//!
//! `/webhook` always answers 200 so the provider never disables the
//! subscription. Every other route answers `{success, ...}` JSON with a
//! conventional status code.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::errors::ScalazapError;
use crate::ingest::{RequestMeta, WebhookIngestor};
use crate::models::{OutboundSendRequest, WebhookSource};
use crate::resolver::ConnectionSelector;
use crate::store::{MAX_LIST_LIMIT, MessageFilter, MessageStore, MessageUpdate};
use crate::whatsapp::MessagingApi;
use crate::whatsapp::webhook::VerifyQuery;

/// Reply to every accepted event delivery.
pub const EVENT_ACK_BODY: &str = "EVENT_RECEIVED";

const DEFAULT_LOG_LIMIT: usize = 50;

/// Headers never copied into the raw webhook log.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn MessageStore>,
    ingestor: Arc<WebhookIngestor>,
    dispatcher: Arc<Dispatcher>,
    ack_timeout: Duration,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn MessageStore>, api: Arc<dyn MessagingApi>) -> Self {
        let ingestor = WebhookIngestor::new(
            store.clone(),
            config.whatsapp.clone(),
            &config.ingest,
            config.gateway.max_body_bytes,
        );
        let dispatcher = Dispatcher::new(api, store.clone(), config.dispatch.clone());
        Self {
            store,
            ingestor: Arc::new(ingestor),
            dispatcher: Arc::new(dispatcher),
            ack_timeout: Duration::from_millis(config.gateway.ack_timeout_ms),
            max_body_bytes: config.gateway.max_body_bytes,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_handler).post(event_handler))
        .route("/webhook/logs", get(webhook_logs_handler))
        .route("/messages/send", post(send_handler))
        .route("/messages/bulk-send", post(bulk_send_handler))
        .route("/messages", get(list_messages_handler).delete(clear_messages_handler))
        .route("/messages/{message_id}", patch(update_message_handler))
        .route("/api/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve in a background task. Returns the bound address so callers
/// can pass port 0.
pub async fn start(host: &str, port: u16, state: AppState) -> Result<(JoinHandle<()>, SocketAddr)> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let local = listener.local_addr()?;
    info!("gateway listening on {}", local);

    let app = build_router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway server error: {}", e);
        }
    });
    Ok((handle, local))
}

fn error_response(err: &ScalazapError) -> Response {
    if err.is_client_error() {
        warn!("gateway: request rejected: {}", err);
    } else {
        error!("gateway: request failed: {}", err);
    }
    (
        err.status_code(),
        Json(json!({"success": false, "error": err.to_string()})),
    )
        .into_response()
}

fn rejection_response(rejection: &JsonRejection) -> Response {
    error_response(&ScalazapError::Validation(rejection.body_text()))
}

fn headers_json(headers: &HeaderMap) -> Value {
    let map = headers
        .iter()
        .map(|(name, value)| {
            let text = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), Value::String(text))
        })
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

fn request_meta(method: &Method, headers: &HeaderMap, query: Option<String>) -> RequestMeta {
    RequestMeta {
        method: method.as_str().to_string(),
        headers: headers_json(headers),
        query,
        signature: headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Parse the `hub.*` parameters without ever rejecting the request.
fn parse_verify_query(raw: Option<&str>) -> VerifyQuery {
    let mut query = VerifyQuery::default();
    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "hub.mode" => query.mode = Some(value.into_owned()),
            "hub.verify_token" => query.verify_token = Some(value.into_owned()),
            "hub.challenge" => query.challenge = Some(value.into_owned()),
            _ => {}
        }
    }
    query
}

/// GET /webhook: subscription handshake.
async fn verify_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> impl IntoResponse {
    let query = parse_verify_query(raw.as_deref());
    let meta = request_meta(&method, &headers, raw);
    let body = state.ingestor.verify(&query, &meta).await;
    (StatusCode::OK, body)
}

/// POST /webhook: event delivery. Always 200.
async fn event_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
    body: Body,
) -> impl IntoResponse {
    let meta = request_meta(&method, &headers, raw);
    match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => {
            let _ = state
                .ingestor
                .accept_event(meta, bytes.to_vec(), state.ack_timeout)
                .await;
        }
        Err(e) => {
            warn!("webhook: could not read delivery body: {}", e);
            let note = format!("[body unreadable or over {} bytes]", state.max_body_bytes);
            state
                .ingestor
                .log_raw(WebhookSource::Event, &meta, note.as_bytes())
                .await;
        }
    }
    (StatusCode::OK, EVENT_ACK_BODY)
}

#[derive(Debug, Deserialize)]
struct SendBody {
    #[serde(flatten)]
    request: OutboundSendRequest,
    #[serde(flatten)]
    selector: ConnectionSelector,
}

/// POST /messages/send: one message, answered with the provider ID.
async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejection_response(&rejection),
    };

    // Validate before resolving so bad input is reported as such
    if let Err(e) = body.request.validate() {
        return error_response(&e);
    }
    let credentials = match body.selector.resolve(state.store.as_ref()).await {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    match state.dispatcher.send_one(&credentials, &body.request).await {
        Ok(sent) => Json(json!({
            "success": true,
            "messageId": sent.message_id,
            "recorded": sent.recorded,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkSendBody {
    #[serde(flatten)]
    selector: ConnectionSelector,
    #[serde(default)]
    messages: Vec<OutboundSendRequest>,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    batch_id: Option<String>,
}

/// POST /messages/bulk-send: paced sequential batch. Responds once the
/// whole batch has been attempted.
async fn bulk_send_handler(
    State(state): State<AppState>,
    body: Result<Json<BulkSendBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejection_response(&rejection),
    };
    let credentials = match body.selector.resolve(state.store.as_ref()).await {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let delay = body.delay_ms.map(Duration::from_millis);
    match state
        .dispatcher
        .dispatch_batch(&credentials, &body.messages, delay, body.batch_id)
        .await
    {
        Ok(report) => Json(json!({
            "success": true,
            "sent": report.sent,
            "failed": report.failed,
            "errors": report.errors,
            "batchId": report.batch_id,
            "unrecorded": report.unrecorded,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /messages: filtered listing, newest first.
async fn list_messages_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result = match MessageFilter::from_query(&params) {
        Ok(filter) => state.store.list_messages(&filter).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(messages) => Json(json!({
            "success": true,
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// PATCH /messages/{messageId}: set `processed` / `replied`.
async fn update_message_handler(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejection_response(&rejection),
    };
    let update = match MessageUpdate::from_json(&body) {
        Ok(u) => u,
        Err(e) => return error_response(&e),
    };
    match state.store.update_message(&message_id, &update).await {
        Ok(true) => match state.store.get_message(&message_id).await {
            Ok(message) => Json(json!({"success": true, "message": message})).into_response(),
            Err(e) => error_response(&e),
        },
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": format!("message {} not found", message_id)})),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE /messages: bulk clear.
async fn clear_messages_handler(State(state): State<AppState>) -> Response {
    match state.store.clear_messages().await {
        Ok(deleted) => {
            info!("gateway: cleared {} messages", deleted);
            Json(json!({"success": true, "deleted": deleted})).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// GET /webhook/logs: most recent raw deliveries.
async fn webhook_logs_handler(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    match state.store.recent_webhook_logs(limit).await {
        Ok(logs) => Json(json!({"success": true, "logs": logs})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/health: health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}
