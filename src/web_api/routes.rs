//! API Routes

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use super::multipart;
use crate::control_plane::{ControlPlaneLoop, Inbound};
use crate::dispatch_loop::DispatchLoop;
use crate::error::{Error, Result};
use crate::models::{QueueSizeResponse, ServerMessage, SettingsResponse};
use crate::session_registry::{ClientHandle, Outbound, Session};
use crate::slo_metrics::DEFAULT_ROLLING_WINDOW;
use crate::state::AppState;
use crate::stream_pacer::{paced_frames, StreamPacer};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Session transport
        .route("/api/ws/:session_id", get(websocket_handler))
        .route("/api/stream/:session_id", get(stream_frames))
        // Admin / observability
        .route("/api/queue", get(get_queue_size))
        .route("/api/settings", get(get_settings))
        .route("/api/metrics/:session_id", get(get_metrics))
        .route("/api/metrics/:session_id/flush", post(flush_metrics))
        .route("/api/upload/:session_id", get(get_upload_status))
        .with_state(state)
}

// ========================================
// Control socket
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session_id))
}

/// Handle one control connection for its whole life
async fn handle_websocket(socket: WebSocket, state: AppState, session_id: Uuid) {
    let (mut sender, receiver) = socket.split();
    let (client, mut rx) = ClientHandle::channel();

    // Forward session status messages to the socket
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = sender.close().await;
    });

    let session = match state.registry.connect(session_id, client).await {
        Ok(session) => session,
        Err(_) => {
            // Rejection already reported to the client; let the writer flush it
            let _ = writer.await;
            return;
        }
    };

    let inbound = receiver
        .take_while(|message| futures::future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(Inbound::Json(
                    serde_json::from_str(&text).unwrap_or(Value::Null),
                ))),
                Ok(Message::Binary(data)) => Some(Ok(Inbound::Binary(Bytes::from(data)))),
                Ok(_) => None,
                Err(e) => Some(Err(Error::Transport(e.to_string()))),
            }
        });

    let control = ControlPlaneLoop::new(
        session,
        state.registry.clone(),
        Box::pin(inbound),
        state.control_config(),
    );
    let exit = control.run().await;
    tracing::debug!(session_id = %session_id, exit = ?exit, "Control connection finished");

    if tokio::time::timeout(state.config.shutdown_timeout(), writer)
        .await
        .is_err()
    {
        tracing::warn!(session_id = %session_id, "Socket writer did not finish in time");
    }
}

// ========================================
// Media stream
// ========================================

/// Holds the session's stream claim for as long as the response body lives
struct StreamLease {
    session: Arc<Session>,
    _dispatch: DropGuard,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.session.end_stream();
        tracing::debug!(session_id = %self.session.id(), "Media stream closed");
    }
}

/// GET /api/stream/:session_id
///
/// Starts the session's DispatchLoop and streams its output as
/// `multipart/x-mixed-replace` JPEG parts.
async fn stream_frames(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = state.registry.require(&session_id)?;
    if !session.try_begin_stream() {
        return Err(Error::Conflict(format!(
            "session {} already has a media stream",
            session_id
        )));
    }

    let dispatch_token = session.cancel_token().child_token();
    let lease = StreamLease {
        session: session.clone(),
        _dispatch: dispatch_token.clone().drop_guard(),
    };

    let dispatch = DispatchLoop::new(
        session.clone(),
        state.engine.clone(),
        state.metrics.clone(),
        state.config.dispatch_config(),
    )
    .with_cancel(dispatch_token);
    session.spawn_task(dispatch.run());
    session.notify(ServerMessage::SendFrame)?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let repeat = multipart::parts_per_frame(user_agent);

    tracing::info!(session_id = %session_id, parts_per_frame = repeat, "Media stream opened");

    let pacer = StreamPacer::new(&state.config.pacer_config(), Instant::now());
    let body = paced_frames(session, pacer).flat_map(move |frame| {
        let _held = &lease;
        let part = multipart::encode_part(&frame.data);
        futures::stream::iter(
            std::iter::repeat(part)
                .take(repeat)
                .map(Ok::<_, Infallible>),
        )
    });

    Response::builder()
        .header(header::CONTENT_TYPE, multipart::content_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| Error::Internal(e.to_string()))
}

// ========================================
// Admin / observability
// ========================================

/// GET /api/queue
async fn get_queue_size(State(state): State<AppState>) -> Json<QueueSizeResponse> {
    Json(QueueSizeResponse {
        queue_size: state.registry.count(),
    })
}

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        input_mode: state.engine.input_mode(),
        max_queue_size: state.config.max_queue_size,
        ingest_fps: state.config.ingest_fps,
        output_min_fps: state.config.output_min_fps,
        output_max_fps: state.config.output_max_fps,
        metrics_enabled: state.metrics.is_enabled(),
        target_latency: state.metrics.target_latency(),
    })
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(alias = "window_size")]
    window: Option<usize>,
}

/// GET /api/metrics/:session_id?window=N
async fn get_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse> {
    if !state.metrics.is_enabled() {
        return Err(Error::MetricsDisabled);
    }
    let session = state
        .registry
        .get(&session_id)
        .ok_or(Error::NoMetrics(session_id))?;

    let window = query.window.unwrap_or(DEFAULT_ROLLING_WINDOW);
    let stats = state.metrics.rolling_stats(&session, window)?;
    Ok(Json(stats))
}

/// POST /api/metrics/:session_id/flush
async fn flush_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !state.metrics.is_enabled() {
        return Err(Error::MetricsDisabled);
    }
    let session = state.registry.require(&session_id)?;

    let report = state.metrics.take_report(&session)?;
    let run_dir = state.metrics.persist(&report).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "batch_count": report.batch_count,
        "total_frames": report.latencies.len(),
        "path": run_dir.display().to_string(),
    })))
}

/// GET /api/upload/:session_id
async fn get_upload_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.registry.require(&session_id)?;
    Ok(Json(session.upload_status()))
}
