//! WebAPI - HTTP / WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - Control socket upgrade (`/api/ws/:id`)
//! - Multipart media stream (`/api/stream/:id`)
//! - Admin and observability routes

mod multipart;
mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.lifecycle.is_stopped() {
        "stopping"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.registry.count(),
    })
}
