//! WebAPI - REST and WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod counting_routes;
mod routes;

pub use counting_routes::{counting_routes, CountingRequest};
pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector_connected = state.detector.health_check().await;
    let db_connected = if state.config_store.has_database() {
        Some(state.config_store.db_connected().await)
    } else {
        None
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        detector_connected,
        active_streams: state.streams.active_count().await,
        running_jobs: state.jobs.running_count().await,
        push_connections: state.push.connection_count(),
        push_dropped: state.push.dropped_total(),
        db_connected,
    };

    Json(response)
}
