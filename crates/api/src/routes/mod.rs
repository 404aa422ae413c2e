pub mod credits;
pub mod health;
pub mod jobs;

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                    list, create
/// /jobs/{id}               status
/// /jobs/{id}/cancel        cancel (POST)
/// /jobs/{id}/retry         retry (POST)
/// /credits                 caller's balance
///
/// /jobs/{id}/ws            live progress (WebSocket, no request timeout)
/// ```
pub fn api_routes(request_timeout: Duration) -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/credits", credits::router())
        .route_layer(request_timeout_layer(request_timeout))
        .route("/jobs/{id}/ws", get(ws::job_ws_handler))
}

/// Answers `408 Request Timeout` once `timeout` elapses.
pub fn request_timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}
