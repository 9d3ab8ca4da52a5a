//! API route definitions
//!
//! - /measurement - start, stop, post_meta, status and the live stream
//! - /state - system state (REST and WebSocket)
//! - /sensor - sensor catalogue
//! - /files - stored session files
//! - /stu/reset - holder reset
//! - /health - liveness

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers;
use crate::pipeline::AppContext;

/// Routes mounted under `/api/v1`.
pub fn api_routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/measurement", get(handlers::measurement_status))
        .route("/measurement/start", post(handlers::start_measurement))
        .route("/measurement/stop", post(handlers::stop_measurement))
        .route("/measurement/post_meta", post(handlers::post_meta))
        .route("/measurement/stream", get(handlers::measurement_stream))
        .route("/state", get(handlers::state_route))
        .route("/sensor", get(handlers::list_sensors))
        .route("/sensor/reset", post(handlers::reset_sensors))
        .route("/files", get(handlers::list_files))
        .route(
            "/files/:name",
            get(handlers::download_file).delete(handlers::delete_file),
        )
        .route("/files/analyze/:name", get(handlers::analyze_file))
        .route("/files/meta/:name", get(handlers::file_meta))
        .route("/stu/reset", put(handlers::reset_stu))
        .route("/health", get(handlers::health))
        .with_state(ctx)
}
