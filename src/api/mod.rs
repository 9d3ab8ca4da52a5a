//! REST and WebSocket API using Axum
//!
//! All endpoints live under `/api/v1`:
//! - measurement control plus the live observer WebSocket
//! - system state plus the state-channel WebSocket
//! - sensor catalogue, session files, holder reset, health

pub mod envelope;
pub mod handlers;
mod routes;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::AppContext;

/// Environment variable holding a comma-separated CORS allow-list.
pub const CORS_ORIGINS_ENV: &str = "ICODAQ_CORS_ORIGINS";

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `ICODAQ_CORS_ORIGINS` to a comma-separated list of allowed origins,
/// e.g. `http://localhost:5173` for a frontend dev server.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the application router.
pub fn create_app(ctx: AppContext) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(ctx))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
