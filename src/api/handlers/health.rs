use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::api::envelope::ApiResponse;
use crate::pipeline::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub status: &'static str,
    pub version: &'static str,
    pub holder: String,
    pub holder_ready: bool,
    pub measurement_running: bool,
}

/// GET /api/v1/health - liveness
pub async fn health(State(ctx): State<AppContext>) -> Response {
    ApiResponse::ok(HealthInfo {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        holder: ctx.holder.source_name().to_string(),
        holder_ready: ctx.holder.is_ready().await,
        measurement_running: ctx.registry.is_running().await,
    })
}
