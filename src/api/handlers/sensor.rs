//! Sensor catalogue endpoints

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use tracing::{error, info};

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::pipeline::AppContext;
use crate::types::Sensor;

/// GET /api/v1/sensor
pub async fn list_sensors(State(ctx): State<AppContext>) -> Json<Vec<Sensor>> {
    Json(ctx.resolver.sensors().await)
}

/// POST /api/v1/sensor/reset - rewrite the catalogue with the built-in sensors
pub async fn reset_sensors(State(ctx): State<AppContext>) -> Response {
    match ctx.resolver.reset_to_defaults().await {
        Ok(()) => {
            info!("Sensor catalogue reset to defaults");
            ApiResponse::ok(ctx.resolver.sensors().await)
        }
        Err(e) => {
            error!("Failed to reset sensor catalogue: {}", e);
            ApiErrorResponse::internal(format!("Failed to reset sensor catalogue: {e}"))
        }
    }
}
