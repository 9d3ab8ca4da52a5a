//! Holder (STU) control

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, info};

use crate::acquisition::HolderError;
use crate::api::envelope::ApiErrorResponse;
use crate::pipeline::AppContext;

/// PUT /api/v1/stu/reset
///
/// A running session is cancelled and torn down before the holder resets.
pub async fn reset_stu(State(ctx): State<AppContext>) -> Response {
    if let Some(outcome) = ctx.registry.cancel_active().await {
        info!(session = %outcome.report().name, "Session cancelled for holder reset");
    }
    match ctx.holder.reset().await {
        Ok(()) => {
            info!(holder = ctx.holder.source_name(), "Holder reset");
            ctx.push_state().await;
            Json(serde_json::Value::Null).into_response()
        }
        Err(HolderError::NoResponse(detail)) => {
            error!("Holder did not respond to reset: {}", detail);
            ApiErrorResponse::bad_gateway(format!("Holder did not respond: {detail}"))
        }
        Err(e) => {
            error!("Holder reset failed: {}", e);
            ApiErrorResponse::internal(e.to_string())
        }
    }
}
