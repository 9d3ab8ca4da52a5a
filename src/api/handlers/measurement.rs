//! Measurement control endpoints and the live observer channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::acquisition::AdcConfiguration;
use crate::api::envelope::ApiErrorResponse;
use crate::pipeline::{AppContext, ChannelObserver, OutboundFrame};
use crate::types::{ControlResponse, MeasurementInstructions, MeasurementStatus, Metadata};

/// POST /api/v1/measurement/start
///
/// Starting while a session runs is not an error: the unchanged status comes
/// back with "Measurement is already running."
pub async fn start_measurement(
    State(ctx): State<AppContext>,
    Json(instructions): Json<MeasurementInstructions>,
) -> Response {
    if let Err(errors) = AdcConfiguration::from_params(&instructions.adc).validate() {
        return ApiErrorResponse::unprocessable(errors.join("; "));
    }
    let result = ctx.registry.start(instructions).await;
    Json(ControlResponse {
        message: result.message().to_string(),
        data: result.into_status(),
    })
    .into_response()
}

/// POST /api/v1/measurement/stop
pub async fn stop_measurement(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    ctx.registry.request_stop();
    Json(serde_json::Value::Null)
}

/// POST /api/v1/measurement/post_meta
pub async fn post_meta(
    State(ctx): State<AppContext>,
    Json(meta): Json<Metadata>,
) -> Json<serde_json::Value> {
    ctx.registry.set_post_meta(meta).await;
    Json(serde_json::Value::Null)
}

/// GET /api/v1/measurement
pub async fn measurement_status(State(ctx): State<AppContext>) -> Json<MeasurementStatus> {
    Json(ctx.registry.status().await)
}

/// WS /api/v1/measurement/stream
pub async fn measurement_stream(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
) -> Response {
    ws.on_upgrade(move |socket| observe_measurement(socket, ctx))
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    message: String,
}

/// Only a well-formed `{"message": "stop"}` counts as a stop request.
fn is_stop_request(text: &str) -> bool {
    serde_json::from_str::<ClientMessage>(text)
        .map(|m| m.message == "stop")
        .unwrap_or(false)
}

async fn observe_measurement(socket: WebSocket, ctx: AppContext) {
    let (mut sink, mut inbound) = socket.split();
    let (observer, mut frames) = ChannelObserver::new();
    let id = ctx.registry.add_observer(Arc::new(observer)).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        // observer dropped or closed: make sure the peer sees the close
        let _ = sink.close().await;
    });

    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if is_stop_request(&text) {
                    info!(observer = id, "Stop requested by stream client");
                    ctx.registry.request_stop();
                } else {
                    debug!(observer = id, "Ignoring stream client message");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    ctx.registry.remove_observer(id).await;
    writer.abort();
}
