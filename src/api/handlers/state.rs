//! System state endpoint and the state channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::pipeline::AppContext;
use crate::types::SystemState;

/// GET /api/v1/state
///
/// Plain requests get the current [`SystemState`]; WebSocket upgrades join
/// the state channel.
pub async fn state_route(
    ws: Option<WebSocketUpgrade>,
    State(ctx): State<AppContext>,
) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| serve_state_channel(socket, ctx)),
        None => Json::<SystemState>(ctx.system_state().await).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StateRequest {
    message: String,
}

fn wants_state(text: &str) -> bool {
    serde_json::from_str::<StateRequest>(text)
        .map(|r| r.message == "get_state")
        .unwrap_or(false)
}

async fn serve_state_channel(socket: WebSocket, ctx: AppContext) {
    let (mut sink, mut inbound) = socket.split();
    let mut updates = ctx.messenger.subscribe();
    debug!(subscribers = ctx.messenger.subscriber_count(), "State channel opened");

    loop {
        let outgoing = tokio::select! {
            update = updates.recv() => match update {
                Ok(payload) => payload,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "State channel lagging, skipping stale updates");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) if wants_state(&text) => {
                    match serde_json::to_string(&ctx.system_state().await) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Failed to serialize system state: {}", e);
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        if sink.send(Message::Text(outgoing)).await.is_err() {
            break;
        }
    }
    debug!("State channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_state_request() {
        assert!(wants_state(r#"{"message":"get_state"}"#));
        assert!(!wants_state(r#"{"message":"stop"}"#));
        assert!(!wants_state("garbage"));
    }
}
