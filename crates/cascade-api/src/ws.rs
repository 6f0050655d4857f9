//! Websocket endpoint pushing execution events to connected clients

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::debug;
use uuid::Uuid;

use crate::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/executions/:workflow_id", get(execution_events))
        .with_state(state)
}

/// GET /ws/executions/:workflow_id - Upgrade and stream execution events
pub async fn execution_events(
    ws: WebSocketUpgrade,
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state, workflow_id))
}

async fn stream_events(mut socket: WebSocket, state: AppState, workflow_id: Uuid) {
    let mut subscription = state.bus.subscribe(workflow_id);
    debug!(%workflow_id, subscriber = %subscription.id, "websocket connected");

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                match event {
                    Some(event) => {
                        let payload = serde_json::to_string(&event)
                            .unwrap_or_else(|_| "{}".to_string());
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients only listen; drain anything else
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.bus.unsubscribe(workflow_id, subscription.id);
    debug!(%workflow_id, subscriber = %subscription.id, "websocket disconnected");
}
