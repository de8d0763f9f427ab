//! WebSocket handler for real-time download state updates

use crate::download::StateUpdate;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe to state updates
    let mut updates_rx = state.downloads.subscribe();

    info!("WebSocket client connected");

    // Forward state updates to the client
    let send_task = tokio::spawn(async move {
        while let Some(update) = next_update(&mut updates_rx).await {
            let msg = match serde_json::to_string(&update) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to encode state update: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // The client does not send anything meaningful; watch for disconnects
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
}

/// Next update for a client; a slow client skips what it missed and stays
/// connected. `None` once the coordinator is gone.
async fn next_update(rx: &mut broadcast::Receiver<StateUpdate>) -> Option<StateUpdate> {
    loop {
        match rx.recv().await {
            Ok(update) => return Some(update),
            Err(RecvError::Lagged(skipped)) => {
                warn!("WebSocket client lagged, skipped {} updates", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
