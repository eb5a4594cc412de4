use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SessionRegistry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Uuid,
}

/// GET /ws?user_id=
/// Upgrades and registers a notification session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| session(socket, sessions, query.user_id))
}

async fn session(socket: WebSocket, sessions: Arc<SessionRegistry>, user_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = sessions.register(user_id, tx);
    info!(%user_id, "Notification session opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize notification: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    sessions.unregister(user_id, session_id);
    debug!(%user_id, "Notification session closed");
}
