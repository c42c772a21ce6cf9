use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::{ServerToAdmin, UserRole};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    error::AppError,
    routes::auth::{verify_token, TokenQuery},
    state::AppState,
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let claims = verify_token(&query.token, &state.config.auth.jwt_secret)?;
    if claims.role != UserRole::Admin {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(ws.on_upgrade(|socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();
    let mut feed = state.engine.subscribe_feed();

    tracing::info!("Admin console connected: {}", connection_id);

    loop {
        tokio::select! {
            update = feed.recv() => {
                let msg = match update {
                    Ok(msg) => msg,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Admin console {} lagged by {} update(s)", connection_id, skipped);
                        ServerToAdmin::Error {
                            message: format!("Missed {} update(s); refresh to resync", skipped),
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode admin update: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("Admin console {} error: {}", connection_id, e);
                        break;
                    }
                    // The console only listens
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!("Admin console disconnected: {}", connection_id);
}
