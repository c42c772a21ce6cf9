use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::{DeviceToServer, ServerToDevice, UserRole};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    engine::location::LocationError,
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
    if claims.role != UserRole::Salesman {
        return Err(AppError::Forbidden("Device link is for salesmen only".to_string()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // Wait for the device to report its location permission first
    let permission_granted = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<DeviceToServer>(&text) {
                Ok(DeviceToServer::Hello { permission_granted }) => break permission_granted,
                Ok(_) => {
                    tracing::warn!("Expected Hello from device, got something else");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Failed to parse device message: {}", e);
                    continue;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                tracing::error!("WebSocket error: {}", e);
                return;
            }
            _ => continue,
        }
    };

    // Channel for sending messages to this device
    let (tx, mut rx) = mpsc::channel::<ServerToDevice>(32);
    state
        .devices
        .register(&user_id, connection_id, tx.clone(), permission_granted);

    // Task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode device message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = tx
        .send(ServerToDevice::Registered {
            user_id: user_id.clone(),
        })
        .await;

    // Resume the tracker if the session is still open
    match state.engine.session_status(&user_id).await {
        Ok(status) => {
            let _ = tx.send(ServerToDevice::SessionState { status }).await;
            if let Err(e) = state.engine.resume_tracking(&user_id).await {
                tracing::warn!("Could not resume tracking for user {}: {}", user_id, e);
            }
        }
        Err(e) => tracing::error!("Failed to load session for user {}: {}", user_id, e),
    }

    // Handle incoming messages
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<DeviceToServer>(&text) {
                Ok(DeviceToServer::Position { coordinate }) => {
                    state.devices.deliver(&user_id, Ok(coordinate));
                }
                Ok(DeviceToServer::PositionError { reason }) => {
                    state
                        .devices
                        .deliver(&user_id, Err(LocationError::Unavailable(reason)));
                }
                Ok(DeviceToServer::Fix { request_id, report }) => {
                    state.devices.complete_fix(request_id, report);
                }
                Ok(DeviceToServer::Permission { granted }) => {
                    tracing::info!("Device permission for user {} is now {}", user_id, granted);
                    state.devices.set_permission(&user_id, granted);
                    if granted {
                        if let Err(e) = state.engine.resume_tracking(&user_id).await {
                            tracing::warn!("Could not resume tracking for user {}: {}", user_id, e);
                        }
                    }
                }
                Ok(DeviceToServer::Heartbeat) => {
                    let _ = tx.send(ServerToDevice::Heartbeat).await;
                }
                Ok(DeviceToServer::Hello { .. }) => {
                    // Already registered, ignore
                }
                Err(e) => {
                    tracing::warn!("Failed to parse device message: {}", e);
                    let _ = tx
                        .send(ServerToDevice::Error {
                            message: format!("Invalid message: {}", e),
                        })
                        .await;
                }
            },
            Message::Ping(_) => {
                // Pong is handled automatically
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup; a reconnect may already have replaced this link
    if state.devices.unregister(&user_id, connection_id) {
        state.engine.stop_tracking(&user_id);
        state.engine.mark_offline(&user_id).await;
    }
    send_task.abort();
    tracing::info!("Device disconnected for user {}: {}", user_id, connection_id);
}
