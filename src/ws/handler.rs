//! WebSocket upgrade handlers
//!
//! Two transports feed the same match loop: `/ws` for browsers and
//! `/ws/device` for native controllers, whose frames carry a `device:`
//! type prefix. Each socket gets its own handle; the device id only
//! matters for rejoining.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{ConnectionHandle, InputKind, Outbound, PlayerInput};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{decode_client, encode_server, ServerMsg};

/// Query parameters for the device transport
#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: String,
}

/// Browser transport upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection = ConnectionHandle::new_socket();
    info!(connection = %connection, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, connection, false, state))
}

/// Device transport upgrade
pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<DeviceQuery>,
    State(state): State<AppState>,
) -> Response {
    let device_id = query.device_id.trim().to_string();
    if device_id.is_empty() {
        warn!("Device upgrade without a device id");
        return (StatusCode::BAD_REQUEST, "device_id is required").into_response();
    }

    let connection = ConnectionHandle::new_device(device_id);
    info!(connection = %connection, "Device WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, connection, true, state))
}

/// Handle an upgraded connection until either side goes away
async fn handle_socket(socket: WebSocket, connection: ConnectionHandle, device: bool, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();

    // Subscribe before announcing, so the welcome cannot be missed
    let outbound_rx = state.game.subscribe();
    let input_tx = state.game.input_tx.clone();

    if input_tx
        .send(PlayerInput {
            connection: connection.clone(),
            kind: InputKind::Connected,
        })
        .await
        .is_err()
    {
        error!(connection = %connection, "Match loop is gone, dropping connection");
        return;
    }

    run_session(&connection, device, ws_sink, ws_stream, &input_tx, outbound_rx).await;

    let _ = input_tx
        .send(PlayerInput {
            connection: connection.clone(),
            kind: InputKind::Closed,
        })
        .await;

    info!(connection = %connection, "WebSocket connection closed");
}

/// Pump messages in both directions
async fn run_session(
    connection: &ConnectionHandle,
    device: bool,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    input_tx: &mpsc::Sender<PlayerInput>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: match loop -> WebSocket
    let writer_connection = connection.clone();
    let writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(out) => {
                    if !out.is_for(&writer_connection) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &out.msg, device).await {
                        debug!(connection = %writer_connection, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        connection = %writer_connection,
                        lagged_count = n,
                        "Client lagged, skipping {} messages", n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection = %writer_connection, "Outbound channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> match loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection = %connection, "Rate limited input message");
                    continue;
                }

                match decode_client(&text, device) {
                    Ok(msg) => {
                        let input = PlayerInput {
                            connection: connection.clone(),
                            kind: InputKind::Message(msg),
                        };
                        if input_tx.send(input).await.is_err() {
                            debug!(connection = %connection, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection = %connection, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection = %connection, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
    device: bool,
) -> Result<(), String> {
    let json = encode_server(msg, device).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
