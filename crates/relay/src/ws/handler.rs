use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use serde_json::json;
use switchboard_common::protocol::ws::SignalMessage;
use switchboard_common::types::LOCAL_ID_SEPARATOR;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::protocol as ws_protocol;
use super::registry::PeerRegistry;
use super::router;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: u32 = 65_536;

pub(crate) async fn ws_upgrade(
    Path(peer_id): Path<String>,
    State(registry): State<PeerRegistry>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if peer_id.is_empty() || peer_id.contains(LOCAL_ID_SEPARATOR) {
        return RelayError::new(
            ErrorCode::ValidationFailed,
            "peer id must be non-empty and must not contain ':'",
        )
        .with_details(json!({ "peer_id": peer_id }))
        .into_response();
    }

    // Fast rejection before the upgrade; the registration inside
    // handle_socket settles any race between two upgrades with the
    // same id.
    if registry.lookup(&peer_id).await.is_some() {
        return RelayError::from_code(ErrorCode::PeerIdTaken)
            .with_details(json!({ "peer_id": peer_id }))
            .into_response();
    }

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(registry, peer_id, socket)).await;
        })
        .into_response()
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket(registry: PeerRegistry, peer_id: String, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<SignalMessage>();
    if let Err(error) = registry.register(&peer_id, outbound_sender).await {
        warn!(peer_id = %peer_id, request_id = %request_id, %error, "rejecting connection");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "peer id is already registered".into(),
            })))
            .await;
        return;
    }
    info!(peer_id = %peer_id, request_id = %request_id, "peer connected");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects
    // if no pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(
                        peer_id = %peer_id,
                        request_id = %request_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_signal_message(&mut socket, &outbound_message)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        // Undecodable frames are dropped; the
                        // connection stays open.
                        match ws_protocol::decode_message(&raw_message) {
                            Ok(inbound) => {
                                router::route_inbound(&registry, &peer_id, inbound).await;
                            }
                            Err(error) => {
                                warn!(
                                    peer_id = %peer_id,
                                    request_id = %request_id,
                                    %error,
                                    "dropping undecodable frame"
                                );
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {
                        debug!(peer_id = %peer_id, "ignoring non-text frame");
                    }
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    // Every exit path funnels through here exactly once: broadcast the
    // departure, then prune registry and index.
    router::handle_disconnect(&registry, &peer_id).await;
    info!(peer_id = %peer_id, request_id = %request_id, "peer disconnected");
}
