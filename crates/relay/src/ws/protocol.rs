use axum::extract::ws::{Message, WebSocket};
use switchboard_common::protocol::ws::SignalMessage;

pub(crate) fn decode_message(raw: &str) -> Result<SignalMessage, serde_json::Error> {
    serde_json::from_str::<SignalMessage>(raw)
}

pub(crate) fn encode_message(message: &SignalMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub(crate) async fn send_signal_message(
    socket: &mut WebSocket,
    message: &SignalMessage,
) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
