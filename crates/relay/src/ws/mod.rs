mod handler;
mod protocol;
mod registry;
mod router;

pub(crate) use registry::PeerRegistry;

use axum::{routing::get, Router};

/// Build the signaling WebSocket routes.
pub(crate) fn routes(registry: PeerRegistry) -> Router {
    Router::new()
        .route("/v1/signal/{peer_id}", get(handler::ws_upgrade))
        .with_state(registry)
}
