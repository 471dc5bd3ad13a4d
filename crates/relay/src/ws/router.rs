// Per-action routing of inbound signaling frames.
//
// Handlers are stateless over the registry: each one captures the
// recipients it needs under a single registry guard, then sends the
// rewritten copies on the per-connection queues after the guard is
// released. Forwarded copies always carry the sender rewritten to its
// full participant id.

use switchboard_common::protocol::ws::{SignalAction, SignalMessage};
use switchboard_common::types::ParticipantId;
use tracing::{debug, warn};

use super::registry::{PeerRegistry, Recipient};

/// Route one inbound frame from `sender_id`'s connection.
pub(crate) async fn route_inbound(
    registry: &PeerRegistry,
    sender_id: &str,
    message: SignalMessage,
) {
    match message.action {
        SignalAction::Join => handle_join_message(registry, sender_id, message).await,
        SignalAction::SessionDescription | SignalAction::IceCandidate => {
            handle_relay_message(registry, sender_id, message).await;
        }
        SignalAction::Exit => handle_exit_message(registry, sender_id, message).await,
        SignalAction::CreateOffer | SignalAction::CreateAnswer | SignalAction::Remove => {
            warn!(
                peer_id = %sender_id,
                action = message.action.as_str(),
                "ignoring server-only action sent by client",
            );
        }
    }
}

/// JOIN: record the announced local id, then deliver one CREATE_OFFER
/// per already-present peer identity back to the joiner, so it can
/// open an offer toward each of them.
async fn handle_join_message(registry: &PeerRegistry, sender_id: &str, message: SignalMessage) {
    let joiner = ParticipantId::new(sender_id, message.from.clone());
    let Some(plan) = registry.join_plan(sender_id, message.from.as_deref()).await else {
        debug!(peer_id = %sender_id, "join with no other connections, nothing to announce");
        return;
    };

    for peer in plan.peers {
        let offer = SignalMessage {
            action: SignalAction::CreateOffer,
            from: Some(peer.to_string()),
            to: Some(joiner.clone()),
            text: String::new(),
        };
        if plan.channel.send(offer).is_err() {
            // Joiner already tearing down; its cleanup handles the rest.
            break;
        }
    }
}

/// SESSION_DESCRIPTION and ICE_CANDIDATE: forward to the target,
/// fanned per the target's registered locals. An unknown target drops
/// the frame with no signal to the sender.
async fn handle_relay_message(registry: &PeerRegistry, sender_id: &str, message: SignalMessage) {
    let Some(target) = message.to else {
        debug!(
            peer_id = %sender_id,
            action = message.action.as_str(),
            "dropping frame without a target",
        );
        return;
    };

    let recipients = registry.resolve_recipients(&target).await;
    if recipients.is_empty() {
        debug!(peer_id = %sender_id, target = %target, "dropping frame for unknown target");
        return;
    }

    let action = forwarded_action(message.action, &message.text);
    let from = ParticipantId::new(sender_id, message.from);
    for Recipient { channel, addressed_to } in recipients {
        let copy = SignalMessage {
            action,
            from: Some(from.to_string()),
            to: Some(addressed_to),
            text: message.text.clone(),
        };
        // A dead queue means the recipient is mid-teardown; its own
        // cleanup will broadcast the removal.
        let _ = channel.send(copy);
    }
}

/// EXIT: broadcast a REMOVE for the retiring identity to every other
/// connection, then drop the local id. The connection itself stays
/// registered.
async fn handle_exit_message(registry: &PeerRegistry, sender_id: &str, message: SignalMessage) {
    let retiring = ParticipantId::new(sender_id, message.from.clone());
    let targets = registry.broadcast_targets(sender_id).await;
    send_removals(&targets, &retiring);

    if let Some(local) = message.from.as_deref() {
        registry.remove_local(sender_id, local).await;
    }
}

/// Disconnect cleanup: broadcast a REMOVE for every identity the
/// departing connection held, then prune it from the registry and
/// index. The snapshot is taken before any deletion so a concurrent
/// disconnect cannot observe a half-removed peer.
pub(crate) async fn handle_disconnect(registry: &PeerRegistry, peer_id: &str) {
    let plan = registry.disconnect_plan(peer_id).await;
    for identity in &plan.identities {
        send_removals(&plan.targets, identity);
    }
    registry.remove_connection(peer_id).await;
}

fn send_removals(targets: &[Recipient], identity: &ParticipantId) {
    for Recipient { channel, addressed_to } in targets {
        let remove = SignalMessage {
            action: SignalAction::Remove,
            from: Some(identity.to_string()),
            to: Some(addressed_to.clone()),
            text: String::new(),
        };
        let _ = channel.send(remove);
    }
}

/// An offer-bearing session description is forwarded as CREATE_ANSWER:
/// the payload is an offer, so the recipient must answer it.
fn forwarded_action(action: SignalAction, text: &str) -> SignalAction {
    match action {
        SignalAction::SessionDescription if text.to_ascii_lowercase().contains("offer") => {
            SignalAction::CreateAnswer
        }
        other => other,
    }
}
