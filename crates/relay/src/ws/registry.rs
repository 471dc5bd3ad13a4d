use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use std::sync::Arc;

use switchboard_common::{protocol::ws::SignalMessage, types::ParticipantId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Outbound queue handle for one connection.
pub(crate) type OutboundSender = mpsc::UnboundedSender<SignalMessage>;

#[derive(Debug, Error)]
pub(crate) enum RegisterError {
    #[error("peer id {0:?} is already registered")]
    PeerIdTaken(String),
}

/// A resolved delivery target: the connection queue to send on and the
/// participant id the copy is addressed to.
#[derive(Debug, Clone)]
pub(crate) struct Recipient {
    pub(crate) channel: OutboundSender,
    pub(crate) addressed_to: ParticipantId,
}

/// Everything a JOIN broadcast needs, captured under one guard.
#[derive(Debug)]
pub(crate) struct JoinPlan {
    /// The joining connection's own queue; the synthesized offers go
    /// back to the joiner.
    pub(crate) channel: OutboundSender,
    /// Identity of every other registered participant, in registry
    /// order: one bare id per connection without locals, one composite
    /// id per local otherwise.
    pub(crate) peers: Vec<ParticipantId>,
}

/// Everything a disconnect broadcast needs, captured under one guard
/// before any state is deleted.
#[derive(Debug)]
pub(crate) struct DisconnectPlan {
    /// Identities the departing connection held.
    pub(crate) identities: Vec<ParticipantId>,
    /// Every other live connection, fanned per its own locals.
    pub(crate) targets: Vec<Recipient>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: BTreeMap<String, OutboundSender>,
    locals: BTreeMap<String, BTreeSet<String>>,
}

impl RegistryInner {
    fn add_local(&mut self, owner: &str, local: &str) {
        self.locals.entry(owner.to_string()).or_default().insert(local.to_string());
    }

    /// The identity list of one registered connection: its locals when
    /// it has any, its bare id otherwise.
    fn identities_of(&self, id: &str) -> Vec<ParticipantId> {
        match self.locals.get(id) {
            Some(locals) if !locals.is_empty() => locals
                .iter()
                .map(|local| ParticipantId::new(id, Some(local.clone())))
                .collect(),
            _ => vec![ParticipantId::bare(id)],
        }
    }

    /// Resolve one target connection into per-local recipients on its
    /// single queue.
    fn recipients_for(&self, id: &str, channel: &OutboundSender) -> Vec<Recipient> {
        self.identities_of(id)
            .into_iter()
            .map(|addressed_to| Recipient { channel: channel.clone(), addressed_to })
            .collect()
    }
}

/// Connection registry and local-peer index behind a single lock.
///
/// Every connection task mutates both maps concurrently. Compound
/// queries read all the keys they need under one guard, so a fan-out
/// never observes a half-updated owner. Queue handles are copied out of
/// the guard; callers send only after the lock is released.
#[derive(Debug, Clone, Default)]
pub(crate) struct PeerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PeerRegistry {
    /// Register a newly connected peer. Ids are unique per live
    /// connection.
    pub(crate) async fn register(
        &self,
        id: &str,
        channel: OutboundSender,
    ) -> Result<(), RegisterError> {
        let mut inner = self.inner.write().await;
        match inner.connections.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegisterError::PeerIdTaken(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(channel);
                Ok(())
            }
        }
    }

    pub(crate) async fn unregister(&self, id: &str) {
        self.inner.write().await.connections.remove(id);
    }

    pub(crate) async fn lookup(&self, id: &str) -> Option<OutboundSender> {
        self.inner.read().await.connections.get(id).cloned()
    }

    /// Ordered copy of the live connection ids.
    pub(crate) async fn snapshot(&self) -> Vec<String> {
        self.inner.read().await.connections.keys().cloned().collect()
    }

    /// Register a local id under `owner`, lazily creating its set.
    pub(crate) async fn add_local(&self, owner: &str, local: &str) {
        self.inner.write().await.add_local(owner, local);
    }

    /// Remove one local id. The owner's set is dropped when it empties;
    /// a set never exists without at least one local.
    pub(crate) async fn remove_local(&self, owner: &str, local: &str) {
        let mut inner = self.inner.write().await;
        if let Some(locals) = inner.locals.get_mut(owner) {
            locals.remove(local);
            if locals.is_empty() {
                inner.locals.remove(owner);
            }
        }
    }

    pub(crate) async fn locals_of(&self, owner: &str) -> BTreeSet<String> {
        self.inner.read().await.locals.get(owner).cloned().unwrap_or_default()
    }

    /// Drop the owner's whole local set.
    pub(crate) async fn remove_owner(&self, owner: &str) {
        self.inner.write().await.locals.remove(owner);
    }

    /// The shared target resolver. A target whose owner is not a live
    /// connection resolves to nothing; a target whose owner has
    /// registered locals resolves to one copy per local, addressed
    /// `owner:local`, all on the owner's queue; otherwise to a single
    /// copy addressed by the bare owner id.
    pub(crate) async fn resolve_recipients(&self, target: &ParticipantId) -> Vec<Recipient> {
        let inner = self.inner.read().await;
        match inner.connections.get(target.owner()) {
            Some(channel) => inner.recipients_for(target.owner(), channel),
            None => Vec::new(),
        }
    }

    /// Record `local` (when present) under the joining connection and
    /// capture the peer identities its JOIN must announce. Returns
    /// `None` while the joiner is alone or no longer registered; the
    /// local registration still sticks.
    pub(crate) async fn join_plan(
        &self,
        joiner: &str,
        local: Option<&str>,
    ) -> Option<JoinPlan> {
        let mut inner = self.inner.write().await;
        if let Some(local) = local {
            inner.add_local(joiner, local);
        }

        let channel = inner.connections.get(joiner)?.clone();
        if inner.connections.len() < 2 {
            return None;
        }

        let peers = inner
            .connections
            .keys()
            .filter(|id| id.as_str() != joiner)
            .flat_map(|id| inner.identities_of(id))
            .collect();

        Some(JoinPlan { channel, peers })
    }

    /// Every live connection except `excluding`, each fanned per its
    /// own locals. Used for EXIT and disconnect broadcasts.
    pub(crate) async fn broadcast_targets(&self, excluding: &str) -> Vec<Recipient> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .filter(|(id, _)| id.as_str() != excluding)
            .flat_map(|(id, channel)| inner.recipients_for(id, channel))
            .collect()
    }

    /// Snapshot for disconnect cleanup: the departing connection's
    /// identity set plus the broadcast targets, all captured before any
    /// deletion happens.
    pub(crate) async fn disconnect_plan(&self, id: &str) -> DisconnectPlan {
        let inner = self.inner.read().await;
        DisconnectPlan {
            identities: inner.identities_of(id),
            targets: inner
                .connections
                .iter()
                .filter(|(other, _)| other.as_str() != id)
                .flat_map(|(other, channel)| inner.recipients_for(other, channel))
                .collect(),
        }
    }

    /// Delete the connection and its local set. Runs only after the
    /// removal broadcast has been dispatched.
    pub(crate) async fn remove_connection(&self, id: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(id);
        inner.locals.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn register(registry: &PeerRegistry, id: &str) -> mpsc::UnboundedReceiver<SignalMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        registry.register(id, sender).await.expect("peer should register");
        receiver
    }

    fn addressed(recipients: &[Recipient]) -> Vec<String> {
        recipients.iter().map(|r| r.addressed_to.to_string()).collect()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_live_id() {
        let registry = PeerRegistry::default();
        let _a = register(&registry, "a").await;

        let (sender, _receiver) = mpsc::unbounded_channel();
        let error = registry.register("a", sender).await.expect_err("duplicate id should fail");
        assert!(matches!(error, RegisterError::PeerIdTaken(id) if id == "a"));

        registry.unregister("a").await;
        let _a2 = register(&registry, "a").await;
    }

    #[tokio::test]
    async fn snapshot_is_ordered() {
        let registry = PeerRegistry::default();
        let _c = register(&registry, "c").await;
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;

        assert_eq!(registry.snapshot().await, vec!["a", "b", "c"]);
        assert!(registry.lookup("b").await.is_some());
        assert!(registry.lookup("missing").await.is_none());
    }

    #[tokio::test]
    async fn local_set_is_never_left_empty() {
        let registry = PeerRegistry::default();
        let _o = register(&registry, "o").await;

        registry.add_local("o", "l1").await;
        registry.add_local("o", "l2").await;
        registry.add_local("o", "l1").await;
        assert_eq!(registry.locals_of("o").await.len(), 2);

        registry.remove_local("o", "l1").await;
        assert_eq!(registry.locals_of("o").await.len(), 1);

        registry.remove_local("o", "l2").await;
        assert!(registry.locals_of("o").await.is_empty());
        assert!(!registry.inner.read().await.locals.contains_key("o"));

        registry.add_local("o", "l3").await;
        registry.remove_owner("o").await;
        assert!(registry.locals_of("o").await.is_empty());
    }

    #[tokio::test]
    async fn resolve_fans_out_to_target_locals() {
        let registry = PeerRegistry::default();
        let _o = register(&registry, "o").await;
        registry.add_local("o", "l1").await;
        registry.add_local("o", "l2").await;

        let recipients = registry.resolve_recipients(&ParticipantId::bare("o")).await;
        assert_eq!(addressed(&recipients), vec!["o:l1", "o:l2"]);

        // A composite target still fans to every local of its owner.
        let composite = ParticipantId::parse("o:l1").expect("id should parse");
        let recipients = registry.resolve_recipients(&composite).await;
        assert_eq!(addressed(&recipients), vec!["o:l1", "o:l2"]);
    }

    #[tokio::test]
    async fn resolve_without_locals_uses_bare_id() {
        let registry = PeerRegistry::default();
        let _o = register(&registry, "o").await;

        let recipients = registry.resolve_recipients(&ParticipantId::bare("o")).await;
        assert_eq!(addressed(&recipients), vec!["o"]);
    }

    #[tokio::test]
    async fn resolve_unknown_owner_is_empty() {
        let registry = PeerRegistry::default();
        let recipients = registry.resolve_recipients(&ParticipantId::bare("ghost")).await;
        assert!(recipients.is_empty());
    }

    #[tokio::test]
    async fn join_plan_requires_a_second_connection() {
        let registry = PeerRegistry::default();
        let _a = register(&registry, "a").await;

        assert!(registry.join_plan("a", Some("x")).await.is_none());
        // The lone join still registered its local.
        assert!(registry.locals_of("a").await.contains("x"));

        let _b = register(&registry, "b").await;
        let plan = registry.join_plan("a", None).await.expect("two peers give a plan");
        assert_eq!(plan.peers, vec![ParticipantId::bare("b")]);
    }

    #[tokio::test]
    async fn join_plan_lists_peer_locals_in_order() {
        let registry = PeerRegistry::default();
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;
        let _c = register(&registry, "c").await;
        registry.add_local("c", "cam").await;
        registry.add_local("c", "mic").await;

        let plan = registry.join_plan("a", None).await.expect("plan should exist");
        let peers: Vec<String> = plan.peers.iter().map(ToString::to_string).collect();
        assert_eq!(peers, vec!["b", "c:cam", "c:mic"]);
    }

    #[tokio::test]
    async fn broadcast_targets_fan_per_recipient_locals() {
        let registry = PeerRegistry::default();
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;
        let _c = register(&registry, "c").await;
        registry.add_local("b", "l1").await;
        registry.add_local("b", "l2").await;

        let targets = registry.broadcast_targets("a").await;
        assert_eq!(addressed(&targets), vec!["b:l1", "b:l2", "c"]);
    }

    #[tokio::test]
    async fn disconnect_plan_snapshots_before_deletion() {
        let registry = PeerRegistry::default();
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;
        registry.add_local("a", "x").await;

        let plan = registry.disconnect_plan("a").await;
        let identities: Vec<String> = plan.identities.iter().map(ToString::to_string).collect();
        assert_eq!(identities, vec!["a:x"]);
        assert_eq!(addressed(&plan.targets), vec!["b"]);

        registry.remove_connection("a").await;
        assert!(registry.lookup("a").await.is_none());
        assert!(registry.locals_of("a").await.is_empty());
        assert_eq!(registry.snapshot().await, vec!["b"]);
    }
}
