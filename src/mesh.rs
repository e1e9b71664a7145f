//! Peer voice signaling mesh
//!
//! Every mic-enabled participant keeps one peer link to every other one (at
//! most four contestants plus the host). Offers, answers and trickled ICE
//! candidates travel as [`SignalEnvelope`]s on the game's broadcast channel;
//! each mesh drops envelopes not addressed to it.
//!
//! The media side (peer connections, audio tracks) sits behind
//! [`PeerConnector`]. When two peers offer to each other at once, the one with
//! the smaller player id drops its own offer and answers the other.

use crate::bus::BroadcastBus;
use crate::error::SessionResult;
use crate::protocol::{MicStatusEvent, SessionEvent, SignalEnvelope, SignalKind};
use crate::session::{channel_key, SessionContext};
use crate::types::{GameId, PlayerId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Media backend for the mesh (one peer connection per remote participant)
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Acquire the local audio track. Fails with `PermissionDenied` when access is refused.
    async fn open_microphone(&self) -> SessionResult<()>;

    async fn close_microphone(&self);

    /// Create a connection to `peer` with the local track attached and return its offer
    async fn create_offer(&self, peer: &str) -> SessionResult<Value>;

    /// Create a connection from a remote offer and return the answer
    async fn accept_offer(&self, peer: &str, offer: Value) -> SessionResult<Value>;

    async fn apply_answer(&self, peer: &str, answer: Value) -> SessionResult<()>;

    async fn add_ice_candidate(&self, peer: &str, candidate: Value) -> SessionResult<()>;

    /// Close the connection and release the peer's remote audio sink
    async fn close(&self, peer: &str);
}

/// Connection state reported by the media backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Our offer is out, waiting for the answer
    Offering,
    /// Offer and answer exchanged, ICE in progress
    Negotiated,
    Connected,
    /// Dropped by the transport; not retried
    Disconnected,
}

pub struct VoiceMesh<C: PeerConnector> {
    self_id: PlayerId,
    game_id: GameId,
    bus: BroadcastBus,
    connector: C,
    mic_on: bool,
    roster: HashSet<PlayerId>,
    links: HashMap<PlayerId, LinkState>,
    remote_mic: HashMap<PlayerId, bool>,
}

impl<C: PeerConnector> VoiceMesh<C> {
    pub fn new(ctx: &SessionContext, bus: BroadcastBus, connector: C) -> Self {
        Self {
            self_id: ctx.player_id.clone(),
            game_id: ctx.game_id.clone(),
            bus,
            connector,
            mic_on: false,
            roster: HashSet::new(),
            links: HashMap::new(),
            remote_mic: HashMap::new(),
        }
    }

    pub fn mic_on(&self) -> bool {
        self.mic_on
    }

    pub fn link(&self, peer: &str) -> Option<LinkState> {
        self.links.get(peer).copied()
    }

    /// Peers we currently hold a link to, sorted
    pub fn peers(&self) -> Vec<PlayerId> {
        let mut peers: Vec<_> = self.links.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Last mic status announced by a peer
    pub fn remote_mic(&self, peer: &str) -> Option<bool> {
        self.remote_mic.get(peer).copied()
    }

    /// Toggle the local microphone.
    ///
    /// Turning it on announces the change and offers to every present peer.
    /// Turning it off closes every local link; links between other peers are
    /// untouched.
    pub async fn set_mic(&mut self, on: bool) -> SessionResult<()> {
        if on == self.mic_on {
            return Ok(());
        }

        if on {
            if let Err(e) = self.connector.open_microphone().await {
                tracing::warn!("Microphone unavailable for {}: {}", self.self_id, e);
                return Err(e);
            }
            self.mic_on = true;
            self.announce_mic().await;
            let roster: Vec<_> = self.roster.iter().cloned().collect();
            self.reconcile(&roster).await
        } else {
            for peer in self.peers() {
                self.drop_link(&peer).await;
            }
            self.connector.close_microphone().await;
            self.mic_on = false;
            self.announce_mic().await;
            Ok(())
        }
    }

    /// Diff the set of other connected players against existing links.
    ///
    /// Driven by the server's presence roster. A peer whose offer cannot be
    /// created is skipped and only retried on the next roster change.
    pub async fn reconcile(&mut self, roster: &[PlayerId]) -> SessionResult<()> {
        self.roster = roster
            .iter()
            .filter(|p| **p != self.self_id)
            .cloned()
            .collect();

        let gone: Vec<_> = self
            .links
            .keys()
            .filter(|p| !self.roster.contains(*p))
            .cloned()
            .collect();
        for peer in gone {
            tracing::debug!("{} left, closing link from {}", peer, self.self_id);
            self.drop_link(&peer).await;
        }

        if !self.mic_on {
            return Ok(());
        }

        let mut missing: Vec<_> = self
            .roster
            .iter()
            .filter(|p| !self.links.contains_key(*p) && self.remote_mic(p) != Some(false))
            .cloned()
            .collect();
        missing.sort();
        for peer in missing {
            // One bad peer must not keep the rest of the roster from linking up
            if let Err(e) = self.offer(&peer).await {
                tracing::warn!("Offer from {} to {} failed: {}", self.self_id, peer, e);
            }
        }
        Ok(())
    }

    /// Feed one bus event into the mesh
    pub async fn handle_event(&mut self, event: &SessionEvent) -> SessionResult<()> {
        match event {
            SessionEvent::Signal(envelope) => {
                if envelope.to != self.self_id || envelope.from == self.self_id {
                    return Ok(());
                }
                self.handle_signal(envelope).await
            }
            SessionEvent::MicStatus(status) => {
                if status.player_id == self.self_id {
                    return Ok(());
                }
                self.remote_mic.insert(status.player_id.clone(), status.is_on);
                if !status.is_on {
                    if self.links.contains_key(&status.player_id) {
                        self.drop_link(&status.player_id).await;
                    }
                } else if self.mic_on
                    && self.roster.contains(&status.player_id)
                    && !self.links.contains_key(&status.player_id)
                {
                    self.offer(&status.player_id).await?;
                }
                Ok(())
            }
            SessionEvent::Presence(presence) => self.reconcile(&presence.connected).await,
            SessionEvent::Timer(_) | SessionEvent::RoundFinished(_) => Ok(()),
        }
    }

    /// Trickle a locally gathered ICE candidate to `peer`
    pub async fn local_ice_candidate(&self, peer: &str, candidate: Value) {
        if !self.links.contains_key(peer) {
            tracing::debug!("Dropping ICE candidate for unlinked peer {}", peer);
            return;
        }
        self.send(peer, SignalKind::IceCandidate, candidate).await;
    }

    /// Record a transport state change. Anything but connected reads as
    /// disconnected; the link is not re-offered.
    pub fn connection_state_changed(
        &mut self,
        peer: &str,
        state: ConnectionState,
    ) -> Option<LinkState> {
        let link = self.links.get_mut(peer)?;
        let next = match state {
            ConnectionState::Connected => LinkState::Connected,
            _ => LinkState::Disconnected,
        };
        if *link != next {
            tracing::info!("Link {} -> {} is now {:?}", self.self_id, peer, next);
            *link = next;
        }
        Some(next)
    }

    async fn handle_signal(&mut self, envelope: &SignalEnvelope) -> SessionResult<()> {
        let peer = envelope.from.as_str();
        match envelope.kind {
            SignalKind::Offer => {
                if !self.mic_on {
                    tracing::debug!("Ignoring offer from {} with mic off", peer);
                    return Ok(());
                }
                if let Some(state) = self.links.get(peer).copied() {
                    // Glare: the larger id keeps its own offer
                    if state == LinkState::Offering && self.self_id.as_str() > peer {
                        tracing::debug!("Glare with {}, keeping own offer", peer);
                        return Ok(());
                    }
                    self.drop_link(peer).await;
                }
                let answer = self
                    .connector
                    .accept_offer(peer, envelope.payload.clone())
                    .await?;
                self.links.insert(peer.to_string(), LinkState::Negotiated);
                self.send(peer, SignalKind::Answer, answer).await;
            }
            SignalKind::Answer => match self.links.get(peer) {
                Some(LinkState::Offering) => {
                    self.connector
                        .apply_answer(peer, envelope.payload.clone())
                        .await?;
                    self.links.insert(peer.to_string(), LinkState::Negotiated);
                }
                other => {
                    tracing::debug!("Ignoring answer from {} in state {:?}", peer, other);
                }
            },
            SignalKind::IceCandidate => {
                if self.links.contains_key(peer) {
                    self.connector
                        .add_ice_candidate(peer, envelope.payload.clone())
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn offer(&mut self, peer: &str) -> SessionResult<()> {
        let offer = self.connector.create_offer(peer).await?;
        self.links.insert(peer.to_string(), LinkState::Offering);
        self.send(peer, SignalKind::Offer, offer).await;
        Ok(())
    }

    async fn drop_link(&mut self, peer: &str) {
        self.connector.close(peer).await;
        self.links.remove(peer);
    }

    async fn send(&self, to: &str, kind: SignalKind, payload: Value) {
        let envelope = SignalEnvelope {
            from: self.self_id.clone(),
            to: to.to_string(),
            kind,
            payload,
        };
        self.bus
            .publish(&channel_key(&self.game_id), SessionEvent::Signal(envelope))
            .await;
    }

    async fn announce_mic(&self) {
        let event = MicStatusEvent {
            player_id: self.self_id.clone(),
            is_on: self.mic_on,
        };
        self.bus
            .publish(&channel_key(&self.game_id), SessionEvent::MicStatus(event))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusSubscription;
    use crate::error::SessionError;
    use crate::protocol::PresenceEvent;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeConnector {
        deny_mic: bool,
        unreachable: Option<String>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeConnector {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn closed(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| e.strip_prefix("close:").map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl PeerConnector for FakeConnector {
        async fn open_microphone(&self) -> SessionResult<()> {
            if self.deny_mic {
                return Err(SessionError::PermissionDenied("microphone".to_string()));
            }
            self.record("mic:on".to_string());
            Ok(())
        }

        async fn close_microphone(&self) {
            self.record("mic:off".to_string());
        }

        async fn create_offer(&self, peer: &str) -> SessionResult<Value> {
            if self.unreachable.as_deref() == Some(peer) {
                return Err(SessionError::TransportDegraded(format!("no route to {}", peer)));
            }
            self.record(format!("offer:{}", peer));
            Ok(json!({"type": "offer", "sdp": format!("v=0 to {}", peer)}))
        }

        async fn accept_offer(&self, peer: &str, _offer: Value) -> SessionResult<Value> {
            self.record(format!("accept:{}", peer));
            Ok(json!({"type": "answer", "sdp": format!("v=0 to {}", peer)}))
        }

        async fn apply_answer(&self, peer: &str, _answer: Value) -> SessionResult<()> {
            self.record(format!("answer:{}", peer));
            Ok(())
        }

        async fn add_ice_candidate(&self, peer: &str, _candidate: Value) -> SessionResult<()> {
            self.record(format!("ice:{}", peer));
            Ok(())
        }

        async fn close(&self, peer: &str) {
            self.record(format!("close:{}", peer));
        }
    }

    struct Node {
        mesh: VoiceMesh<FakeConnector>,
        connector: FakeConnector,
        sub: BusSubscription,
    }

    async fn node(bus: &BroadcastBus, id: &str) -> Node {
        let ctx = SessionContext {
            game_id: "g1".to_string(),
            game_code: "ABCDEF".to_string(),
            player_id: id.to_string(),
            is_host: false,
        };
        let connector = FakeConnector::default();
        Node {
            mesh: VoiceMesh::new(&ctx, bus.clone(), connector.clone()),
            connector,
            sub: bus.subscribe("game:g1").await,
        }
    }

    /// Deliver queued bus events until every node is idle
    async fn pump(nodes: &mut [Node]) {
        loop {
            let mut delivered = false;
            for node in nodes.iter_mut() {
                while let Ok(event) = node.sub.try_recv() {
                    node.mesh.handle_event(&event).await.unwrap();
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    async fn meshed(bus: &BroadcastBus, ids: &[&str]) -> Vec<Node> {
        let roster: Vec<PlayerId> = ids.iter().map(|s| s.to_string()).collect();
        let mut nodes = Vec::new();
        for id in ids {
            nodes.push(node(bus, id).await);
        }
        for node in nodes.iter_mut() {
            node.mesh.reconcile(&roster).await.unwrap();
            node.mesh.set_mic(true).await.unwrap();
        }
        pump(&mut nodes).await;
        nodes
    }

    #[tokio::test]
    async fn test_full_mesh_forms() {
        let bus = BroadcastBus::default();
        let nodes = meshed(&bus, &["a", "b", "c"]).await;

        for node in &nodes {
            let peers = node.mesh.peers();
            assert_eq!(peers.len(), 2);
            for peer in peers {
                assert_eq!(node.mesh.link(&peer), Some(LinkState::Negotiated));
            }
        }
    }

    #[tokio::test]
    async fn test_roster_diff_closes_only_departed_peer() {
        let bus = BroadcastBus::default();
        let mut nodes = meshed(&bus, &["a", "b", "c"]).await;
        let before: Vec<_> = nodes.iter().map(|n| n.connector.closed().len()).collect();

        let roster = vec!["a".to_string(), "b".to_string()];
        for node in nodes.iter_mut().take(2) {
            node.mesh.reconcile(&roster).await.unwrap();
        }
        pump(&mut nodes).await;

        assert_eq!(nodes[0].mesh.peers(), vec!["b"]);
        assert_eq!(nodes[1].mesh.peers(), vec!["a"]);
        assert_eq!(&nodes[0].connector.closed()[before[0]..], ["c"]);
        assert_eq!(&nodes[1].connector.closed()[before[1]..], ["c"]);
    }

    #[tokio::test]
    async fn test_presence_roster_drives_links() {
        let bus = BroadcastBus::default();
        let mut nodes = meshed(&bus, &["a", "b", "c"]).await;
        let before: Vec<_> = nodes.iter().map(|n| n.connector.closed().len()).collect();

        // What the server publishes once c's socket goes away
        bus.publish(
            "game:g1",
            SessionEvent::Presence(PresenceEvent {
                connected: vec!["a".to_string(), "b".to_string()],
            }),
        )
        .await;
        pump(&mut nodes).await;

        assert_eq!(nodes[0].mesh.peers(), vec!["b"]);
        assert_eq!(nodes[1].mesh.peers(), vec!["a"]);
        assert_eq!(&nodes[0].connector.closed()[before[0]..], ["c"]);
        assert_eq!(&nodes[1].connector.closed()[before[1]..], ["c"]);
    }

    #[tokio::test]
    async fn test_failed_offer_does_not_block_other_peers() {
        let bus = BroadcastBus::default();
        let ctx = SessionContext {
            game_id: "g1".to_string(),
            game_code: "ABCDEF".to_string(),
            player_id: "a".to_string(),
            is_host: false,
        };
        let connector = FakeConnector {
            unreachable: Some("b".to_string()),
            ..Default::default()
        };
        let mut mesh = VoiceMesh::new(&ctx, bus, connector);
        mesh.set_mic(true).await.unwrap();

        let roster = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        mesh.reconcile(&roster).await.unwrap();

        assert_eq!(mesh.link("b"), None);
        assert_eq!(mesh.link("c"), Some(LinkState::Offering));
    }

    #[tokio::test]
    async fn test_mic_off_tears_down_only_local_links() {
        let bus = BroadcastBus::default();
        let mut nodes = meshed(&bus, &["a", "b", "c"]).await;

        nodes[2].mesh.set_mic(false).await.unwrap();
        pump(&mut nodes).await;

        assert!(nodes[2].mesh.peers().is_empty());
        assert_eq!(nodes[0].mesh.peers(), vec!["b"]);
        assert_eq!(nodes[1].mesh.peers(), vec!["a"]);
        assert_eq!(nodes[0].mesh.remote_mic("c"), Some(false));
    }

    #[tokio::test]
    async fn test_envelopes_for_others_are_dropped() {
        let bus = BroadcastBus::default();
        let mut a = node(&bus, "a").await;
        a.mesh.reconcile(&["b".to_string()]).await.unwrap();
        a.mesh.set_mic(true).await.unwrap();

        let stray = SessionEvent::Signal(SignalEnvelope {
            from: "b".to_string(),
            to: "c".to_string(),
            kind: SignalKind::Offer,
            payload: json!({}),
        });
        a.mesh.handle_event(&stray).await.unwrap();
        assert!(!a
            .connector
            .log
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("accept:")));
    }

    #[tokio::test]
    async fn test_glare_smaller_id_answers() {
        let bus = BroadcastBus::default();
        let mut a = node(&bus, "a").await;
        a.mesh.reconcile(&["b".to_string()]).await.unwrap();
        a.mesh.set_mic(true).await.unwrap();
        assert_eq!(a.mesh.link("b"), Some(LinkState::Offering));

        let crossing = SessionEvent::Signal(SignalEnvelope {
            from: "b".to_string(),
            to: "a".to_string(),
            kind: SignalKind::Offer,
            payload: json!({"type": "offer"}),
        });
        a.mesh.handle_event(&crossing).await.unwrap();
        assert_eq!(a.mesh.link("b"), Some(LinkState::Negotiated));
        assert_eq!(a.connector.closed(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_mic_permission_denied() {
        let bus = BroadcastBus::default();
        let ctx = SessionContext {
            game_id: "g1".to_string(),
            game_code: "ABCDEF".to_string(),
            player_id: "a".to_string(),
            is_host: false,
        };
        let connector = FakeConnector {
            deny_mic: true,
            ..Default::default()
        };
        let mut mesh = VoiceMesh::new(&ctx, bus, connector);

        let result = mesh.set_mic(true).await;
        assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
        assert!(!mesh.mic_on());
    }

    #[tokio::test]
    async fn test_failed_link_reported_not_retried() {
        let bus = BroadcastBus::default();
        let mut nodes = meshed(&bus, &["a", "b"]).await;
        let offers_before = nodes[0]
            .connector
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("offer:"))
            .count();

        assert_eq!(
            nodes[0].mesh.connection_state_changed("b", ConnectionState::Connected),
            Some(LinkState::Connected)
        );
        assert_eq!(
            nodes[0].mesh.connection_state_changed("b", ConnectionState::Failed),
            Some(LinkState::Disconnected)
        );
        nodes[0].mesh.reconcile(&["a".to_string(), "b".to_string()]).await.unwrap();
        pump(&mut nodes).await;

        let offers_after = nodes[0]
            .connector
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("offer:"))
            .count();
        assert_eq!(offers_before, offers_after);
        assert_eq!(nodes[0].mesh.link("b"), Some(LinkState::Disconnected));
    }
}
