//! Signaling router for Beacon.
//!
//! The router ties resolution, presence and the connection registry
//! together. Each transport connection drives one [`Session`] through
//! `Connecting -> Open -> Closed`.
//!
//! Nothing in here ever produces a reply to the sender. Every inbound frame
//! yields an [`Outcome`] for logging and metrics only.

use std::sync::Arc;

use beacon_protocol::{
    EncodedFrame, FrameCodec, InboundEnvelope, OutboundEnvelope, ProtocolError, SignalRequest,
    WireFormat,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::identity::Endpoint;
use crate::locality::annotate;
use crate::presence::PresenceStore;
use crate::registry::{ConnectionRegistry, DeliveryReceiver, SessionHandle, SessionId};
use crate::resolver::IdentityResolver;
use crate::store::StoreError;

/// Default maximum inbound frame size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Why an inbound message was not delivered.
#[derive(Debug, Error)]
pub enum DropReason {
    /// The frame could not be parsed or had no target.
    #[error("Malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    /// The target reference matched no identity.
    #[error("Unresolved target: {0}")]
    UnresolvedTarget(String),

    /// The target has no open session.
    #[error("No open session for {0}")]
    DeliveryMiss(String),

    /// The session is not open.
    #[error("Session is not open")]
    SessionClosed,

    /// Target resolution failed in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DropReason {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::Malformed(_) => "malformed",
            DropReason::UnresolvedTarget(_) => "unresolved",
            DropReason::DeliveryMiss(_) => "delivery_miss",
            DropReason::SessionClosed => "closed",
            DropReason::Store(_) => "store",
        }
    }
}

/// Result of handling one inbound frame.
#[derive(Debug)]
pub enum Outcome {
    /// Queued for this many recipient sessions.
    Delivered {
        /// Number of sessions the message was queued for.
        recipients: usize,
    },
    /// Silently discarded.
    Dropped(DropReason),
}

impl Outcome {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Delivered { .. } => "delivered",
            Outcome::Dropped(reason) => reason.label(),
        }
    }

    /// Whether the message reached at least one session.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered { .. })
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet reachable.
    Connecting,
    /// Joined and routing.
    Open,
    /// Terminal.
    Closed,
}

/// The signaling router.
pub struct SignalingRouter {
    registry: Arc<ConnectionRegistry>,
    resolver: IdentityResolver,
    presence: Arc<dyn PresenceStore>,
    codec: FrameCodec,
}

impl SignalingRouter {
    /// Create a router.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        resolver: IdentityResolver,
        presence: Arc<dyn PresenceStore>,
        config: RouterConfig,
    ) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry,
            resolver,
            presence,
            codec: FrameCodec::new(config.max_message_size),
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The presence store.
    #[must_use]
    pub fn presence(&self) -> &Arc<dyn PresenceStore> {
        &self.presence
    }

    /// Start a session for a connection claiming `identity`.
    ///
    /// The claim is trusted as supplied. `observed_addr` is the client
    /// address after proxy-header extraction. Outbound frames are encoded
    /// with `format`.
    #[must_use]
    pub fn connect(
        self: &Arc<Self>,
        identity: impl Into<String>,
        observed_addr: Option<String>,
        format: WireFormat,
    ) -> (Session, DeliveryReceiver) {
        let (handle, rx) = self.registry.open_session();
        let session = Session {
            router: Arc::clone(self),
            handle,
            identity: identity.into(),
            observed_addr,
            format,
            state: SessionState::Connecting,
        };
        debug!(
            identity = %session.identity,
            session = %session.id(),
            addr = ?session.observed_addr,
            "Session connecting"
        );
        (session, rx)
    }
}

/// One transport connection's protocol state.
pub struct Session {
    router: Arc<SignalingRouter>,
    handle: SessionHandle,
    identity: String,
    observed_addr: Option<String>,
    format: WireFormat,
    state: SessionState,
}

impl Session {
    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Claimed identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Client address observed at connect.
    #[must_use]
    pub fn observed_addr(&self) -> Option<&str> {
        self.observed_addr.as_deref()
    }

    /// Outbound wire format.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Join the registry, record liveness and transition to `Open`.
    ///
    /// A presence failure is logged; the session still opens. Returns
    /// `false` unless the session was `Connecting`.
    pub async fn open(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }

        self.router.registry.join(&self.identity, self.handle.clone());

        let endpoint = self.observed_addr.clone().map(Endpoint::new);
        if let Err(e) = self.router.presence.touch(&self.identity, endpoint).await {
            warn!(identity = %self.identity, error = %e, "Failed to record presence on connect");
        }

        self.state = SessionState::Open;
        debug!(identity = %self.identity, session = %self.id(), "Session open");
        true
    }

    /// Handle a text (JSON) frame.
    pub async fn receive_text(&self, text: &str) -> Outcome {
        if self.state != SessionState::Open {
            return Outcome::Dropped(DropReason::SessionClosed);
        }
        let decoded = self.router.codec.decode_text(text);
        self.dispatch(decoded).await
    }

    /// Handle a binary (MessagePack) frame.
    pub async fn receive_binary(&self, data: &[u8]) -> Outcome {
        if self.state != SessionState::Open {
            return Outcome::Dropped(DropReason::SessionClosed);
        }
        let decoded = self.router.codec.decode_binary(data);
        self.dispatch(decoded).await
    }

    /// Handle an already-decoded envelope.
    pub async fn receive(&self, envelope: InboundEnvelope) -> Outcome {
        if self.state != SessionState::Open {
            return Outcome::Dropped(DropReason::SessionClosed);
        }
        self.dispatch(Ok(envelope)).await
    }

    async fn dispatch(&self, decoded: Result<InboundEnvelope, ProtocolError>) -> Outcome {
        let outcome = match decoded.and_then(InboundEnvelope::into_request) {
            Ok(request) => self.route(request).await,
            Err(e) => Outcome::Dropped(DropReason::Malformed(e)),
        };

        if let Outcome::Dropped(reason) = &outcome {
            match reason {
                DropReason::DeliveryMiss(_) => {
                    debug!(identity = %self.identity, reason = %reason, "Message dropped");
                }
                _ => warn!(identity = %self.identity, reason = %reason, "Message dropped"),
            }
        }
        outcome
    }

    async fn route(&self, request: SignalRequest) -> Outcome {
        let resolution = match self.router.resolver.resolve(&request.target).await {
            Ok(resolution) => resolution,
            Err(e) => return Outcome::Dropped(DropReason::Store(e)),
        };
        let Some(target) = resolution.canonical_address().map(str::to_string) else {
            return Outcome::Dropped(DropReason::UnresolvedTarget(request.target));
        };

        // Locality is advisory; a lookup failure degrades to "not local".
        let target_endpoint = match self.router.presence.get_endpoint(&target).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to fetch target endpoint");
                None
            }
        };
        let locality = annotate(self.observed_addr.as_deref(), target_endpoint.as_ref());

        trace!(
            identity = %self.identity,
            target = %target,
            kind = ?request.kind,
            same_network = locality.same_network,
            "Routing message"
        );

        let envelope = OutboundEnvelope::forward(self.identity.clone(), request, locality);
        match self.router.registry.send_to(&target, envelope) {
            0 => Outcome::Dropped(DropReason::DeliveryMiss(target)),
            recipients => Outcome::Delivered { recipients },
        }
    }

    /// Encode a delivery for this session's transport.
    ///
    /// Outbound frames are not held to the inbound size limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded.
    pub fn encode(&self, envelope: &OutboundEnvelope) -> Result<EncodedFrame, ProtocolError> {
        beacon_protocol::encode(envelope, self.format)
    }

    /// Leave the registry, backdate liveness and transition to `Closed`.
    ///
    /// Idempotent. Returns `false` if already closed.
    pub async fn close(&mut self) -> bool {
        let was_open = match self.state {
            SessionState::Closed => return false,
            SessionState::Open => true,
            SessionState::Connecting => false,
        };
        self.state = SessionState::Closed;
        self.router.registry.leave(&self.identity, self.id());

        if was_open {
            if let Err(e) = self.router.presence.mark_stale(&self.identity).await {
                warn!(identity = %self.identity, error = %e, "Failed to mark presence stale");
            }
        }

        debug!(identity = %self.identity, session = %self.id(), "Session closed");
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            // Presence is left to expire through the window.
            self.router.registry.leave(&self.identity, self.id());
            debug!(identity = %self.identity, session = %self.id(), "Session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::NewIdentity;
    use crate::presence::{LivenessPolicy, DEFAULT_ONLINE_WINDOW};
    use crate::store::{IdentityStore, MemoryStore};
    use serde_json::json;

    const START: u64 = 1_700_000_000_000;

    async fn setup() -> (Arc<SignalingRouter>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(LivenessPolicy::default(), clock));
        for (addr, name) in [("+1000", "Alice"), ("+2000", "Bob")] {
            store.upsert(NewIdentity::new(addr, name)).await.unwrap();
        }
        let router = Arc::new(SignalingRouter::new(
            Arc::new(ConnectionRegistry::new()),
            IdentityResolver::new(store.clone()),
            store.clone(),
            RouterConfig::default(),
        ));
        (router, store)
    }

    async fn open(
        router: &Arc<SignalingRouter>,
        identity: &str,
        addr: &str,
    ) -> (Session, DeliveryReceiver) {
        let (mut session, rx) = router.connect(identity, Some(addr.to_string()), WireFormat::Json);
        assert!(session.open().await);
        (session, rx)
    }

    #[tokio::test]
    async fn test_offer_reaches_same_network_peer() {
        let (router, _store) = setup().await;
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, mut bob_rx) = open(&router, "+2000", "10.0.0.5").await;

        let outcome = alice
            .receive_text(r#"{"type":"offer","target":"+2000","payload":{"sdp":"v=0"}}"#)
            .await;
        assert!(matches!(outcome, Outcome::Delivered { recipients: 1 }));

        let delivered = bob_rx.recv().await.unwrap();
        assert_eq!(delivered.sender, "+1000");
        assert_eq!(delivered.kind.as_deref(), Some("offer"));
        assert_eq!(delivered.payload, json!({"sdp": "v=0"}));
        assert!(delivered.locality.same_network);
        assert_eq!(delivered.locality.target_ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_surrogate_key_target() {
        let (router, store) = setup().await;
        let bob = store.find_by_canonical_address("+2000").await.unwrap().unwrap();
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, mut bob_rx) = open(&router, "+2000", "192.168.1.7").await;

        let outcome = alice
            .receive(InboundEnvelope::new("answer", bob.id.to_string(), json!(null)))
            .await;
        assert!(outcome.is_delivered());

        let delivered = bob_rx.recv().await.unwrap();
        assert_eq!(delivered.sender, "+1000");
        assert!(!delivered.locality.same_network);
    }

    #[tokio::test]
    async fn test_unknown_target_is_dropped_silently() {
        let (router, _store) = setup().await;
        let (alice, mut alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, mut bob_rx) = open(&router, "+2000", "10.0.0.5").await;

        let outcome = alice
            .receive_text(r#"{"type":"offer","target":"9999","payload":{}}"#)
            .await;
        assert!(matches!(
            outcome,
            Outcome::Dropped(DropReason::UnresolvedTarget(ref t)) if t == "9999"
        ));
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_messages_keep_session_open() {
        let (router, _store) = setup().await;
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, mut bob_rx) = open(&router, "+2000", "10.0.0.5").await;

        for bad in ["not json", r#"{"type":"offer"}"#, r#"{"target":""}"#, "[]"] {
            let outcome = alice.receive_text(bad).await;
            assert_eq!(outcome.label(), "malformed", "{bad}");
        }
        assert_eq!(alice.receive_binary(&[0xc1]).await.label(), "malformed");
        assert_eq!(alice.state(), SessionState::Open);

        let outcome = alice
            .receive_text(r#"{"type":"offer","target":"+2000","payload":1}"#)
            .await;
        assert!(outcome.is_delivered());
        assert!(bob_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_positional_envelope_is_malformed() {
        let (router, _store) = setup().await;
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, mut bob_rx) = open(&router, "+2000", "10.0.0.5").await;

        let outcome = alice.receive_text(r#"["offer","+2000",{"sdp":"v=0"}]"#).await;
        assert!(matches!(outcome, Outcome::Dropped(DropReason::Malformed(_))));
        assert_eq!(outcome.label(), "malformed");
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(alice.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_offline_target_is_delivery_miss() {
        let (router, _store) = setup().await;
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;

        let outcome = alice
            .receive_text(r#"{"type":"offer","target":"+2000","payload":{}}"#)
            .await;
        assert_eq!(outcome.label(), "delivery_miss");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_malformed() {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(LivenessPolicy::default(), clock));
        let router = Arc::new(SignalingRouter::new(
            Arc::new(ConnectionRegistry::new()),
            IdentityResolver::new(store.clone()),
            store,
            RouterConfig {
                max_message_size: 32,
            },
        ));
        let (alice, _rx) = open(&router, "+1000", "10.0.0.5").await;

        let big = format!(r#"{{"target":"+2000","payload":"{}"}}"#, "x".repeat(64));
        assert!(matches!(
            alice.receive_text(&big).await,
            Outcome::Dropped(DropReason::Malformed(ProtocolError::FrameTooLarge(_)))
        ));
    }

    #[tokio::test]
    async fn test_close_marks_stale_and_leaves() {
        let (router, store) = setup().await;
        let (mut alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_bob, _bob_rx) = open(&router, "+2000", "10.0.0.5").await;

        let online = store.list_online(DEFAULT_ONLINE_WINDOW, None).await.unwrap();
        assert_eq!(online.len(), 2);

        assert!(alice.close().await);
        assert!(!alice.close().await);
        assert_eq!(alice.state(), SessionState::Closed);
        assert!(!router.registry().is_connected("+1000"));

        let online = store.list_online(DEFAULT_ONLINE_WINDOW, None).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].canonical_address, "+2000");

        // The endpoint learned at connect survives the disconnect.
        assert_eq!(
            store.get_endpoint("+1000").await.unwrap(),
            Some(Endpoint::new("10.0.0.5"))
        );

        let outcome = alice
            .receive_text(r#"{"type":"offer","target":"+2000","payload":{}}"#)
            .await;
        assert!(matches!(outcome, Outcome::Dropped(DropReason::SessionClosed)));
    }

    #[tokio::test]
    async fn test_connecting_session_is_unreachable() {
        let (router, _store) = setup().await;
        let (session, _rx) = router.connect("+2000", None, WireFormat::Json);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!router.registry().is_connected("+2000"));
        assert!(matches!(
            session.receive_text("{}").await,
            Outcome::Dropped(DropReason::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_drop_leaves_registry() {
        let (router, _store) = setup().await;
        let (bob, _rx) = open(&router, "+2000", "10.0.0.5").await;
        assert!(router.registry().is_connected("+2000"));
        drop(bob);
        assert!(!router.registry().is_connected("+2000"));
    }

    #[tokio::test]
    async fn test_multi_device_delivery() {
        let (router, _store) = setup().await;
        let (alice, _alice_rx) = open(&router, "+1000", "10.0.0.5").await;
        let (_phone, mut phone_rx) = open(&router, "+2000", "10.0.0.5").await;
        let (_laptop, mut laptop_rx) = open(&router, "+2000", "10.0.0.6").await;

        let outcome = alice
            .receive_text(r#"{"type":"ice-candidate","target":"+2000","payload":{"c":1}}"#)
            .await;
        assert!(matches!(outcome, Outcome::Delivered { recipients: 2 }));
        assert!(phone_rx.recv().await.is_some());
        assert!(laptop_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_encode_uses_session_format() {
        let (router, _store) = setup().await;
        let (json_session, _rx1) = router.connect("+1000", None, WireFormat::Json);
        let (pack_session, _rx2) = router.connect("+1000", None, WireFormat::MessagePack);
        let envelope = OutboundEnvelope {
            sender: "+2000".into(),
            kind: Some("answer".into()),
            payload: json!({}),
            locality: Default::default(),
        };

        assert!(matches!(json_session.encode(&envelope).unwrap(), EncodedFrame::Text(_)));
        assert!(matches!(pack_session.encode(&envelope).unwrap(), EncodedFrame::Binary(_)));
    }
}
