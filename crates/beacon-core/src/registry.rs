//! Connection registry for Beacon.
//!
//! Maps each identity to its open sessions. Every session owns a bounded
//! queue; fan-out pushes into each queue without waiting, so a slow or dead
//! session never holds up its siblings.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_protocol::OutboundEnvelope;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default per-session delivery queue capacity.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 256;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a new process-unique session id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{:x}", self.0)
    }
}

/// Receiving half of a session's delivery queue.
pub type DeliveryReceiver = mpsc::Receiver<Arc<OutboundEnvelope>>;

/// Sending half of a session's delivery queue, as held by the registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<Arc<OutboundEnvelope>>,
}

impl SessionHandle {
    /// The session this handle delivers to.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Identities with at least one open session.
    pub identity_count: usize,
    /// Open sessions across all identities.
    pub session_count: usize,
}

/// Identity to open-session multiplexer.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Sessions grouped by canonical address.
    sessions: DashMap<String, HashMap<SessionId, SessionHandle>>,
    queue_capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create a registry with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_SESSION_QUEUE_CAPACITY)
    }

    /// Create a registry whose sessions buffer up to `capacity` deliveries.
    #[must_use]
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_capacity: capacity.max(1),
        }
    }

    /// Allocate a session id and its delivery queue.
    ///
    /// The session is not reachable until passed to [`join`](Self::join).
    #[must_use]
    pub fn open_session(&self) -> (SessionHandle, DeliveryReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (
            SessionHandle {
                id: SessionId::next(),
                tx,
            },
            rx,
        )
    }

    /// Add a session under `identity`.
    ///
    /// Returns `false` if the session was already joined.
    pub fn join(&self, identity: &str, session: SessionHandle) -> bool {
        let id = session.id;
        let mut group = self.sessions.entry(identity.to_string()).or_default();
        if group.contains_key(&id) {
            return false;
        }
        group.insert(id, session);
        debug!(
            identity = %identity,
            session = %id,
            sessions = group.len(),
            "Session joined"
        );
        true
    }

    /// Remove a session from `identity`.
    ///
    /// Returns `false` if the session was not joined.
    pub fn leave(&self, identity: &str, session: SessionId) -> bool {
        let removed = match self.sessions.get_mut(identity) {
            Some(mut group) => group.remove(&session).is_some(),
            None => false,
        };

        if removed {
            // Re-checked under the shard lock so a concurrent join survives.
            self.sessions.remove_if(identity, |_, group| group.is_empty());
            debug!(identity = %identity, session = %session, "Session left");
        }
        removed
    }

    /// Deliver `message` to every session of `identity`.
    ///
    /// Never waits on a receiver. A session whose queue is full or closed is
    /// skipped. Returns the number of sessions the message was queued for.
    pub fn send_to(&self, identity: &str, message: OutboundEnvelope) -> usize {
        let Some(group) = self.sessions.get(identity) else {
            trace!(identity = %identity, "No sessions for identity");
            return 0;
        };

        let message = Arc::new(message);
        let mut delivered = 0;
        for (id, handle) in group.iter() {
            match handle.tx.try_send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(identity = %identity, session = %id, "Delivery queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(identity = %identity, session = %id, "Session closing, dropping message");
                }
            }
        }

        trace!(identity = %identity, recipients = delivered, "Fan-out complete");
        delivered
    }

    /// Number of open sessions for `identity`.
    #[must_use]
    pub fn session_count(&self, identity: &str) -> usize {
        self.sessions.get(identity).map(|g| g.len()).unwrap_or(0)
    }

    /// Whether `identity` has any open session.
    #[must_use]
    pub fn is_connected(&self, identity: &str) -> bool {
        self.session_count(identity) > 0
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            identity_count: self.sessions.len(),
            session_count: self.sessions.iter().map(|g| g.len()).sum(),
        }
    }
}
