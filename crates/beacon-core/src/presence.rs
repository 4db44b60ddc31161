//! Presence tracking for Beacon.
//!
//! Presence is a single liveness timestamp per identity. A peer is online
//! while `now - last_seen < online_window`. Disconnecting backdates the
//! timestamp by `stale_offset`, which is strictly larger than the window,
//! so the peer leaves the directory immediately without a separate flag.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Millis;
use crate::identity::{Endpoint, Identity};
use crate::store::StoreError;

/// Default online window (2 minutes).
pub const DEFAULT_ONLINE_WINDOW: Duration = Duration::from_secs(120);

/// Default disconnect backdating offset (10 minutes).
pub const DEFAULT_STALE_OFFSET: Duration = Duration::from_secs(600);

/// Invalid liveness policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The stale offset would leave a disconnected peer inside the window.
    #[error("stale offset {offset:?} must be greater than online window {window:?}")]
    OffsetTooSmall {
        /// Configured online window.
        window: Duration,
        /// Configured stale offset.
        offset: Duration,
    },
}

/// Liveness window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    online_window: Duration,
    stale_offset: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            online_window: DEFAULT_ONLINE_WINDOW,
            stale_offset: DEFAULT_STALE_OFFSET,
        }
    }
}

impl LivenessPolicy {
    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Returns an error unless `stale_offset > online_window`.
    pub fn new(online_window: Duration, stale_offset: Duration) -> Result<Self, PolicyError> {
        if stale_offset <= online_window {
            return Err(PolicyError::OffsetTooSmall {
                window: online_window,
                offset: stale_offset,
            });
        }
        Ok(Self {
            online_window,
            stale_offset,
        })
    }

    /// The online window.
    #[must_use]
    pub fn online_window(&self) -> Duration {
        self.online_window
    }

    /// The disconnect backdating offset.
    #[must_use]
    pub fn stale_offset(&self) -> Duration {
        self.stale_offset
    }

    /// Timestamp written by `mark_stale` at time `now`.
    #[must_use]
    pub fn stale_timestamp(&self, now: Millis) -> Millis {
        now.saturating_sub(self.stale_offset.as_millis() as u64)
    }
}

/// Whether a peer last seen at `last_seen` is online at `now`.
#[must_use]
pub fn is_online(last_seen: Millis, now: Millis, window: Duration) -> bool {
    u128::from(now.saturating_sub(last_seen)) < window.as_millis()
}

/// Durable liveness state per identity.
///
/// Identities are addressed by canonical address. Operations on an identity
/// that is not registered are no-ops and report `false`.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record liveness now, optionally merging a new endpoint.
    ///
    /// Never moves the timestamp backward.
    async fn touch(&self, identity: &str, endpoint: Option<Endpoint>) -> Result<bool, StoreError>;

    /// Backdate liveness by the store's stale offset.
    ///
    /// Never moves the timestamp forward.
    async fn mark_stale(&self, identity: &str) -> Result<bool, StoreError>;

    /// Identities seen within `window`, excluding `exclude` if given.
    async fn list_online(
        &self,
        window: Duration,
        exclude: Option<&str>,
    ) -> Result<Vec<Identity>, StoreError>;

    /// Last-known endpoint of an identity.
    async fn get_endpoint(&self, identity: &str) -> Result<Option<Endpoint>, StoreError>;
}
