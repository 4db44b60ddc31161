//! Privacy-masked peer directory.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, SurrogateKey};
use crate::presence::PresenceStore;
use crate::store::StoreError;

/// A discoverable peer as shown to other peers.
///
/// Carries no canonical address or other contact detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    /// Surrogate key, usable as a signaling target.
    pub id: SurrogateKey,
    /// Display name.
    pub name: String,
    /// Last-known address.
    pub ip: Option<String>,
    /// Last-known port.
    pub port: Option<u16>,
    /// Photo, present only when the peer shares it.
    pub photo_url: Option<String>,
}

impl From<Identity> for PeerView {
    fn from(identity: Identity) -> Self {
        let (ip, port) = match identity.endpoint {
            Some(endpoint) => (Some(endpoint.address), endpoint.port),
            None => (None, None),
        };
        Self {
            id: identity.id,
            name: identity.display_name,
            ip,
            port,
            photo_url: identity.photo.filter(|_| identity.photo_public),
        }
    }
}

/// Query-time projection over a presence store.
#[derive(Clone)]
pub struct PeerDirectory {
    presence: Arc<dyn PresenceStore>,
}

impl PeerDirectory {
    /// Create a directory over `presence`.
    #[must_use]
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        Self { presence }
    }

    /// Peers online within `window`, excluding `exclude`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_peers(
        &self,
        window: Duration,
        exclude: Option<&str>,
    ) -> Result<Vec<PeerView>, StoreError> {
        let online = self.presence.list_online(window, exclude).await?;
        Ok(online.into_iter().map(PeerView::from).collect())
    }
}
