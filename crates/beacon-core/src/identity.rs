//! Durable peer identities.
//!
//! An identity is keyed by its canonical address (a phone-number-like
//! string) and also carries a numeric surrogate key assigned by the store.
//! Registration creates and updates identities; the relay only moves their
//! liveness fields.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Numeric internal identifier usable as an alternate target reference.
pub type SurrogateKey = u64;

/// Last-known network endpoint of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address as observed or reported.
    pub address: String,
    /// Port the peer listens on, if reported.
    #[serde(default)]
    pub port: Option<u16>,
}

impl Endpoint {
    /// Create an endpoint with no port.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
        }
    }

    /// Attach a port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Merge a freshly reported endpoint into this one.
    ///
    /// The address is always replaced; the port only when the update has one.
    pub fn merge(&mut self, update: Endpoint) {
        self.address = update.address;
        if update.port.is_some() {
            self.port = update.port;
        }
    }
}

/// A registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Surrogate key.
    pub id: SurrogateKey,
    /// Unique canonical address.
    pub canonical_address: String,
    /// Display name.
    pub display_name: String,
    /// Secondary contact address. Never exposed through the directory.
    pub email: Option<String>,
    /// Last-known endpoint.
    pub endpoint: Option<Endpoint>,
    /// Last liveness timestamp.
    pub last_seen: Millis,
    /// Whether the photo may be shown to other peers.
    pub photo_public: bool,
    /// Photo URL or inline data.
    pub photo: Option<String>,
}

/// Registration data for creating or updating an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    /// Canonical address.
    #[serde(alias = "phone")]
    pub canonical_address: String,
    /// Display name.
    #[serde(alias = "name")]
    pub display_name: String,
    /// Secondary contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Photo URL or inline data.
    #[serde(default)]
    pub photo: Option<String>,
    /// Whether the photo may be shown to other peers.
    #[serde(default, alias = "is_photo_public")]
    pub photo_public: bool,
}

impl NewIdentity {
    /// Registration data with only the required fields.
    #[must_use]
    pub fn new(canonical_address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            canonical_address: canonical_address.into(),
            display_name: display_name.into(),
            email: None,
            photo: None,
            photo_public: false,
        }
    }

    /// Attach a photo and its sharing flag.
    #[must_use]
    pub fn with_photo(mut self, photo: impl Into<String>, public: bool) -> Self {
        self.photo = Some(photo.into());
        self.photo_public = public;
        self
    }

    /// Attach an email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_merge_keeps_port() {
        let mut ep = Endpoint::new("192.168.1.10").with_port(5000);
        ep.merge(Endpoint::new("192.168.1.11"));
        assert_eq!(ep.address, "192.168.1.11");
        assert_eq!(ep.port, Some(5000));

        ep.merge(Endpoint::new("192.168.1.12").with_port(6000));
        assert_eq!(ep.port, Some(6000));
    }

    #[test]
    fn test_new_identity_accepts_registration_field_names() {
        let seed: NewIdentity = serde_json::from_str(
            r#"{"phone":"+1000","name":"Alice","is_photo_public":true,"photo":"http://a.jpg"}"#,
        )
        .unwrap();
        assert_eq!(seed.canonical_address, "+1000");
        assert_eq!(seed.display_name, "Alice");
        assert!(seed.photo_public);
    }
}
