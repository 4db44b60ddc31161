//! Envelope types for the Beacon signaling protocol.
//!
//! Clients send an [`InboundEnvelope`] naming a target peer; the relay
//! forwards an [`OutboundEnvelope`] to every session of that peer. The
//! `payload` is an opaque document and is never inspected by the relay.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// A signaling message as sent by a client.
///
/// Every field is optional on the wire so that a client omitting `target`
/// is distinguishable from one sending garbage. Use [`into_request`] to
/// obtain a routable [`SignalRequest`].
///
/// [`into_request`]: InboundEnvelope::into_request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Message kind, e.g. `offer`, `answer`, `ice-candidate`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Reference to the target peer (canonical address or surrogate key).
    #[serde(default, deserialize_with = "target_reference")]
    pub target: Option<String>,

    /// Opaque payload, forwarded unmodified.
    #[serde(default)]
    pub payload: Value,
}

impl InboundEnvelope {
    /// Create an envelope addressed to `target`.
    #[must_use]
    pub fn new(kind: impl Into<String>, target: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: Some(kind.into()),
            target: Some(target.into()),
            payload,
        }
    }

    /// Validate the envelope into a routable request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingTarget`] when `target` is absent or empty.
    pub fn into_request(self) -> Result<SignalRequest, ProtocolError> {
        match self.target {
            Some(target) if !target.is_empty() => Ok(SignalRequest {
                kind: self.kind,
                target,
                payload: self.payload,
            }),
            _ => Err(ProtocolError::MissingTarget),
        }
    }
}

/// Accept the target as a string or a bare JSON integer.
fn target_reference<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reference {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Reference>::deserialize(deserializer)?.map(|r| match r {
        Reference::Text(s) => s,
        Reference::Number(n) => n.to_string(),
    }))
}

/// A validated inbound message with a non-empty target.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRequest {
    /// Message kind, echoed to the recipient.
    pub kind: Option<String>,
    /// Target reference as supplied by the client.
    pub target: String,
    /// Opaque payload.
    pub payload: Value,
}

/// Advisory same-network hint attached to every forwarded message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    /// Whether sender and recipient appear to share a network.
    pub same_network: bool,

    /// Address the relay observed for the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_ip: Option<String>,

    /// Last known address of the recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,
}

/// A signaling message as delivered to a recipient session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Canonical address of the sending peer.
    pub sender: String,

    /// Message kind, echoed from the inbound envelope.
    #[serde(rename = "type")]
    pub kind: Option<String>,

    /// Opaque payload, echoed from the inbound envelope.
    pub payload: Value,

    /// Locality annotation.
    #[serde(flatten)]
    pub locality: Locality,
}

impl OutboundEnvelope {
    /// Build the forwarded form of `request` on behalf of `sender`.
    #[must_use]
    pub fn forward(sender: impl Into<String>, request: SignalRequest, locality: Locality) -> Self {
        Self {
            sender: sender.into(),
            kind: request.kind,
            payload: request.payload,
            locality,
        }
    }
}
