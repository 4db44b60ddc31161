//! # beacon-protocol
//!
//! Wire envelopes for the Beacon signaling relay.
//!
//! Clients send an inbound envelope naming a target peer; the relay forwards
//! an outbound envelope carrying the sender, the echoed kind and payload, and
//! a same-network hint.
//!
//! ## Envelopes
//!
//! - `InboundEnvelope` - `{type, target, payload}` from a client
//! - `OutboundEnvelope` - `{sender, type, payload, same_network}` to a client
//! - `Locality` - advisory locality annotation
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, WireFormat};
//!
//! let env = codec::decode_text(r#"{"type":"offer","target":"+2000","payload":{}}"#).unwrap();
//! let request = env.into_request().unwrap();
//! assert_eq!(request.target, "+2000");
//! assert_eq!("msgpack".parse::<WireFormat>().unwrap(), WireFormat::MessagePack);
//! ```

pub mod codec;
pub mod envelopes;

pub use codec::{
    decode_binary, decode_text, encode, EncodedFrame, FrameCodec, ProtocolError, WireFormat,
};
pub use envelopes::{InboundEnvelope, Locality, OutboundEnvelope, SignalRequest};
