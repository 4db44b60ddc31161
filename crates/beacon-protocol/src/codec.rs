//! Codec for encoding and decoding Beacon envelopes.
//!
//! Text WebSocket frames carry JSON; binary frames carry MessagePack with
//! named fields. Each session picks the encoding of what it receives with a
//! [`WireFormat`].

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelopes::{InboundEnvelope, OutboundEnvelope};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Envelope has no usable `target`.
    #[error("Envelope has no target")]
    MissingTarget,

    /// Unknown wire format name.
    #[error("Unknown wire format: {0}")]
    UnknownFormat(String),
}

/// Encoding used for frames sent to a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// UTF-8 JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    MessagePack,
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "msgpack" | "messagepack" => Ok(WireFormat::MessagePack),
            other => Err(ProtocolError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => write!(f, "json"),
            WireFormat::MessagePack => write!(f, "msgpack"),
        }
    }
}

/// An encoded frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    /// Send as a text frame.
    Text(String),
    /// Send as a binary frame.
    Binary(Bytes),
}

impl EncodedFrame {
    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EncodedFrame::Text(s) => s.len(),
            EncodedFrame::Binary(b) => b.len(),
        }
    }

    /// Whether the encoded frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode an envelope from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a JSON envelope.
pub fn decode_text(text: &str) -> Result<InboundEnvelope, ProtocolError> {
    FrameCodec::default().decode_text(text)
}

/// Decode an envelope from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a MessagePack envelope.
pub fn decode_binary(data: &[u8]) -> Result<InboundEnvelope, ProtocolError> {
    FrameCodec::default().decode_binary(data)
}

/// Encode an outbound envelope in the given format.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &OutboundEnvelope, format: WireFormat) -> Result<EncodedFrame, ProtocolError> {
    FrameCodec::default().encode(envelope, format)
}

/// Envelopes arrive as keyed objects only; positional arrays are rejected.
fn from_object(object: Map<String, Value>) -> Result<InboundEnvelope, ProtocolError> {
    Ok(serde_json::from_value(Value::Object(object))?)
}

/// Codec with a configurable frame size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec rejecting frames larger than `max_frame_size` bytes.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// The frame size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        Ok(())
    }

    /// Decode an envelope from a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid.
    pub fn decode_text(&self, text: &str) -> Result<InboundEnvelope, ProtocolError> {
        self.check_size(text.len())?;
        let object: Map<String, Value> = serde_json::from_str(text)?;
        from_object(object)
    }

    /// Decode an envelope from a MessagePack binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid.
    pub fn decode_binary(&self, data: &[u8]) -> Result<InboundEnvelope, ProtocolError> {
        self.check_size(data.len())?;
        let object: Map<String, Value> = rmp_serde::from_slice(data)?;
        from_object(object)
    }

    /// Encode an outbound envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the result is too large.
    pub fn encode(
        &self,
        envelope: &OutboundEnvelope,
        format: WireFormat,
    ) -> Result<EncodedFrame, ProtocolError> {
        let frame = match format {
            WireFormat::Json => EncodedFrame::Text(serde_json::to_string(envelope)?),
            WireFormat::MessagePack => {
                EncodedFrame::Binary(Bytes::from(rmp_serde::to_vec_named(envelope)?))
            }
        };
        self.check_size(frame.len())?;
        Ok(frame)
    }
}
