//! Control-frame payloads, bincode-encoded on stream 0.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::frame::{Frame, FrameKind};

/// Payload of a control frame, tied to the kind that carries it.
pub trait ControlPayload: Serialize + DeserializeOwned + Sized {
    /// Frame kind this payload travels under.
    const KIND: FrameKind;

    fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(payload)?)
    }

    /// Wrap the encoded payload in a control frame.
    fn to_frame(&self) -> Result<Frame, WireError> {
        Ok(Frame::control(Self::KIND, self.encode()?))
    }
}

/// Credentials presented by the client right after connecting.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    /// Identifier for this client instance, fresh per daemon start.
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl ControlPayload for AuthRequest {
    const KIND: FrameKind = FrameKind::Auth;
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Relay verdict on an [`AuthRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthAck {
    pub accepted: bool,
    /// Set when `accepted` is false.
    pub reason: Option<String>,
}

impl ControlPayload for AuthAck {
    const KIND: FrameKind = FrameKind::AuthAck;
}

/// Keepalive probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ping {
    pub seq: u64,
}

impl ControlPayload for Ping {
    const KIND: FrameKind = FrameKind::Ping;
}

/// Keepalive answer, echoing the probe's sequence number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pong {
    pub seq: u64,
}

impl ControlPayload for Pong {
    const KIND: FrameKind = FrameKind::Pong;
}

/// Relay announcement that it is closing the connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownNotice {
    pub reason: String,
}

impl ControlPayload for ShutdownNotice {
    const KIND: FrameKind = FrameKind::Shutdown;
}
