//! Frame layout: an 8-byte header followed by the payload.
//!
//! ```text
//! +-----------------+------+------------------+
//! | stream id (u32) | kind | payload len (u24)|
//! | big-endian      | (u8) | big-endian       |
//! +-----------------+------+------------------+
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a frame can carry (24-bit length field).
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Identifier of one logical stream multiplexed over the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream 0 is reserved for control frames.
    pub const CONTROL: Self = Self(0);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_control(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame kinds on the wire.
///
/// Control kinds travel on stream 0 with bincode-encoded payloads. The
/// stream lifecycle kinds (`Open`, `Data`, `Close`) travel on per-stream
/// ids, with `Data` carrying raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client credentials, first frame after connecting.
    Auth = 0x01,
    /// Relay verdict on the credentials.
    AuthAck = 0x02,
    /// Keepalive probe.
    Ping = 0x03,
    /// Keepalive answer.
    Pong = 0x04,
    /// Open a local connection for this stream.
    Open = 0x05,
    /// Raw bytes for an open stream.
    Data = 0x06,
    /// One side of the stream ended; tear it down.
    Close = 0x07,
    /// The relay is going away (restart, deploy).
    Shutdown = 0x08,
}

impl FrameKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Auth),
            0x02 => Some(Self::AuthAck),
            0x03 => Some(Self::Ping),
            0x04 => Some(Self::Pong),
            0x05 => Some(Self::Open),
            0x06 => Some(Self::Data),
            0x07 => Some(Self::Close),
            0x08 => Some(Self::Shutdown),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Auth | Self::AuthAck | Self::Ping | Self::Pong | Self::Shutdown
        )
    }

    /// Control kinds belong on stream 0, stream kinds everywhere else.
    pub fn allowed_on(self, stream: StreamId) -> bool {
        self.is_control() == stream.is_control()
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream: StreamId,
    pub kind: FrameKind,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Append the encoded header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.stream.as_u32());
        dst.put_u8(self.kind.as_u8());
        dst.put_u8((self.payload_len >> 16) as u8);
        dst.put_u16((self.payload_len & 0xFFFF) as u16);
    }

    /// Decode a header from the front of `src`, consuming it.
    ///
    /// Returns `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are
    /// buffered. The kind byte is peeked before anything is consumed, so a
    /// bad frame leaves the buffer intact for diagnostics.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, WireError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let kind_byte = src[4];
        let Some(kind) = FrameKind::from_u8(kind_byte) else {
            return Err(WireError::UnknownKind(kind_byte));
        };

        let stream = StreamId(src.get_u32());
        src.advance(1); // kind byte, already peeked
        let payload_len = ((src.get_u8() as usize) << 16) | (src.get_u16() as usize);

        if !kind.allowed_on(stream) {
            return Err(WireError::StreamMismatch { kind, stream });
        }
        Ok(Some(Self { stream, kind, payload_len }))
    }
}

/// One frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamId,
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    /// Control frame on stream 0.
    pub fn control(kind: FrameKind, payload: Bytes) -> Self {
        Self { stream: StreamId::CONTROL, kind, payload }
    }

    /// Raw data for an open stream.
    pub fn data(stream: StreamId, payload: Bytes) -> Self {
        Self { stream, kind: FrameKind::Data, payload }
    }

    /// Request or acknowledge a new stream.
    pub fn open(stream: StreamId) -> Self {
        Self { stream, kind: FrameKind::Open, payload: Bytes::new() }
    }

    /// Tear down a stream.
    pub fn close(stream: StreamId) -> Self {
        Self { stream, kind: FrameKind::Close, payload: Bytes::new() }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader { stream: self.stream, kind: self.kind, payload_len: self.payload.len() }
    }
}
