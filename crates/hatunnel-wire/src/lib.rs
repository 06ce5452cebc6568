//! hatunnel Wire Protocol
//!
//! One TCP connection to the relay carries many logical streams. Every
//! frame is an 8-byte header (stream id, frame kind, 24-bit payload
//! length) followed by the payload. Control frames travel on stream 0
//! with bincode-encoded payloads; `Data` frames carry raw bytes for
//! their stream.

pub mod codec;
pub mod control;
pub mod error;
pub mod frame;

pub use codec::FrameCodec;
pub use control::{AuthAck, AuthRequest, ControlPayload, Ping, Pong, ShutdownNotice};
pub use error::WireError;
pub use frame::{Frame, FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE, StreamId};
