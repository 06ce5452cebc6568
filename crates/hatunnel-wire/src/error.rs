//! Wire protocol errors.

use crate::frame::{FrameKind, StreamId};

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("Payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{kind:?} frame not allowed on stream {stream}")]
    StreamMismatch { kind: FrameKind, stream: StreamId },

    #[error("Malformed control payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
