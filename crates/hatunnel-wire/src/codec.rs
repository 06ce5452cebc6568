//! Tokio codec turning a byte stream into [`Frame`]s.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::frame::{Frame, FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Two-phase frame codec: decode the header first, then hold it until the
/// full payload is buffered.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => match FrameHeader::decode(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        if src.len() < header.payload_len {
            src.reserve(header.payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(header.payload_len).freeze();
        Ok(Some(Frame { stream: header.stream, kind: header.kind, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                size: frame.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if !frame.kind.allowed_on(frame.stream) {
            return Err(WireError::StreamMismatch { kind: frame.kind, stream: frame.stream });
        }

        dst.reserve(HEADER_SIZE + frame.payload.len());
        frame.header().encode(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
