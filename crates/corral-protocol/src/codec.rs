//! Tokio codec for framed protocol messages

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::fields::FieldCursor;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::{ErrorBody, ErrorOutcome, MessageType};

/// A complete frame: type tag plus encoded field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Type tag
    pub kind: MessageType,
    /// Concatenated bincode fields
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from an already encoded payload
    pub fn new(kind: MessageType, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// A frame without fields
    pub fn empty(kind: MessageType) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// Build an `Error` frame
    pub fn error(code: ErrorOutcome, message: impl Into<String>) -> Result<Self, ProtocolError> {
        let mut frame = FrameBuilder::new(MessageType::Error);
        frame.push(&ErrorBody {
            code,
            message: message.into(),
        })?;
        Ok(frame.finish())
    }

    /// Cursor over this frame's fields
    pub fn fields(&self) -> FieldCursor {
        FieldCursor::new(self.payload.clone())
    }

    /// Decode the leading fields as `T` without consuming the frame
    pub fn peek<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.fields().peek()
    }

    /// Fail unless this frame has the given kind
    pub fn expect_kind(&self, expected: MessageType) -> Result<(), ProtocolError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedFrame {
                expected,
                actual: self.kind,
            })
        }
    }
}

/// Incrementally appends typed fields to a frame payload
#[derive(Debug)]
pub struct FrameBuilder {
    kind: MessageType,
    payload: BytesMut,
}

impl FrameBuilder {
    /// Start a frame of the given kind
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: BytesMut::new(),
        }
    }

    /// Append one field
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ProtocolError> {
        bincode::serialize_into((&mut self.payload).writer(), value)?;
        Ok(())
    }

    /// Append raw, already encoded bytes
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.payload.extend_from_slice(bytes);
    }

    /// Finish the frame
    pub fn finish(self) -> Frame {
        Frame::new(self.kind, self.payload.freeze())
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        tracing::trace!(kind = ?header.message_type, len = payload_len, "Decoded frame");
        Ok(Some(Frame::new(header.message_type, payload)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(frame.kind, payload_len as u32).encode(dst);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use crate::message::{Source, StreamKind, StreamLine};

    #[test]
    fn test_codec_stream_frame() {
        let mut codec = FrameCodec::new();

        let mut builder = FrameBuilder::new(MessageType::Stream);
        builder
            .push(&StreamLine {
                source: Source::Server,
                id: 3,
                kind: StreamKind::Output,
                line: "Done (2.1s)!".to_string(),
            })
            .unwrap();
        let frame = builder.finish();

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + frame.payload.len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);

        let line: StreamLine = decoded.peek().unwrap();
        assert_eq!(line.id, 3);
        assert_eq!(line.line, "Done (2.1s)!");
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();
        let frame = Frame::error(ErrorOutcome::NotExists, "no such server").unwrap();

        let mut full_buf = BytesMut::new();
        codec.encode(frame.clone(), &mut full_buf).unwrap();

        // Header only, then the rest
        let mut partial = full_buf.split_to(HEADER_SIZE + 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);

        let body: ErrorBody = decoded.peek().unwrap();
        assert_eq!(body.code, ErrorOutcome::NotExists);
        assert_eq!(body.message, "no such server");
    }

    #[test]
    fn test_codec_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::empty(MessageType::NoOp), &mut buf)
            .unwrap();
        codec
            .encode(Frame::empty(MessageType::EventListen), &mut buf)
            .unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().kind,
            MessageType::NoOp
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().kind,
            MessageType::EventListen
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new(
            MessageType::Extension,
            Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]),
        );
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(frame, &mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_expect_kind() {
        let frame = Frame::empty(MessageType::NoOp);
        assert!(frame.expect_kind(MessageType::NoOp).is_ok());
        assert!(matches!(
            frame.expect_kind(MessageType::ResourceList),
            Err(ProtocolError::UnexpectedFrame { .. })
        ));
    }
}
