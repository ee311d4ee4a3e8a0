//! Frame header encoding/decoding
//!
//! The frame format uses a 4-byte header:
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Width of the big-endian length field
const LENGTH_BYTES: usize = 3;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing the type tag and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Type tag of the frame
    pub message_type: MessageType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(message_type: MessageType, payload_length: u32) -> Self {
        Self {
            message_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.message_type.as_u8());
        dst.put_uint(u64::from(self.payload_length), LENGTH_BYTES);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown message type).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Unknown tags leave the buffer untouched
        let tag = src[0];
        let message_type =
            MessageType::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

        src.advance(1);
        let payload_length = src.get_uint(LENGTH_BYTES) as u32;

        Ok(Some(Self::new(message_type, payload_length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new(MessageType::Stream, 0x01_0203);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(&buf[..], &[0x03, 0x01, 0x02, 0x03]);
        assert_eq!(FrameHeader::decode(&mut buf).unwrap().unwrap(), header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_max_payload_length() {
        let header = FrameHeader::new(MessageType::Extension, MAX_PAYLOAD_SIZE as u32);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length, MAX_PAYLOAD_SIZE as u32);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0x01u8, 0][..]);
        assert!(FrameHeader::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = BytesMut::from(&[0xFE, 0, 0, 10][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(0xFE))
        ));
        assert_eq!(buf.len(), HEADER_SIZE);
    }
}
