//! Sequential access to the typed fields of a frame payload
//!
//! A payload is a plain concatenation of bincode-encoded values. Readers pull
//! them in order with [`FieldCursor::read`]; whatever is left unread can be
//! discarded with [`FieldCursor::drain`] so the next consumer starts clean.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

/// Read position over a frame payload
#[derive(Debug, Clone)]
pub struct FieldCursor {
    payload: Bytes,
    position: usize,
}

impl FieldCursor {
    /// Start reading at the beginning of `payload`
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            position: 0,
        }
    }

    /// Decode the next field and advance past it
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let mut rest = &self.payload[self.position..];
        let before = rest.len();
        let value = bincode::deserialize_from(&mut rest)?;
        self.position += before - rest.len();
        Ok(value)
    }

    /// Decode the next field without advancing
    pub fn peek<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let mut rest = &self.payload[self.position..];
        Ok(bincode::deserialize_from(&mut rest)?)
    }

    /// Number of payload bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.position
    }

    /// Discard every unread byte, returning how many were skipped
    pub fn drain(&mut self) -> usize {
        let skipped = self.remaining();
        self.position = self.payload.len();
        skipped
    }
}
