//! Protocol error types

use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A reply or notification arrived with a kind the reader did not expect
    #[error("Unexpected frame: expected {expected:?}, got {actual:?}")]
    UnexpectedFrame {
        expected: MessageType,
        actual: MessageType,
    },

    /// Field (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
