//! Core domain types

use std::fmt;

use corral_protocol::{Source, StreamKind};
use serde::{Deserialize, Serialize};

/// Identifier the server assigns to an extension module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Create a new module ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module-{}", self.0)
    }
}

impl From<u32> for ModuleId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifies one console stream of one executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub source: Source,
    pub id: u32,
    pub kind: StreamKind,
}

impl StreamKey {
    pub fn new(source: Source, id: u32, kind: StreamKind) -> Self {
        Self { source, id, kind }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}/{:?}", self.source, self.id, self.kind)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No live connection (never opened, or closed)
    Disconnected = 0,
    /// Handshake completed, not yet authorized
    HandshakeSent = 1,
    /// Authorized with regular privileges
    Authorized = 2,
    /// Authorized and elevated to the administrative state
    AdminElevated = 3,
}

impl SessionState {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disconnected),
            1 => Some(Self::HandshakeSent),
            2 => Some(Self::Authorized),
            3 => Some(Self::AdminElevated),
            _ => None,
        }
    }

    /// Whether the session has passed authorization
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized | Self::AdminElevated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::HandshakeSent => write!(f, "handshake-sent"),
            SessionState::Authorized => write!(f, "authorized"),
            SessionState::AdminElevated => write!(f, "admin"),
        }
    }
}
