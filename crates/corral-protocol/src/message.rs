//! Message kinds and typed fields for the Corral protocol
//!
//! Every frame carries a one-byte type tag followed by a list of typed
//! fields. Control requests travel on the main channel and are answered by
//! exactly one reply frame, either an `Error` envelope or a frame tagged with
//! the request's own kind (or `NoOp`) carrying the reply fields.
//!
//! # Message Flow
//!
//! 1. Client sends `Handshake`, server replies with its name
//! 2. Client authorizes with one of `AuthorizePassword`, `AuthorizeToken`,
//!    `AuthorizeAddress`
//! 3. Optionally `SessionElevate` / `SessionDowngrade`
//! 4. Domain requests (resources, access, executables, modules)
//! 5. `EventStream`, `Stream` and `Extension` frames arrive unsolicited once
//!    the corresponding feed has been enabled

use serde::{Deserialize, Serialize};

use crate::codec::{Frame, FrameBuilder};
use crate::error::ProtocolError;

/// Current protocol version string, sent in the handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Empty success reply / keepalive
    NoOp = 0x00,
    /// Error envelope
    Error = 0x01,
    /// Event bus notification
    EventStream = 0x02,
    /// Console line of a server or service process
    Stream = 0x03,
    /// Extension module traffic
    Extension = 0x04,
    /// Client hello
    Handshake = 0x10,
    /// Login/password authorization
    AuthorizePassword = 0x11,
    /// Token authorization
    AuthorizeToken = 0x12,
    /// Authorization by remote address
    AuthorizeAddress = 0x13,
    /// Enter the administrative state
    SessionElevate = 0x14,
    /// Leave the administrative state
    SessionDowngrade = 0x15,
    /// Fetch one resource
    ResourceGet = 0x20,
    /// List resources of a source
    ResourceList = 0x21,
    /// Create a resource
    ResourceCreate = 0x22,
    /// Remove a resource
    ResourceRemove = 0x23,
    /// Check a permission
    AccessCheck = 0x30,
    /// Grant a permission
    AccessGrant = 0x31,
    /// Revoke a permission
    AccessRevoke = 0x32,
    /// Start/stop/restart/kill an executable
    ExecManage = 0x40,
    /// Query an executable's status
    ExecStatus = 0x41,
    /// Write a line to an executable's console
    ExecCommand = 0x42,
    /// Start receiving one console stream
    ExecListen = 0x43,
    /// Stop receiving one console stream
    ExecMute = 0x44,
    /// Start receiving event bus notifications
    EventListen = 0x50,
    /// Stop receiving event bus notifications
    EventMute = 0x51,
    /// Enumerate extension modules known to the server
    ModuleList = 0x60,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::NoOp),
            0x01 => Some(Self::Error),
            0x02 => Some(Self::EventStream),
            0x03 => Some(Self::Stream),
            0x04 => Some(Self::Extension),
            0x10 => Some(Self::Handshake),
            0x11 => Some(Self::AuthorizePassword),
            0x12 => Some(Self::AuthorizeToken),
            0x13 => Some(Self::AuthorizeAddress),
            0x14 => Some(Self::SessionElevate),
            0x15 => Some(Self::SessionDowngrade),
            0x20 => Some(Self::ResourceGet),
            0x21 => Some(Self::ResourceList),
            0x22 => Some(Self::ResourceCreate),
            0x23 => Some(Self::ResourceRemove),
            0x30 => Some(Self::AccessCheck),
            0x31 => Some(Self::AccessGrant),
            0x32 => Some(Self::AccessRevoke),
            0x40 => Some(Self::ExecManage),
            0x41 => Some(Self::ExecStatus),
            0x42 => Some(Self::ExecCommand),
            0x43 => Some(Self::ExecListen),
            0x44 => Some(Self::ExecMute),
            0x50 => Some(Self::EventListen),
            0x51 => Some(Self::EventMute),
            0x60 => Some(Self::ModuleList),
            _ => None,
        }
    }
}

/// Result code carried by an `Error` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorOutcome {
    Success = 0,
    AuthFailure = 1,
    AccessDenied = 2,
    AlreadyInState = 3,
    NotExists = 4,
    AlreadyExists = 5,
    UnknownServerError = 6,
}

impl ErrorOutcome {
    /// Caller-facing category label
    pub fn label(&self) -> &'static str {
        match self {
            ErrorOutcome::Success => "success",
            ErrorOutcome::AuthFailure => "authorization failed",
            ErrorOutcome::AccessDenied => "access denied",
            ErrorOutcome::AlreadyInState => "already in state",
            ErrorOutcome::NotExists => "does not exist",
            ErrorOutcome::AlreadyExists => "already exists",
            ErrorOutcome::UnknownServerError => "server error",
        }
    }
}

/// Body of an `Error` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorOutcome,
    pub message: String,
}

/// Which half of the fleet a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Game server instance
    Server,
    /// Auxiliary service
    Service,
}

/// Console stream of an executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Input,
    Output,
    Errors,
}

/// Body of a `Stream` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLine {
    pub source: Source,
    pub id: u32,
    pub kind: StreamKind,
    pub line: String,
}

/// Body of an `EventStream` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    /// Registered event type name
    pub name: String,
    /// bincode-encoded event value
    pub payload: Vec<u8>,
}

/// Kind of an extension frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionKind {
    /// Module-private traffic
    Operate,
    /// The server dropped the module's channel
    Disconnect,
}

/// Leading fields of an `Extension` frame; the module payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionHeader {
    pub module: u32,
    pub kind: ExtensionKind,
}

/// Kind of client announcing itself during authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    /// Interactive operator
    User,
    /// Automated node agent
    Node,
}

/// Credentials presented to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Password {
        login: String,
        password: String,
        agent: AgentType,
    },
    Token {
        token: String,
        agent: AgentType,
    },
    Address {
        agent: AgentType,
    },
}

/// Lifecycle action applied to an executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecAction {
    Start,
    Stop,
    Restart,
    Kill,
}

/// Reported state of an executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A server or service known to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: u32,
    pub name: String,
    pub source: Source,
    pub status: ExecStatus,
}

/// An extension module known to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: u32,
    pub name: String,
}

/// Control requests sent on the main channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Handshake {
        version: String,
        client: String,
    },
    Authorize(Authorization),
    Elevate,
    Downgrade,
    ResourceGet {
        source: Source,
        id: u32,
    },
    ResourceList {
        source: Source,
    },
    ResourceCreate {
        source: Source,
        name: String,
        config: Vec<(String, String)>,
    },
    ResourceRemove {
        source: Source,
        id: u32,
    },
    AccessCheck {
        subject: String,
        permission: String,
    },
    AccessGrant {
        subject: String,
        permission: String,
    },
    AccessRevoke {
        subject: String,
        permission: String,
    },
    ExecManage {
        source: Source,
        id: u32,
        action: ExecAction,
    },
    ExecStatus {
        source: Source,
        id: u32,
    },
    ExecCommand {
        source: Source,
        id: u32,
        line: String,
    },
    ExecListen {
        source: Source,
        id: u32,
        kind: StreamKind,
    },
    ExecMute {
        source: Source,
        id: u32,
        kind: StreamKind,
    },
    EventListen,
    EventMute,
    ModuleList,
}

impl Request {
    /// Get the message type for this request
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Handshake { .. } => MessageType::Handshake,
            Request::Authorize(Authorization::Password { .. }) => MessageType::AuthorizePassword,
            Request::Authorize(Authorization::Token { .. }) => MessageType::AuthorizeToken,
            Request::Authorize(Authorization::Address { .. }) => MessageType::AuthorizeAddress,
            Request::Elevate => MessageType::SessionElevate,
            Request::Downgrade => MessageType::SessionDowngrade,
            Request::ResourceGet { .. } => MessageType::ResourceGet,
            Request::ResourceList { .. } => MessageType::ResourceList,
            Request::ResourceCreate { .. } => MessageType::ResourceCreate,
            Request::ResourceRemove { .. } => MessageType::ResourceRemove,
            Request::AccessCheck { .. } => MessageType::AccessCheck,
            Request::AccessGrant { .. } => MessageType::AccessGrant,
            Request::AccessRevoke { .. } => MessageType::AccessRevoke,
            Request::ExecManage { .. } => MessageType::ExecManage,
            Request::ExecStatus { .. } => MessageType::ExecStatus,
            Request::ExecCommand { .. } => MessageType::ExecCommand,
            Request::ExecListen { .. } => MessageType::ExecListen,
            Request::ExecMute { .. } => MessageType::ExecMute,
            Request::EventListen => MessageType::EventListen,
            Request::EventMute => MessageType::EventMute,
            Request::ModuleList => MessageType::ModuleList,
        }
    }

    /// Encode the request's fields into a frame
    pub fn into_frame(self) -> Result<Frame, ProtocolError> {
        let mut frame = FrameBuilder::new(self.message_type());
        match self {
            Request::Handshake { version, client } => {
                frame.push(&version)?;
                frame.push(&client)?;
            }
            Request::Authorize(Authorization::Password {
                login,
                password,
                agent,
            }) => {
                frame.push(&login)?;
                frame.push(&password)?;
                frame.push(&agent)?;
            }
            Request::Authorize(Authorization::Token { token, agent }) => {
                frame.push(&token)?;
                frame.push(&agent)?;
            }
            Request::Authorize(Authorization::Address { agent }) => {
                frame.push(&agent)?;
            }
            Request::Elevate
            | Request::Downgrade
            | Request::EventListen
            | Request::EventMute
            | Request::ModuleList => {}
            Request::ResourceGet { source, id }
            | Request::ResourceRemove { source, id }
            | Request::ExecStatus { source, id } => {
                frame.push(&source)?;
                frame.push(&id)?;
            }
            Request::ResourceList { source } => {
                frame.push(&source)?;
            }
            Request::ResourceCreate {
                source,
                name,
                config,
            } => {
                frame.push(&source)?;
                frame.push(&name)?;
                frame.push(&config)?;
            }
            Request::AccessCheck {
                subject,
                permission,
            }
            | Request::AccessGrant {
                subject,
                permission,
            }
            | Request::AccessRevoke {
                subject,
                permission,
            } => {
                frame.push(&subject)?;
                frame.push(&permission)?;
            }
            Request::ExecManage { source, id, action } => {
                frame.push(&source)?;
                frame.push(&id)?;
                frame.push(&action)?;
            }
            Request::ExecCommand { source, id, line } => {
                frame.push(&source)?;
                frame.push(&id)?;
                frame.push(&line)?;
            }
            Request::ExecListen { source, id, kind } | Request::ExecMute { source, id, kind } => {
                frame.push(&source)?;
                frame.push(&id)?;
                frame.push(&kind)?;
            }
        }
        Ok(frame.finish())
    }
}
