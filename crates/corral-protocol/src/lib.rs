//! corral-protocol: Wire protocol for the Corral management plane
//!
//! This crate defines the frame format exchanged between a management client
//! and the fleet controller over a single ordered connection, along with the
//! typed fields carried by each frame kind.

pub mod codec;
pub mod error;
pub mod fields;
pub mod frame;
pub mod message;

pub use codec::{Frame, FrameBuilder, FrameCodec};
pub use error::ProtocolError;
pub use fields::FieldCursor;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    AgentType, Authorization, ErrorBody, ErrorOutcome, EventBody, ExecAction, ExecStatus,
    ExtensionHeader, ExtensionKind, MessageType, ModuleInfo, Request, ResourceInfo, Source,
    StreamKind, StreamLine, PROTOCOL_VERSION,
};
