//! corral-core: Core abstractions and configuration for Corral
//!
//! This crate provides the error taxonomy, client configuration, the event
//! and module type registry, and small shared domain types used by the
//! client runtime.

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use error::{ConnectionError, CorralError, DomainError, ExtensionError};
pub use registry::{Descriptor, DescriptorKind, EventType, TypeRegistry};
pub use types::{ModuleId, SessionState, StreamKey};
