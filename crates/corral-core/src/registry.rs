//! Event and module type registry
//!
//! Event payloads and extension modules are described by name. A
//! [`TypeRegistry`] maps each name to a [`Descriptor`] holding its kind, the
//! names of the types it extends, and the decoder used to materialise its
//! payload. Descriptors are added by explicit registration calls when a
//! session starts; there is no discovery at runtime.
//!
//! Parent links let a subscriber ask for "every event that is a
//! `server.lifecycle`" and receive `server.started`, `server.stopped`, and so
//! on without listing them.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;

use corral_protocol::ProtocolError;
use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::error::RegistryError;

/// What a descriptor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Event bus payload
    Event,
    /// Extension module
    Module,
}

/// Decodes a payload into the registered Rust type
pub type PayloadDecoder = fn(&[u8]) -> Result<Box<dyn Any + Send>, ProtocolError>;

/// Registry entry for one named type
#[derive(Clone)]
pub struct Descriptor {
    pub name: String,
    pub kind: DescriptorKind,
    pub parents: Vec<String>,
    decoder: Option<PayloadDecoder>,
}

impl Descriptor {
    /// Describe a type with no payload decoder (abstract parents, modules)
    pub fn new(name: impl Into<String>, kind: DescriptorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parents: Vec::new(),
            decoder: None,
        }
    }

    /// Add a parent link
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Attach a payload decoder
    pub fn with_decoder(mut self, decoder: PayloadDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Whether payloads of this type can be decoded
    pub fn is_concrete(&self) -> bool {
        self.decoder.is_some()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parents", &self.parents)
            .field("concrete", &self.is_concrete())
            .finish()
    }
}

/// A concrete event carried on the event bus
pub trait EventType: DeserializeOwned + Send + 'static {
    /// Registered name
    const NAME: &'static str;
    /// Names of the types this event extends
    const PARENTS: &'static [&'static str] = &[];
}

fn decode_as<E: EventType>(payload: &[u8]) -> Result<Box<dyn Any + Send>, ProtocolError> {
    let value: E = bincode::deserialize(payload)?;
    Ok(Box::new(value))
}

/// Name → descriptor table owned by one session
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: DashMap<String, Descriptor>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a descriptor.
    ///
    /// Parents must be registered first so the ancestry graph stays acyclic.
    pub fn register(&self, descriptor: Descriptor) -> Result<(), RegistryError> {
        for parent in &descriptor.parents {
            if !self.entries.contains_key(parent) {
                return Err(RegistryError::UnknownParent {
                    name: descriptor.name.clone(),
                    parent: parent.clone(),
                });
            }
        }

        match self.entries.entry(descriptor.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::Duplicate(descriptor.name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::trace!(name = %descriptor.name, kind = ?descriptor.kind, "Registered type");
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Register a concrete event type with its decoder
    pub fn register_event<E: EventType>(&self) -> Result<(), RegistryError> {
        let mut descriptor =
            Descriptor::new(E::NAME, DescriptorKind::Event).with_decoder(decode_as::<E>);
        for parent in E::PARENTS {
            descriptor = descriptor.with_parent(*parent);
        }
        self.register(descriptor)
    }

    /// Look up a descriptor by name
    pub fn get(&self, name: &str) -> Option<Descriptor> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Whether `name` is `ancestor` or transitively extends it
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let mut queue = VecDeque::from([name.to_string()]);
        let mut seen = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(entry) = self.entries.get(&current) {
                queue.extend(entry.parents.iter().cloned());
            }
        }
        false
    }

    /// Decode a payload registered under `name` as `E`
    pub fn decode<E: EventType>(&self, name: &str, payload: &[u8]) -> Result<E, crate::CorralError> {
        let decoder = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?
            .decoder
            .ok_or_else(|| RegistryError::Mismatch {
                name: name.to_string(),
                requested: E::NAME.to_string(),
            })?;

        let value = decoder(payload)?;
        value.downcast::<E>().map(|boxed| *boxed).map_err(|_| {
            RegistryError::Mismatch {
                name: name.to_string(),
                requested: E::NAME.to_string(),
            }
            .into()
        })
    }

    /// Number of registered descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
