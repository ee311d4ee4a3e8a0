//! Servers and services known to the controller

use corral_core::CorralError;
use corral_protocol::{Request, ResourceInfo, Source};

use crate::gate::Gate;

/// Resource management requests
#[derive(Clone, Copy)]
pub struct Resources<'a> {
    gate: &'a Gate,
}

impl<'a> Resources<'a> {
    pub(crate) fn new(gate: &'a Gate) -> Self {
        Self { gate }
    }

    /// Fetch one resource
    pub async fn get(&self, source: Source, id: u32) -> Result<ResourceInfo, CorralError> {
        self.gate
            .exchange(Request::ResourceGet { source, id }, |reply| reply.read())
            .await
    }

    /// List every resource of a kind
    pub async fn list(&self, source: Source) -> Result<Vec<ResourceInfo>, CorralError> {
        self.gate
            .exchange(Request::ResourceList { source }, |reply| reply.read())
            .await
    }

    /// Create a resource from key/value settings
    pub async fn create(
        &self,
        source: Source,
        name: impl Into<String>,
        config: Vec<(String, String)>,
    ) -> Result<ResourceInfo, CorralError> {
        let request = Request::ResourceCreate {
            source,
            name: name.into(),
            config,
        };
        self.gate.exchange(request, |reply| reply.read()).await
    }

    /// Remove a resource
    pub async fn remove(&self, source: Source, id: u32) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::ResourceRemove { source, id })
            .await
    }
}
