//! Extension modules and their per-module channels
//!
//! Plugin modules installed on the controller exchange private traffic with
//! their client-side counterparts over `Extension` frames. Each frame starts
//! with an [`ExtensionHeader`] naming the module and whether the frame is
//! module traffic or a disconnect notice.
//!
//! The [`ExtensionRegistry`] is wired lazily on first use: it asks the
//! controller which modules exist, splits the extension channel into one
//! slot per module plus a shared disconnect slot, and binds every module to
//! its local [`ExtensionModule`] implementation from the session's
//! [`ModuleCatalog`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use corral_core::error::RegistryError;
use corral_core::{
    ConnectionError, CorralError, Descriptor, DescriptorKind, EventType, ExtensionError, ModuleId,
    TypeRegistry,
};
use corral_protocol::{
    ExtensionHeader, ExtensionKind, Frame, FrameBuilder, MessageType, ModuleInfo, Request,
};

use crate::gate::Gate;
use crate::splitter::VirtualChannel;

/// Client-side state of one connected module
#[async_trait]
pub trait ExtensionHandler: Send + Sync + 'static {
    /// The server dropped this module's channel. Called at most once.
    async fn on_disconnect(&self, module: ModuleId) {
        tracing::debug!(module = %module, "Extension module disconnected");
    }
}

/// Handler bound to modules with no local implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl ExtensionHandler for NoopHandler {}

/// What a module sees while it initializes
pub struct ModuleContext<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> ModuleContext<'a> {
    /// The session's type registry
    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    /// Register an event type the module publishes
    pub fn register_event<E: EventType>(&self) -> Result<(), RegistryError> {
        self.registry.register_event::<E>()
    }
}

/// A locally installed extension module
pub trait ExtensionModule: Send + Sync + 'static {
    /// Name the controller knows this module by
    fn name(&self) -> &str;

    /// One-time setup when the session starts
    fn initialize(&self, _context: &ModuleContext<'_>) -> Result<(), CorralError> {
        Ok(())
    }

    /// Bind the module to its channel on the current connection
    fn on_connection(&self, channel: ExtensionChannel) -> Box<dyn ExtensionHandler>;
}

/// The set of extension modules a session knows how to drive
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: Vec<Arc<dyn ExtensionModule>>,
}

impl ModuleCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module
    pub fn register(&mut self, module: impl ExtensionModule) {
        self.modules.push(Arc::new(module));
    }

    /// Builder form of [`ModuleCatalog::register`]
    pub fn with(mut self, module: impl ExtensionModule) -> Self {
        self.register(module);
        self
    }

    /// Look up a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtensionModule>> {
        self.modules
            .iter()
            .find(|module| module.name() == name)
            .cloned()
    }

    /// Names of all modules
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    /// Register every module's descriptor and run its initializer
    pub fn initialize_all(&self, registry: &TypeRegistry) -> Result<(), CorralError> {
        let context = ModuleContext { registry };
        for module in &self.modules {
            registry.register(Descriptor::new(module.name(), DescriptorKind::Module))?;
            module.initialize(&context)?;
            tracing::debug!(module = module.name(), "Extension module initialized");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One module's view of the extension channel
///
/// Outgoing payloads are stamped with the module id; incoming payloads have
/// the header already stripped.
#[derive(Clone, Debug)]
pub struct ExtensionChannel {
    module: ModuleId,
    channel: Arc<VirtualChannel>,
}

impl ExtensionChannel {
    fn new(module: ModuleId, channel: VirtualChannel) -> Self {
        Self {
            module,
            channel: Arc::new(channel),
        }
    }

    /// The module this channel belongs to
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Send a module payload to the controller
    pub async fn send(&self, payload: &[u8]) -> Result<(), CorralError> {
        let mut frame = FrameBuilder::new(MessageType::Extension);
        frame.push(&ExtensionHeader {
            module: self.module.0,
            kind: ExtensionKind::Operate,
        })?;
        frame.push(payload)?;
        self.channel.send(frame.finish()).await
    }

    /// Next payload for this module; None once the channel is closed
    pub async fn recv(&self) -> Option<Vec<u8>> {
        loop {
            let frame = self.channel.recv().await?;
            let mut fields = frame.fields();
            let payload = fields
                .read::<ExtensionHeader>()
                .and_then(|_| fields.read::<Vec<u8>>());
            match payload {
                Ok(payload) => return Some(payload),
                Err(e) => tracing::warn!(
                    module = %self.module,
                    "Dropping malformed extension frame: {}",
                    e
                ),
            }
        }
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    async fn close(&self) {
        self.channel.close().await;
    }
}

/// Maps extension frames to their module's slot
struct ModuleRouter {
    slots: HashMap<u32, usize>,
    disconnect_slot: usize,
}

impl ModuleRouter {
    fn new(modules: &[ModuleInfo]) -> Self {
        Self {
            slots: modules
                .iter()
                .enumerate()
                .map(|(slot, module)| (module.id, slot))
                .collect(),
            disconnect_slot: modules.len(),
        }
    }

    fn classify(&self, frame: &Frame) -> Option<usize> {
        let header: ExtensionHeader = frame.peek().ok()?;
        match header.kind {
            ExtensionKind::Disconnect => Some(self.disconnect_slot),
            ExtensionKind::Operate => self.slots.get(&header.module).copied(),
        }
    }
}

struct Binding {
    channel: ExtensionChannel,
    handler: Box<dyn ExtensionHandler>,
}

struct Wiring {
    modules: Vec<ModuleInfo>,
}

/// Lazily wired table of extension module channels
pub struct ExtensionRegistry {
    gate: Arc<Gate>,
    source: Mutex<Option<VirtualChannel>>,
    catalog: ModuleCatalog,
    bindings: Arc<DashMap<ModuleId, Binding>>,
    wiring: OnceCell<Result<Arc<Wiring>, Arc<CorralError>>>,
}

impl ExtensionRegistry {
    /// Registry over the connection's extension channel
    pub fn new(gate: Arc<Gate>, extensions: VirtualChannel, catalog: ModuleCatalog) -> Self {
        Self {
            gate,
            source: Mutex::new(Some(extensions)),
            catalog,
            bindings: Arc::new(DashMap::new()),
            wiring: OnceCell::new(),
        }
    }

    /// Channel of the given module, wiring the registry on first use
    pub async fn connection(&self, module: ModuleId) -> Result<ExtensionChannel, ExtensionError> {
        let wiring = self.wiring().await?;

        if let Some(binding) = self.bindings.get(&module) {
            return Ok(binding.channel.clone());
        }
        if wiring.modules.iter().any(|info| info.id == module.0) {
            Err(ExtensionError::Disconnected(module))
        } else {
            Err(ExtensionError::UnknownModule(module))
        }
    }

    /// Channel of the module registered under `name`
    pub async fn connection_by_name(&self, name: &str) -> Result<ExtensionChannel, ExtensionError> {
        let wiring = self.wiring().await?;
        let module = wiring
            .modules
            .iter()
            .find(|info| info.name == name)
            .map(|info| ModuleId(info.id))
            .ok_or_else(|| ExtensionError::UnknownName(name.to_string()))?;
        self.connection(module).await
    }

    /// Modules the controller reported at setup
    pub async fn modules(&self) -> Result<Vec<ModuleInfo>, ExtensionError> {
        Ok(self.wiring().await?.modules.clone())
    }

    /// Modules whose channel is still bound
    pub fn connected(&self) -> Vec<ModuleId> {
        self.bindings.iter().map(|entry| *entry.key()).collect()
    }

    async fn wiring(&self) -> Result<Arc<Wiring>, ExtensionError> {
        self.wiring
            .get_or_init(|| async { self.wire().await.map(Arc::new).map_err(Arc::new) })
            .await
            .clone()
            .map_err(ExtensionError::Setup)
    }

    async fn wire(&self) -> Result<Wiring, CorralError> {
        let listed = self
            .gate
            .exchange(Request::ModuleList, |reply| reply.read::<Vec<ModuleInfo>>())
            .await;
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ConnectionError::Closed)?;

        let modules = match listed {
            Ok(modules) => modules,
            Err(e) => {
                tracing::warn!("Extension module enumeration failed: {}", e);
                source.close().await;
                return Err(e);
            }
        };

        let router = ModuleRouter::new(&modules);
        let mut channels = source.split(modules.len() + 1, move |frame| router.classify(frame));
        let disconnects = channels.pop().ok_or(ConnectionError::Closed)?;

        for (info, channel) in modules.iter().zip(channels) {
            let module = ModuleId(info.id);
            let channel = ExtensionChannel::new(module, channel);
            let handler = match self.catalog.get(&info.name) {
                Some(local) => local.on_connection(channel.clone()),
                None => {
                    tracing::debug!(
                        module = %module,
                        name = %info.name,
                        "No local implementation, using no-op handler"
                    );
                    Box::new(NoopHandler)
                }
            };
            self.bindings.insert(module, Binding { channel, handler });
        }

        tokio::spawn(watch_disconnects(disconnects, Arc::clone(&self.bindings)));
        tracing::debug!(modules = modules.len(), "Extension registry wired");

        Ok(Wiring { modules })
    }
}

async fn watch_disconnects(disconnects: VirtualChannel, bindings: Arc<DashMap<ModuleId, Binding>>) {
    while let Some(frame) = disconnects.recv().await {
        let header: ExtensionHeader = match frame.peek() {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Dropping malformed disconnect notice: {}", e);
                continue;
            }
        };

        let module = ModuleId(header.module);
        match bindings.remove(&module) {
            Some((module, binding)) => {
                binding.handler.on_disconnect(module).await;
                binding.channel.close().await;
            }
            None => tracing::trace!(module = %module, "Disconnect for unbound module"),
        }
    }

    tracing::debug!(remaining = bindings.len(), "Extension channel closed, clearing bindings");
    bindings.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn extension_frame(module: u32, kind: ExtensionKind) -> Frame {
        let mut frame = FrameBuilder::new(MessageType::Extension);
        frame.push(&ExtensionHeader { module, kind }).unwrap();
        frame.push(&Vec::<u8>::new()).unwrap();
        frame.finish()
    }

    fn modules() -> Vec<ModuleInfo> {
        vec![
            ModuleInfo {
                id: 7,
                name: "alpha".to_string(),
            },
            ModuleInfo {
                id: 9,
                name: "beta".to_string(),
            },
        ]
    }

    #[test]
    fn test_router_classification() {
        let router = ModuleRouter::new(&modules());

        assert_eq!(router.classify(&extension_frame(7, ExtensionKind::Operate)), Some(0));
        assert_eq!(router.classify(&extension_frame(9, ExtensionKind::Operate)), Some(1));
        assert_eq!(router.classify(&extension_frame(3, ExtensionKind::Operate)), None);
        assert_eq!(router.classify(&extension_frame(9, ExtensionKind::Disconnect)), Some(2));
        assert_eq!(router.classify(&extension_frame(3, ExtensionKind::Disconnect)), Some(2));
        assert_eq!(router.classify(&Frame::empty(MessageType::Extension)), None);
    }

    struct Recorder {
        name: &'static str,
        initialized: Arc<AtomicUsize>,
    }

    impl ExtensionModule for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&self, _context: &ModuleContext<'_>) -> Result<(), CorralError> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_connection(&self, _channel: ExtensionChannel) -> Box<dyn ExtensionHandler> {
            Box::new(NoopHandler)
        }
    }

    #[test]
    fn test_catalog_registers_module_descriptors() {
        let initialized = Arc::new(AtomicUsize::new(0));
        let catalog = ModuleCatalog::new()
            .with(Recorder {
                name: "alpha",
                initialized: Arc::clone(&initialized),
            })
            .with(Recorder {
                name: "beta",
                initialized: Arc::clone(&initialized),
            });
        let registry = TypeRegistry::new();

        catalog.initialize_all(&registry).unwrap();

        assert_eq!(initialized.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get("alpha").unwrap().kind, DescriptorKind::Module);
        assert!(catalog.get("beta").is_some());
        assert!(catalog.get("gamma").is_none());
        assert_eq!(catalog.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_catalog_rejects_duplicate_names() {
        let initialized = Arc::new(AtomicUsize::new(0));
        let catalog = ModuleCatalog::new()
            .with(Recorder {
                name: "alpha",
                initialized: Arc::clone(&initialized),
            })
            .with(Recorder {
                name: "alpha",
                initialized,
            });

        let result = catalog.initialize_all(&TypeRegistry::new());
        assert!(matches!(
            result,
            Err(CorralError::Registry(RegistryError::Duplicate(_)))
        ));
    }
}
