//! Extension module registry tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use corral_client::{ExtensionChannel, ExtensionHandler, ExtensionModule, ModuleCatalog};
use corral_core::{CorralError, DomainError, ExtensionError, ModuleId};
use corral_protocol::{ErrorOutcome, ExtensionHeader, ExtensionKind, MessageType, ModuleInfo};

use common::{eventually, extension_frame, field, open_session, MockServer};

struct CountingHandler {
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl ExtensionHandler for CountingHandler {
    async fn on_disconnect(&self, _module: ModuleId) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingModule {
    name: &'static str,
    connections: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl CountingModule {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            connections: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ExtensionModule for CountingModule {
    fn name(&self) -> &str {
        self.name
    }

    fn on_connection(&self, _channel: ExtensionChannel) -> Box<dyn ExtensionHandler> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingHandler {
            disconnects: Arc::clone(&self.disconnects),
        })
    }
}

fn module_list() -> Vec<ModuleInfo> {
    vec![
        ModuleInfo {
            id: 1,
            name: "alpha".to_string(),
        },
        ModuleInfo {
            id: 2,
            name: "beta".to_string(),
        },
        ModuleInfo {
            id: 3,
            name: "gamma".to_string(),
        },
    ]
}

async fn serve_module_list(server: &mut MockServer) {
    server.expect(MessageType::ModuleList).await;
    server.reply(MessageType::ModuleList, &module_list()).await;
}

#[tokio::test]
async fn test_disconnect_fires_once_for_that_module_only() {
    let alpha = CountingModule::new("alpha");
    let beta = CountingModule::new("beta");
    let (alpha_disconnects, beta_disconnects) =
        (Arc::clone(&alpha.disconnects), Arc::clone(&beta.disconnects));
    let beta_connections = Arc::clone(&beta.connections);

    let catalog = ModuleCatalog::new().with(alpha).with(beta);
    let (session, mut server) = open_session(catalog).await;
    let extensions = session.extensions();

    let (alpha_channel, _) = tokio::join!(
        extensions.connection(ModuleId(1)),
        serve_module_list(&mut server)
    );
    let alpha_channel = alpha_channel.unwrap();
    let beta_channel = extensions.connection(ModuleId(2)).await.unwrap();
    assert_eq!(beta_connections.load(Ordering::SeqCst), 1);

    server
        .send(extension_frame(2, ExtensionKind::Disconnect, &[]))
        .await;
    server
        .send(extension_frame(2, ExtensionKind::Disconnect, &[]))
        .await;

    eventually(|| beta_channel.is_closed()).await;
    server.expect_silence().await;
    assert_eq!(beta_disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(alpha_disconnects.load(Ordering::SeqCst), 0);
    assert!(matches!(
        extensions.connection(ModuleId(2)).await,
        Err(ExtensionError::Disconnected(ModuleId(2)))
    ));
    assert_eq!(extensions.connected().len(), 2);

    // Alpha keeps working in both directions.
    alpha_channel.send(b"ping").await.unwrap();
    let frame = server.expect(MessageType::Extension).await;
    let mut fields = frame.fields();
    assert_eq!(
        field::<ExtensionHeader>(&mut fields),
        ExtensionHeader {
            module: 1,
            kind: ExtensionKind::Operate
        }
    );
    assert_eq!(field::<Vec<u8>>(&mut fields), b"ping".to_vec());

    server
        .send(extension_frame(1, ExtensionKind::Operate, b"pong"))
        .await;
    assert_eq!(alpha_channel.recv().await, Some(b"pong".to_vec()));
}

#[tokio::test]
async fn test_frames_route_to_their_module() {
    let (session, mut server) = open_session(ModuleCatalog::new()).await;
    let extensions = session.extensions();

    let (alpha, _) = tokio::join!(
        extensions.connection_by_name("alpha"),
        serve_module_list(&mut server)
    );
    let alpha = alpha.unwrap();
    let gamma = extensions.connection(ModuleId(3)).await.unwrap();
    assert_eq!(gamma.module(), ModuleId(3));

    server
        .send(extension_frame(99, ExtensionKind::Operate, b"unknown"))
        .await;
    server
        .send(extension_frame(3, ExtensionKind::Operate, b"for gamma"))
        .await;
    server
        .send(extension_frame(1, ExtensionKind::Operate, b"for alpha"))
        .await;

    assert_eq!(gamma.recv().await, Some(b"for gamma".to_vec()));
    assert_eq!(alpha.recv().await, Some(b"for alpha".to_vec()));

    assert!(matches!(
        extensions.connection(ModuleId(99)).await,
        Err(ExtensionError::UnknownModule(ModuleId(99)))
    ));
    assert!(matches!(
        extensions.connection_by_name("delta").await,
        Err(ExtensionError::UnknownName(_))
    ));
    assert_eq!(extensions.modules().await.unwrap(), module_list());
}

#[tokio::test]
async fn test_setup_failure_reaches_every_caller() {
    let (session, mut server) = open_session(ModuleCatalog::new()).await;
    let extensions = session.extensions();

    let (first, second, _) = tokio::join!(
        extensions.connection(ModuleId(1)),
        extensions.connection(ModuleId(2)),
        async {
            server.expect(MessageType::ModuleList).await;
            server
                .fail(ErrorOutcome::AccessDenied, "modules are admin only")
                .await;
        }
    );

    let root = |result: Result<ExtensionChannel, ExtensionError>| match result {
        Err(ExtensionError::Setup(root)) => root,
        other => panic!("expected setup failure, got {:?}", other.map(|c| c.module())),
    };
    let first = root(first);
    let second = root(second);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(matches!(
        first.as_ref(),
        CorralError::Domain(DomainError::AccessDenied(message))
            if message == "modules are admin only"
    ));

    // Later callers get the same cause without asking the controller again.
    let third = root(extensions.connection(ModuleId(1)).await);
    assert!(Arc::ptr_eq(&first, &third));
    server.expect_silence().await;

    let error: CorralError = ExtensionError::Setup(third).into();
    assert_eq!(
        error.domain(),
        Some(&DomainError::AccessDenied(
            "modules are admin only".to_string()
        ))
    );
}

#[tokio::test]
async fn test_bindings_cleared_on_close() {
    let alpha = CountingModule::new("alpha");
    let alpha_disconnects = Arc::clone(&alpha.disconnects);
    let (session, mut server) = open_session(ModuleCatalog::new().with(alpha)).await;

    let (channel, _) = tokio::join!(
        session.extensions().connection(ModuleId(1)),
        serve_module_list(&mut server)
    );
    let channel = channel.unwrap();

    session.close().await;

    assert_eq!(channel.recv().await, None);
    eventually(|| session.extensions().connected().is_empty()).await;
    assert_eq!(alpha_disconnects.load(Ordering::SeqCst), 0);
}
