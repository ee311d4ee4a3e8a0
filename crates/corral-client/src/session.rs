//! Session façade
//!
//! A [`Session`] owns one controller connection and everything derived from
//! it: the request gate, the event bus, console stream routing and the
//! extension registry. It walks the connection through its lifecycle:
//!
//! ```text
//! Disconnected -> HandshakeSent -> Authorized <-> AdminElevated
//! ```
//!
//! Any state may go straight back to `Disconnected` through [`Session::close`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use corral_core::config::ClientConfig;
use corral_core::{ConnectionError, CorralError, DomainError, SessionState, TypeRegistry};
use corral_protocol::{Authorization, Request, PROTOCOL_VERSION};

use crate::connection::Connection;
use crate::extension::{ExtensionRegistry, ModuleCatalog};
use crate::gate::Gate;
use crate::transport::connect_tcp;
use crate::views::events::EventBus;
use crate::views::executables::StreamRouter;
use crate::views::{Access, Events, Executables, Resources};

struct SessionInner {
    config: ClientConfig,
    connection: Connection,
    gate: Arc<Gate>,
    state: AtomicU8,
    /// Serializes state transitions
    transition: Mutex<()>,
    server_name: String,
    user: RwLock<Option<String>>,
    registry: Arc<TypeRegistry>,
    events: EventBus,
    streams: Arc<StreamRouter>,
    extensions: ExtensionRegistry,
}

/// Handle to one controller session; clones share the connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect to the configured controller and perform the handshake
    pub async fn connect(
        config: ClientConfig,
        catalog: ModuleCatalog,
    ) -> Result<Self, CorralError> {
        let stream = connect_tcp(&config.address, config.connect_timeout).await?;
        tracing::info!("Connected to controller at {}", config.address);
        Self::from_io(stream, config, catalog).await
    }

    /// Run a session over an already open byte stream
    pub async fn from_io<T>(
        io: T,
        config: ClientConfig,
        catalog: ModuleCatalog,
    ) -> Result<Self, CorralError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let registry = Arc::new(TypeRegistry::new());
        catalog.initialize_all(&registry)?;

        let (connection, channels) = Connection::open(io);
        let gate = Arc::new(Gate::new(channels.main));

        let handshake = Request::Handshake {
            version: PROTOCOL_VERSION.to_string(),
            client: config.client_name.clone(),
        };
        let server_name = match gate.exchange(handshake, |reply| reply.read::<String>()).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Handshake failed: {}", e);
                connection.close().await;
                return Err(e);
            }
        };
        tracing::info!(server = %server_name, client = %config.client_name, "Handshake completed");

        let closed = connection.token();
        let events = EventBus::spawn(
            Arc::clone(&gate),
            Arc::clone(&registry),
            channels.events,
            config.event_buffer,
            closed.clone(),
        );
        let streams = StreamRouter::spawn(
            Arc::clone(&gate),
            channels.streams,
            config.stream_buffer,
            closed,
        );
        let extensions = ExtensionRegistry::new(Arc::clone(&gate), channels.extensions, catalog);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                connection,
                gate,
                state: AtomicU8::new(SessionState::HandshakeSent.as_u8()),
                transition: Mutex::new(()),
                server_name,
                user: RwLock::new(None),
                registry,
                events,
                streams,
                extensions,
            }),
        })
    }

    /// Authenticate the session.
    ///
    /// On failure the state is left unchanged; the caller is expected to
    /// close the session. An elevated session stays elevated.
    pub async fn authorize(&self, authorization: Authorization) -> Result<(), CorralError> {
        let _transition = self.inner.transition.lock().await;
        self.ensure_open()?;

        let user: String = self
            .inner
            .gate
            .exchange(Request::Authorize(authorization), |reply| reply.read())
            .await?;

        tracing::info!(user = %user, "Session authorized");
        self.set_user(user);
        // Re-authorizing keeps an elevation; only a downgrade drops it.
        if self.state() != SessionState::AdminElevated {
            self.set_state(SessionState::Authorized);
        }
        Ok(())
    }

    /// Authenticate with the configured credentials, or by address if none
    pub async fn authorize_configured(&self) -> Result<(), CorralError> {
        let agent = self.inner.config.agent_type;
        let authorization = match &self.inner.config.credentials {
            Some(credentials) => credentials.to_authorization(agent),
            None => Authorization::Address { agent },
        };
        self.authorize(authorization).await
    }

    /// Elevate to administrative privileges
    pub async fn enter_admin_state(&self) -> Result<(), CorralError> {
        let _transition = self.inner.transition.lock().await;
        self.ensure_open()?;
        if self.state() == SessionState::AdminElevated {
            return Err(
                DomainError::AlreadyInState("session is already elevated".to_string()).into(),
            );
        }

        self.inner.gate.exchange_unit(Request::Elevate).await?;
        tracing::info!("Session elevated");
        self.set_state(SessionState::AdminElevated);
        Ok(())
    }

    /// Drop administrative privileges
    pub async fn leave_admin_state(&self) -> Result<(), CorralError> {
        let _transition = self.inner.transition.lock().await;
        self.ensure_open()?;
        if self.state() != SessionState::AdminElevated {
            return Err(DomainError::AlreadyInState("session is not elevated".to_string()).into());
        }

        self.inner.gate.exchange_unit(Request::Downgrade).await?;
        tracing::info!("Session downgraded");
        self.set_state(SessionState::Authorized);
        Ok(())
    }

    /// Close the connection. Valid in any state; repeated calls do nothing.
    pub async fn close(&self) {
        let previous = self
            .inner
            .state
            .swap(SessionState::Disconnected.as_u8(), Ordering::SeqCst);
        if previous != SessionState::Disconnected.as_u8() {
            tracing::info!("Closing session");
        }
        self.inner.connection.close().await;
    }

    /// Current lifecycle state. A hint only: it may change right after.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
            .unwrap_or(SessionState::Disconnected)
    }

    /// Name the controller reported in the handshake
    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    /// Authorized user name, once authorized
    pub fn user(&self) -> Option<String> {
        self.inner
            .user
            .read()
            .map(|user| user.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// The session's type registry
    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn resources(&self) -> Resources<'_> {
        Resources::new(&self.inner.gate)
    }

    pub fn executables(&self) -> Executables<'_> {
        Executables::new(&self.inner.gate, &self.inner.streams)
    }

    pub fn access(&self) -> Access<'_> {
        Access::new(&self.inner.gate)
    }

    pub fn events(&self) -> Events<'_> {
        Events::new(&self.inner.events)
    }

    /// Extension module channels, wired on first use
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.inner.extensions
    }

    fn ensure_open(&self) -> Result<(), CorralError> {
        if self.state() == SessionState::Disconnected || self.inner.connection.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        // A concurrent close wins over any transition.
        let _ = self.inner.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            (current != SessionState::Disconnected.as_u8()).then_some(state.as_u8())
        });
    }

    fn set_user(&self, user: String) {
        match self.inner.user.write() {
            Ok(mut slot) => *slot = Some(user),
            Err(poisoned) => *poisoned.into_inner() = Some(user),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.inner.server_name)
            .field("state", &self.state())
            .finish()
    }
}
