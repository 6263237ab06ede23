//! # Server Bootstrap
//!
//! Brings up the editor window's side of the connection.
//!
//! [`Server::new`] resolves the parent window, opens the channel and wires
//! `onInvoke` to the [`Dispatcher`]. [`Server::ready`] awaits the handshake,
//! stores the client handle (only then may dispatch touch it), pulls the
//! client ids the embedding window already knows, and returns the registry.
//! [`serve`] does both.
//!
//! ## States
//!
//! `Uninitialized -> TransportOpening -> AwaitingHandshake -> Ready`. There is
//! no closed state: when the channel closes, every client admitted through it
//! is retired and the server stays `Ready` with an empty registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::binding::Binding;
use crate::binding::DEFAULT_CALL_TIMEOUT;
use crate::binding::PendingConnection;
use crate::dispatch::Dispatcher;
use crate::dispatch::RemoteSlot;
use crate::dispatch::RemoteState;
use crate::error::Result;
use crate::messenger::AllowedOrigins;
use crate::messenger::WindowMessenger;
use crate::protocol::CHANNEL;
use crate::protocol::ClientHandle;
use crate::protocol::ConnectionServer;
use crate::protocol::InvokeEnvelope;
use crate::protocol::admit;
use crate::protocol::server_protocol;
use crate::proxy::ProxyFactory;
use crate::registry::Admission;
use crate::registry::ClientId;
use crate::registry::ClientRegistry;
use crate::transport::Transport;
use crate::window::parent_window;

pub const DEFAULT_LOCAL_ORIGIN: &str = "http://localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    TransportOpening,
    AwaitingHandshake,
    Ready,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::TransportOpening => "transport-opening",
            Self::AwaitingHandshake => "awaiting-handshake",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Server configuration, built fluently.
pub struct ServerOptions {
    remote_window: Option<Arc<dyn Transport>>,
    allowed_origins: Option<Vec<String>>,
    local_origin: String,
    channel: String,
    call_timeout: Duration,
    proxy: Arc<dyn ProxyFactory>,
}

impl ServerOptions {
    /// `proxy` generates the server method table for each invocation.
    pub fn new(proxy: impl ProxyFactory) -> Self {
        Self {
            remote_window: None,
            allowed_origins: None,
            local_origin: DEFAULT_LOCAL_ORIGIN.to_string(),
            channel: CHANNEL.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            proxy: Arc::new(proxy),
        }
    }

    /// The parent or opener window. Without one, bootstrap fails.
    pub fn remote_window(mut self, window: Arc<dyn Transport>) -> Self {
        self.remote_window = Some(window);
        self
    }

    /// Origins allowed to talk to us. Unset means our own origin only;
    /// `*` lifts the restriction.
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = Some(origins.into_iter().map(Into::into).collect());
        self
    }

    pub fn local_origin(mut self, origin: impl Into<String>) -> Self {
        self.local_origin = origin.into();
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Bootstraps a server and returns the client ids known once it is ready.
///
/// The connection keeps running after this returns.
pub async fn serve(options: ServerOptions) -> Result<Vec<ClientId>> {
    let mut server = Server::new(options)?;
    server.ready().await
}

pub struct Server {
    channel: String,
    state: ServerState,
    registry: ClientRegistry,
    remote: Arc<RemoteSlot>,
    dispatcher: Arc<Dispatcher>,
    pending: Option<PendingConnection>,
}

impl Server {
    /// Opens the channel. Fails if no parent window is reachable.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: ServerOptions) -> Result<Self> {
        let ServerOptions {
            remote_window,
            allowed_origins,
            local_origin,
            channel,
            call_timeout,
            proxy,
        } = options;

        let mut state = ServerState::Uninitialized;
        let window = parent_window(remote_window)?;
        transition(&channel, &mut state, ServerState::TransportOpening);

        let allowed = AllowedOrigins::resolve(allowed_origins, &local_origin);
        let messenger = WindowMessenger::new(window, allowed);

        let registry = ClientRegistry::new();
        let remote = Arc::new(RemoteSlot::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), proxy, remote.clone()));
        let protocol = Arc::new(ServerProtocol { dispatcher: dispatcher.clone() });

        let pending = Binding::new(messenger, channel.clone())
            .methods(server_protocol(protocol))
            .call_timeout(call_timeout)
            .connect();
        transition(&channel, &mut state, ServerState::AwaitingHandshake);

        Ok(Self {
            channel,
            state,
            registry,
            remote,
            dispatcher,
            pending: Some(pending),
        })
    }

    /// Completes the bootstrap and returns every known client id.
    ///
    /// Calling it again once ready just returns the current registry.
    pub async fn ready(&mut self) -> Result<Vec<ClientId>> {
        let Some(pending) = self.pending.take() else {
            return Ok(self.clients());
        };

        let remote = pending.promise().await?;
        let client = ClientHandle::new(remote.clone());
        self.remote.set(client.clone());
        transition(&self.channel, &mut self.state, ServerState::Ready);

        let registry = self.registry.clone();
        let channel = self.channel.clone();
        tokio::spawn(async move {
            remote.closed().await;
            let retired = registry.retire_all();
            tracing::info!(%channel, retired = retired.len(), "client window closed, retired its clients");
        });

        let pulled = client.open().await?;
        let admitted = self.registry.extend(pulled);
        // the watcher may have retired everything before these were added
        if client.remote().is_closed() {
            let retired = self.registry.retire_all();
            tracing::info!(channel = %self.channel, retired = retired.len(), "client window closed during bootstrap");
        } else {
            tracing::info!(channel = %self.channel, admitted, "pulled known clients");
        }

        Ok(self.clients())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Live client ids in admission order.
    pub fn clients(&self) -> Vec<ClientId> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Runs an invocation as if it had arrived over the channel.
    pub async fn dispatch(&self, envelope: InvokeEnvelope) -> Result<Option<Value>> {
        self.dispatcher.dispatch(envelope).await
    }

    /// Tears the channel down; the client window sees it close.
    pub async fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.destroy().await;
        }
        if let RemoteState::Ready(client) = self.remote.state() {
            client.remote().destroy().await;
        }
    }
}

fn transition(channel: &str, state: &mut ServerState, next: ServerState) {
    tracing::info!(%channel, from = %state, to = %next, "server state");
    *state = next;
}

/// Connection protocol methods, as served by the editor window.
struct ServerProtocol {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait::async_trait]
impl ConnectionServer for ServerProtocol {
    async fn on_invoke(&self, envelope: InvokeEnvelope) -> Result<Option<Value>> {
        self.dispatcher.dispatch(envelope).await
    }

    fn on_connect(&self, client_id: ClientId) -> Result<()> {
        match admit(self.dispatcher.registry(), client_id.clone()) {
            Ok(Admission::Admitted) => {
                tracing::info!(%client_id, "client connected");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(%client_id, "refusing retired client id");
                Err(e)
            }
        }
    }

    fn on_disconnect(&self, client_id: ClientId) {
        if self.dispatcher.registry().remove(client_id.as_str()) {
            tracing::info!(%client_id, "client disconnected");
        }
    }
}
