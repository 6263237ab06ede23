//! # Client Host
//!
//! The embedding window's side of the connection. One [`ClientHost`] holds the
//! single channel to the editor window and multiplexes any number of
//! [`Client`]s over it, each identified by its own [`ClientId`].
//!
//! Ids attached before the editor finished bootstrapping are not lost: the
//! editor pulls them through `open()` once its handshake resolves.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::binding::Binding;
use crate::binding::DEFAULT_CALL_TIMEOUT;
use crate::error::Result;
use crate::messenger::AllowedOrigins;
use crate::messenger::WindowMessenger;
use crate::methods::Methods;
use crate::protocol::CHANNEL;
use crate::protocol::InvokeEnvelope;
use crate::protocol::InvokeOptions;
use crate::protocol::ServerHandle;
use crate::protocol::admit;
use crate::protocol::client_protocol;
use crate::registry::ClientId;
use crate::registry::ClientRegistry;
use crate::server::DEFAULT_LOCAL_ORIGIN;
use crate::transport::Transport;
use crate::window::parent_window;

pub struct ClientOptions {
    remote_window: Option<Arc<dyn Transport>>,
    allowed_origins: Option<Vec<String>>,
    local_origin: String,
    channel: String,
    call_timeout: Duration,
    callbacks: Methods,
    clients: Vec<ClientId>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            remote_window: None,
            allowed_origins: None,
            local_origin: DEFAULT_LOCAL_ORIGIN.to_string(),
            channel: CHANNEL.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            callbacks: Methods::new(),
            clients: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The editor's window (usually an iframe's content window).
    pub fn remote_window(mut self, window: Arc<dyn Transport>) -> Self {
        self.remote_window = Some(window);
        self
    }

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

    /// Served under `callback.`; each call ends with an `InvokeContext`
    /// naming the client it is meant for.
    pub fn callbacks(mut self, callbacks: Methods) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// A client id this window already knows, reported through `open()`.
    pub fn client(mut self, id: impl Into<ClientId>) -> Self {
        self.clients.push(id.into());
        self
    }
}

pub struct ClientHost {
    server: ServerHandle,
    known: ClientRegistry,
}

impl ClientHost {
    /// Opens the channel and waits for the editor's handshake.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let window = parent_window(options.remote_window)?;

        let known = ClientRegistry::new();
        known.extend(options.clients);

        let allowed = AllowedOrigins::resolve(options.allowed_origins, &options.local_origin);
        let remote = Binding::new(WindowMessenger::new(window, allowed), options.channel)
            .methods(client_protocol(known.clone(), options.callbacks))
            .call_timeout(options.call_timeout)
            .connect()
            .promise()
            .await?;

        tracing::info!(channel = %remote.channel(), known = known.len(), "connected to editor");
        Ok(Self {
            server: ServerHandle::new(remote),
            known,
        })
    }

    /// Attaches a new client under a freshly minted id.
    pub async fn attach(&self) -> Result<Client> {
        self.attach_as(ClientId::generate()).await
    }

    /// Attaches a client under a chosen id and announces it to the editor.
    pub async fn attach_as(&self, id: ClientId) -> Result<Client> {
        admit(&self.known, id.clone())?;

        if let Err(e) = self.server.connect(&id).await {
            self.known.remove(id.as_str());
            return Err(e);
        }

        tracing::debug!(client_id = %id, "client attached");
        Ok(Client {
            id,
            server: self.server.clone(),
            known: self.known.clone(),
        })
    }

    /// A handle for a client this window already knows, such as one named
    /// through [`ClientOptions::client`].
    pub fn client(&self, id: &ClientId) -> Option<Client> {
        self.known.contains(id.as_str()).then(|| Client {
            id: id.clone(),
            server: self.server.clone(),
            known: self.known.clone(),
        })
    }

    /// Ids of the clients this window knows, in attach order.
    pub fn clients(&self) -> Vec<ClientId> {
        self.known.snapshot()
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    pub async fn close(&self) {
        self.server.remote().destroy().await;
    }
}

/// One client multiplexed over the host's channel.
#[derive(Clone)]
pub struct Client {
    id: ClientId,
    server: ServerHandle,
    known: ClientRegistry,
}

impl Client {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let envelope = InvokeEnvelope::new(self.id.clone(), method, args);
        self.server.invoke(envelope).await
    }

    pub async fn invoke_with(&self, method: &str, args: Vec<Value>, options: InvokeOptions) -> Result<Value> {
        let envelope = InvokeEnvelope::new(self.id.clone(), method, args).options(options);
        self.server.invoke(envelope).await
    }

    /// Detaches this client. Its id is retired on both sides.
    pub async fn detach(&self) -> Result<()> {
        self.known.remove(self.id.as_str());
        self.server.disconnect(&self.id).await?;
        tracing::debug!(client_id = %self.id, "client detached");
        Ok(())
    }
}
