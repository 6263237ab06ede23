//! # Invocation Dispatcher
//!
//! Decides whether and how to run one [`InvokeEnvelope`]:
//!
//! 1. No client handle yet: the caller raced the handshake. Protocol error.
//! 2. Unregistered `clientId`: a stale or foreign caller. Dropped, `Ok(None)`.
//! 3. Build a fresh method table from the proxy factory, with a callback
//!    scoped to this client.
//! 4. Unknown method: protocol error, distinct from the silent drop above.
//! 5. Run it with the caller's args plus a trailing [`InvokeContext`].

use std::sync::Arc;
use std::sync::OnceLock;

use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;
use crate::protocol::ClientHandle;
use crate::protocol::InvokeEnvelope;
use crate::proxy::InvokeContext;
use crate::proxy::ProxyContext;
use crate::proxy::ProxyFactory;
use crate::registry::ClientRegistry;

/// Where the server keeps its handle to the client window.
///
/// Set exactly once, when the handshake resolves.
#[derive(Default)]
pub struct RemoteSlot {
    handle: OnceLock<ClientHandle>,
}

pub enum RemoteState<'a> {
    NotReady,
    Ready(&'a ClientHandle),
}

impl RemoteSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RemoteState<'_> {
        match self.handle.get() {
            Some(handle) => RemoteState::Ready(handle),
            None => RemoteState::NotReady,
        }
    }

    /// Stores the handle. Returns false if one was already stored.
    pub fn set(&self, handle: ClientHandle) -> bool {
        self.handle.set(handle).is_ok()
    }
}

pub struct Dispatcher {
    registry: ClientRegistry,
    proxy: Arc<dyn ProxyFactory>,
    remote: Arc<RemoteSlot>,
}

impl Dispatcher {
    pub fn new(registry: ClientRegistry, proxy: Arc<dyn ProxyFactory>, remote: Arc<RemoteSlot>) -> Self {
        Self { registry, proxy, remote }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, envelope: InvokeEnvelope) -> Result<Option<Value>> {
        let client = match self.remote.state() {
            RemoteState::NotReady => return Err(ProtocolError::InvokeBeforeConnected.into()),
            RemoteState::Ready(client) => client.clone(),
        };

        let InvokeEnvelope { client_id, method, mut args, options } = envelope;

        if !self.registry.contains(client_id.as_str()) {
            tracing::debug!(%client_id, %method, "dropping invocation from unregistered client");
            return Ok(None);
        }

        let methods = self.proxy.create(ProxyContext {
            callback: client.callback(client_id.clone()),
        });

        let Some(f) = methods.get(&method) else {
            tracing::debug!(%client_id, %method, "invocation names an unknown method");
            return Err(ProtocolError::MethodNotFound(method).into());
        };

        tracing::debug!(%client_id, %method, "dispatching invocation");
        args.push(InvokeContext { client_id, options }.to_value());
        f(args).await.map(Some)
    }
}
