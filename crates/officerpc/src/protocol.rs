//! # Connection Protocol
//!
//! The method contract both windows implement on top of a [`Binding`].
//!
//! Server side, built by [`server_protocol`]:
//! - `onInvoke(clientId, method, args, options?)`: run a server method for a client.
//! - `onConnect(clientId)`: a client attached after the handshake.
//! - `onDisconnect(clientId)`: a client went away.
//!
//! Client side, built by [`client_protocol`]:
//! - `open()`: every client id the embedding window already knows about.
//! - `callback.*`: pushes from server methods back to a client.
//!
//! [`Binding`]: crate::binding::Binding

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::binding::RemoteProxy;
use crate::error::Error;
use crate::error::ProtocolError;
use crate::error::Result;
use crate::methods::Method;
use crate::methods::Methods;
use crate::methods::arg;
use crate::proxy::Callback;
use crate::proxy::InvokeContext;
use crate::registry::Admission;
use crate::registry::ClientId;
use crate::registry::ClientRegistry;

/// The channel both sides bind to unless told otherwise.
///
/// Shared verbatim with every client implementation; do not change it.
pub const CHANNEL: &str = "officesdk-rpc";

pub const ON_INVOKE: &str = "onInvoke";
pub const ON_CONNECT: &str = "onConnect";
pub const ON_DISCONNECT: &str = "onDisconnect";
pub const OPEN: &str = "open";
pub const CALLBACK: &str = "callback";

/// Free-form metadata a client attaches to an invocation. Passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeOptions {
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl InvokeOptions {
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One remote call, as carried by `onInvoke`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeEnvelope {
    pub client_id: ClientId,
    pub method: String,
    pub args: Vec<Value>,
    pub options: Option<InvokeOptions>,
}

impl InvokeEnvelope {
    pub fn new(client_id: ClientId, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            client_id,
            method: method.into(),
            args,
            options: None,
        }
    }

    pub fn options(mut self, options: InvokeOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Positional wire form: `[clientId, method, args, options?]`.
    pub fn into_args(self) -> Vec<Value> {
        let mut args = vec![
            Value::String(self.client_id.to_string()),
            Value::String(self.method),
            Value::Array(self.args),
        ];
        if let Some(options) = self.options {
            args.push(Value::Object(options.extra));
        }
        args
    }

    pub fn from_args(args: &[Value]) -> Result<Self> {
        Ok(Self {
            client_id: arg(ON_INVOKE, args, 0)?,
            method: arg(ON_INVOKE, args, 1)?,
            args: arg(ON_INVOKE, args, 2)?,
            options: arg(ON_INVOKE, args, 3)?,
        })
    }
}

/// What the server window does when the protocol methods are called.
#[async_trait::async_trait]
pub trait ConnectionServer: Send + Sync + 'static {
    /// `Ok(None)` means the call was dropped (unknown caller).
    async fn on_invoke(&self, envelope: InvokeEnvelope) -> Result<Option<Value>>;

    fn on_connect(&self, client_id: ClientId) -> Result<()>;

    fn on_disconnect(&self, client_id: ClientId);
}

/// Builds the server-side method table around a [`ConnectionServer`].
pub fn server_protocol<S: ConnectionServer>(server: Arc<S>) -> Methods {
    let invoke = server.clone();
    let connect = server.clone();
    let disconnect = server;

    Methods::new()
        .method(ON_INVOKE, move |args| serve_invoke(invoke.clone(), args))
        .method(ON_CONNECT, move |args| serve_connect(connect.clone(), args))
        .method(ON_DISCONNECT, move |args| serve_disconnect(disconnect.clone(), args))
}

async fn serve_invoke<S: ConnectionServer>(server: Arc<S>, args: Vec<Value>) -> Result<Value> {
    let envelope = InvokeEnvelope::from_args(&args)?;
    Ok(server.on_invoke(envelope).await?.unwrap_or(Value::Null))
}

async fn serve_connect<S: ConnectionServer>(server: Arc<S>, args: Vec<Value>) -> Result<Value> {
    server.on_connect(arg(ON_CONNECT, &args, 0)?)?;
    Ok(Value::Null)
}

async fn serve_disconnect<S: ConnectionServer>(server: Arc<S>, args: Vec<Value>) -> Result<Value> {
    server.on_disconnect(arg(ON_DISCONNECT, &args, 0)?);
    Ok(Value::Null)
}

/// Builds the client-side method table: `open` reports `known`, and
/// `callbacks` are served under `callback.`.
///
/// A callback is only delivered while the client named by its trailing
/// [`InvokeContext`] is attached here. Callbacks for detached or unknown
/// clients are dropped and answer `null`, the same way the server treats
/// invocations from clients it does not know.
pub fn client_protocol(known: ClientRegistry, callbacks: Methods) -> Methods {
    let ids = known.clone();
    Methods::new()
        .method(OPEN, move |_| {
            let ids = ids.snapshot();
            async move { serde_json::to_value(ids).map_err(Error::from) }
        })
        .nest(CALLBACK, route_callbacks(known, callbacks))
}

fn route_callbacks(known: ClientRegistry, callbacks: Methods) -> Methods {
    let mut routed = Methods::new();
    for name in callbacks.names() {
        let Some(callback) = callbacks.get(name) else {
            continue;
        };
        let known = known.clone();
        let name = name.to_string();
        routed.insert(name.clone(), move |args| {
            deliver_callback(known.clone(), name.clone(), callback.clone(), args)
        });
    }
    routed
}

async fn deliver_callback(known: ClientRegistry, name: String, callback: Method, args: Vec<Value>) -> Result<Value> {
    let context: InvokeContext = arg(&name, &args, args.len().saturating_sub(1))?;
    if !known.contains(context.client_id.as_str()) {
        tracing::debug!(client_id = %context.client_id, callback = %name, "dropping callback for a client that is not attached");
        return Ok(Value::Null);
    }
    callback(args).await
}

/// Offers `client_id` to `registry`, refusing retired ids.
pub(crate) fn admit(registry: &ClientRegistry, client_id: ClientId) -> Result<Admission> {
    match registry.insert(client_id.clone()) {
        Admission::Retired => Err(ProtocolError::RetiredClient(client_id.to_string()).into()),
        admission => Ok(admission),
    }
}

/// The server's view of the client window.
#[derive(Clone)]
pub struct ClientHandle {
    remote: RemoteProxy,
}

impl ClientHandle {
    pub fn new(remote: RemoteProxy) -> Self {
        Self { remote }
    }

    /// Pulls the client ids the client window already knows about.
    pub async fn open(&self) -> Result<Vec<ClientId>> {
        let ids = self.remote.call(OPEN, Vec::new()).await?;
        Ok(serde_json::from_value(ids)?)
    }

    /// A callback reference scoped to one client.
    pub fn callback(&self, client_id: ClientId) -> Callback {
        Callback::new(self.remote.clone(), client_id)
    }

    pub fn remote(&self) -> &RemoteProxy {
        &self.remote
    }
}

/// The client window's view of the server.
#[derive(Clone)]
pub struct ServerHandle {
    remote: RemoteProxy,
}

impl ServerHandle {
    pub fn new(remote: RemoteProxy) -> Self {
        Self { remote }
    }

    /// Invokes a server method. A dropped invocation answers `null`.
    pub async fn invoke(&self, envelope: InvokeEnvelope) -> Result<Value> {
        self.remote.call(ON_INVOKE, envelope.into_args()).await
    }

    pub async fn connect(&self, client_id: &ClientId) -> Result<()> {
        let args = vec![Value::String(client_id.to_string())];
        self.remote.call(ON_CONNECT, args).await.map(drop)
    }

    pub async fn disconnect(&self, client_id: &ClientId) -> Result<()> {
        let args = vec![Value::String(client_id.to_string())];
        self.remote.call(ON_DISCONNECT, args).await.map(drop)
    }

    pub fn remote(&self) -> &RemoteProxy {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_form_round_trips() {
        let envelope = InvokeEnvelope::new("c1".into(), "getTitle", vec![json!(1)])
            .options(InvokeOptions::default().with("traceId", json!("t-1")));

        let args = envelope.clone().into_args();
        assert_eq!(args, vec![json!("c1"), json!("getTitle"), json!([1]), json!({ "traceId": "t-1" })]);
        assert_eq!(InvokeEnvelope::from_args(&args).unwrap(), envelope);
    }

    #[test]
    fn envelope_options_are_optional() {
        let args = vec![json!("c1"), json!("getTitle"), json!([])];
        let envelope = InvokeEnvelope::from_args(&args).unwrap();
        assert_eq!(envelope.options, None);
        assert!(envelope.args.is_empty());
    }

    #[test]
    fn malformed_envelopes_are_protocol_errors() {
        let err = InvokeEnvelope::from_args(&[json!(42)]).unwrap_err();
        assert!(err.is_protocol_usage());
    }

    #[tokio::test]
    async fn open_reports_known_ids() {
        let known = ClientRegistry::new();
        known.extend(["c1".into(), "c2".into()]);
        let methods = client_protocol(known, Methods::new());

        let open = methods.get(OPEN).unwrap();
        assert_eq!(open(vec![]).await.unwrap(), json!(["c1", "c2"]));
    }

    fn recorder(log: &std::sync::Arc<std::sync::Mutex<Vec<Vec<Value>>>>) -> Methods {
        let log = log.clone();
        Methods::new().method("saved", move |args: Vec<Value>| {
            log.lock().unwrap().push(args);
            async { Ok(Value::Null) }
        })
    }

    #[tokio::test]
    async fn callbacks_reach_attached_clients_only() {
        let log = Default::default();
        let known = ClientRegistry::new();
        known.extend(["c1".into(), "c2".into()]);
        known.remove("c2");
        let methods = client_protocol(known, recorder(&log));
        let saved = methods.get("callback.saved").unwrap();

        let delivered = vec![json!(true), json!({ "clientId": "c1" })];
        saved(delivered.clone()).await.unwrap();
        assert_eq!(saved(vec![json!(true), json!({ "clientId": "c2" })]).await.unwrap(), Value::Null);
        assert_eq!(saved(vec![json!(true), json!({ "clientId": "c9" })]).await.unwrap(), Value::Null);

        assert_eq!(*log.lock().unwrap(), vec![delivered]);
    }

    #[tokio::test]
    async fn callbacks_without_a_context_are_refused() {
        let log = Default::default();
        let methods = client_protocol(ClientRegistry::new(), recorder(&log));
        let saved = methods.get("callback.saved").unwrap();

        let err = saved(vec![]).await.unwrap_err();

        assert!(matches!(err, crate::Error::Protocol(ProtocolError::BadArguments { .. })));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn admit_refuses_retired_ids() {
        let registry = ClientRegistry::new();
        registry.insert("c1".into());
        registry.remove("c1");

        let err = admit(&registry, "c1".into()).unwrap_err();
        assert!(matches!(err, crate::Error::Protocol(ProtocolError::RetiredClient(_))));
    }
}
