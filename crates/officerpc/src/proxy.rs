//! # Per-Call Proxies
//!
//! Server method tables are not static. For every dispatched invocation a
//! [`ProxyFactory`] is handed a [`ProxyContext`] holding a callback scoped to
//! the invoking client, and returns a fresh [`Methods`] table. A callback can
//! therefore never leak from one client's invocation into another's.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::binding::RemoteProxy;
use crate::error::ProtocolError;
use crate::error::Result;
use crate::methods::Methods;
use crate::protocol::CALLBACK;
use crate::protocol::InvokeOptions;
use crate::registry::ClientId;

/// Appended as the last argument of every dispatched call and every callback,
/// so implementations can tell callers apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeContext {
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<InvokeOptions>,
}

impl InvokeContext {
    pub fn new(client_id: ClientId) -> Self {
        Self { client_id, options: None }
    }

    pub fn to_value(&self) -> Value {
        // a struct of a string and a string-keyed map always serializes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Pops the trailing context off `args`, leaving the caller's arguments.
    pub fn split(method: &str, args: &mut Vec<Value>) -> Result<Self> {
        let bad = |details: String| ProtocolError::BadArguments {
            method: method.to_string(),
            details,
        };
        let last = args.pop().ok_or_else(|| bad("missing invoke context".into()))?;
        serde_json::from_value(last).map_err(|e| bad(format!("invoke context: {e}")).into())
    }
}

/// Pushes data to the client that made the current invocation.
#[derive(Clone)]
pub struct Callback {
    remote: RemoteProxy,
    client_id: ClientId,
}

impl Callback {
    pub(crate) fn new(remote: RemoteProxy, client_id: ClientId) -> Self {
        Self { remote, client_id }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Calls `callback.<name>` on the client window, tagged with this client.
    pub async fn call(&self, name: &str, mut args: Vec<Value>) -> Result<Value> {
        args.push(InvokeContext::new(self.client_id.clone()).to_value());
        self.remote.call(&format!("{CALLBACK}.{name}"), args).await
    }
}

/// What a proxy factory is given for one invocation.
#[derive(Clone)]
pub struct ProxyContext {
    pub callback: Callback,
}

/// Produces the server method table for one invocation.
pub trait ProxyFactory: Send + Sync + 'static {
    fn create(&self, context: ProxyContext) -> Methods;
}

impl<F> ProxyFactory for F
where
    F: Fn(ProxyContext) -> Methods + Send + Sync + 'static,
{
    fn create(&self, context: ProxyContext) -> Methods {
        self(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_serializes_camel_case() {
        let ctx = InvokeContext::new("c1".into());
        assert_eq!(ctx.to_value(), json!({ "clientId": "c1" }));
    }

    #[test]
    fn split_pops_the_trailing_context() {
        let mut args = vec![json!(1), json!({ "clientId": "c1", "options": { "a": true } })];
        let ctx = InvokeContext::split("m", &mut args).unwrap();

        assert_eq!(args, vec![json!(1)]);
        assert_eq!(ctx.client_id, "c1");
        assert_eq!(ctx.options.unwrap().extra["a"], json!(true));
    }

    #[test]
    fn split_without_context_is_a_protocol_error() {
        let err = InvokeContext::split("m", &mut vec![]).unwrap_err();
        assert!(err.is_protocol_usage());
    }
}
