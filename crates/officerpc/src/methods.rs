//! # Method Tables
//!
//! A method is an async function from positional JSON arguments to a JSON
//! result. A [`Methods`] table maps names to methods and is what a binding
//! serves to the other side.
//!
//! Nested namespaces (`callback.progress`) are flattened into dotted names.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;

pub type MethodFuture = BoxFuture<'static, Result<Value>>;

pub type Method = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// A name-to-method mapping. Cloning is cheap; methods are shared.
#[derive(Clone, Default)]
pub struct Methods {
    table: HashMap<String, Method>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method, builder style.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(name, f);
        self
    }

    /// Adds a method, replacing any previous one with the same name.
    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let method: Method = Arc::new(move |args| f(args).boxed());
        self.table.insert(name.into(), method);
    }

    /// Moves every method of `other` under `prefix.`.
    pub fn nest(mut self, prefix: &str, other: Methods) -> Self {
        for (name, method) in other.table {
            self.table.insert(format!("{prefix}.{name}"), method);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Method> {
        self.table.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Methods").field("names", &names).finish()
    }
}

/// Decodes the positional argument at `index`.
///
/// A missing trailing argument decodes as `null`, so `Option<T>` parameters
/// may be omitted by the caller.
pub fn arg<T: DeserializeOwned>(method: &str, args: &[Value], index: usize) -> Result<T> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        ProtocolError::BadArguments {
            method: method.to_string(),
            details: format!("argument {index}: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn nest_prefixes_names() {
        let inner = Methods::new().method("progress", |args| async move { Ok(json!(args.len())) });
        let methods = Methods::new()
            .method("open", |_| async { Ok(json!([])) })
            .nest("callback", inner);

        assert!(methods.contains("open"));
        assert!(methods.contains("callback.progress"));
        assert!(!methods.contains("progress"));

        let progress = methods.get("callback.progress").unwrap();
        assert_eq!(progress(vec![json!(1), json!(2)]).await.unwrap(), json!(2));
    }

    #[test]
    fn arg_decodes_and_reports_position() {
        let args = vec![json!("c1"), json!(3)];

        let id: String = arg("m", &args, 0).unwrap();
        assert_eq!(id, "c1");

        let missing: Option<String> = arg("m", &args, 5).unwrap();
        assert_eq!(missing, None);

        let err = arg::<String>("m", &args, 1).unwrap_err();
        assert!(err.is_protocol_usage());
        assert!(err.to_string().contains("argument 1"));
    }
}
