//! # Channel Binding
//!
//! Connects this window to one remote window over a [`WindowMessenger`], on a
//! named channel, and runs request/response calls in both directions.
//!
//! A background pump reads the messenger and:
//! - answers every foreign `SYN` with an `ACK`, resolving the pending
//!   connection on the first `SYN` or `ACK` it sees from the other side,
//! - serves inbound `CALL`s from the local [`Methods`], each on its own task,
//! - routes `REPLY`s to pending calls by sequence id.
//!
//! Frames for other channels are ignored, which is what lets several pairings
//! share one window without cross-talk.
//!
//! ## Invariants
//! - The remote side is only reachable through a [`RemoteProxy`], and a proxy is
//!   only handed out once the handshake has resolved.
//! - When the pump stops, every pending call fails with `ConnectionClosed`.
//! - A closed connection drops its served methods, along with any handle to
//!   this connection they captured.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::error::Error;
use crate::error::Failure;
use crate::error::ProtocolError;
use crate::error::Result;
use crate::frame::Envelope;
use crate::frame::Frame;
use crate::messenger::WindowMessenger;
use crate::methods::Method;
use crate::methods::Methods;
use crate::transport::TransportError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one end of a channel.
pub struct Binding {
    messenger: WindowMessenger,
    channel: String,
    methods: Methods,
    call_timeout: Duration,
}

impl Binding {
    pub fn new(messenger: WindowMessenger, channel: impl Into<String>) -> Self {
        Self {
            messenger,
            channel: channel.into(),
            methods: Methods::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// The methods served to the remote side.
    pub fn methods(mut self, methods: Methods) -> Self {
        self.methods = methods;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Starts the handshake and spawns the pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(self) -> PendingConnection {
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            channel: self.channel,
            participant: uuid::Uuid::new_v4().to_string(),
            messenger: self.messenger,
            methods: Mutex::new(self.methods),
            pending: DashMap::new(),
            seq_gen: AtomicU64::new(1),
            call_timeout: self.call_timeout,
            closed,
        });

        let (connected_tx, connected_rx) = oneshot::channel();
        tokio::spawn(Shared::pump(shared.clone(), connected_tx));

        PendingConnection {
            proxy: RemoteProxy { shared },
            connected: connected_rx,
        }
    }
}

/// A connection whose handshake has not resolved yet.
pub struct PendingConnection {
    proxy: RemoteProxy,
    connected: oneshot::Receiver<()>,
}

impl PendingConnection {
    /// Resolves to the remote proxy once the other side has answered.
    ///
    /// Fails with `ConnectionClosed` if the pump stops first.
    pub async fn promise(self) -> Result<RemoteProxy> {
        self.connected.await.map_err(|_| Error::ConnectionClosed)?;
        Ok(self.proxy)
    }

    pub fn channel(&self) -> &str {
        &self.proxy.shared.channel
    }

    /// Gives up on the connection before it resolved.
    pub async fn destroy(self) {
        self.proxy.destroy().await;
    }
}

/// The remote side of a resolved connection.
#[derive(Clone)]
pub struct RemoteProxy {
    shared: Arc<Shared>,
}

impl RemoteProxy {
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Calls a method on the remote side and awaits its reply.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let shared = &self.shared;
        let seq = shared.seq_gen.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(seq, tx);

        // a close that raced the insert would never answer us
        if self.is_closed() {
            shared.pending.remove(&seq);
            return Err(Error::ConnectionClosed);
        }

        tracing::debug!(channel = %shared.channel, seq, method, "calling remote method");
        let frame = Frame::Call { id: seq, method: method.to_string(), args };
        if let Err(e) = shared.send(frame).await {
            shared.pending.remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(shared.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                shared.pending.remove(&seq);
                Err(Error::ConnectionClosed)
            }
            Err(_) => {
                shared.pending.remove(&seq);
                Err(TransportError::Timeout.into())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once the connection has closed, for whatever reason.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Tells the remote side we are going away, then stops the pump.
    pub async fn destroy(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.shared.send(Frame::Destroy).await {
            tracing::debug!(channel = %self.shared.channel, error = %e, "failed to send destroy");
        }
        self.shared.close("destroyed locally");
    }
}

struct Shared {
    channel: String,
    participant: String,
    messenger: WindowMessenger,
    methods: Mutex<Methods>,
    pending: DashMap<u64, oneshot::Sender<Result<Value>>>,
    seq_gen: AtomicU64,
    call_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl Shared {
    async fn pump(self: Arc<Self>, connected: oneshot::Sender<()>) {
        let mut connected = Some(connected);
        let mut closed = self.closed.subscribe();

        let syn = Frame::Syn { participant: self.participant.clone() };
        if let Err(e) = self.send(syn).await {
            tracing::warn!(channel = %self.channel, error = %e, "failed to send handshake");
            self.close("handshake failed");
            return;
        }

        let reason = loop {
            let received = tokio::select! {
                received = self.messenger.recv() => received,
                _ = closed.wait_for(|closed| *closed) => break "destroyed locally",
            };

            let envelope = match received {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break "remote window closed",
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "transport failed");
                    break "transport failed";
                }
            };

            if envelope.channel != self.channel {
                tracing::trace!(channel = %self.channel, other = %envelope.channel, "ignoring frame for another channel");
                continue;
            }

            if !self.handle(envelope.frame, &mut connected).await {
                break "destroyed by remote";
            }
        };

        self.close(reason);
    }

    /// Handles one frame. Returns false when the remote side tore down.
    async fn handle(self: &Arc<Self>, frame: Frame, connected: &mut Option<oneshot::Sender<()>>) -> bool {
        match frame {
            Frame::Syn { participant } => {
                if participant == self.participant {
                    return true;
                }
                let ack = Frame::Ack { participant: self.participant.clone() };
                if let Err(e) = self.send(ack).await {
                    tracing::warn!(channel = %self.channel, error = %e, "failed to acknowledge handshake");
                }
                self.resolve(connected);
            }
            Frame::Ack { participant } => {
                if participant != self.participant {
                    self.resolve(connected);
                }
            }
            Frame::Call { id, method, args } => {
                tokio::spawn(self.clone().serve_call(id, method, args));
            }
            Frame::Reply { id, result } => match self.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(result.map_err(Error::Remote));
                }
                None => {
                    tracing::trace!(channel = %self.channel, seq = id, "dropping reply with no pending call");
                }
            },
            Frame::Destroy => return false,
        }
        true
    }

    fn resolve(&self, connected: &mut Option<oneshot::Sender<()>>) {
        if let Some(tx) = connected.take() {
            tracing::debug!(channel = %self.channel, "handshake complete");
            let _ = tx.send(());
        }
    }

    async fn serve_call(self: Arc<Self>, id: u64, method: String, args: Vec<Value>) {
        let result = match self.served(&method) {
            Some(f) => match AssertUnwindSafe(f(args)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::Application(format!("method '{method}' panicked"))),
            },
            None => Err(ProtocolError::MethodNotFound(method.clone()).into()),
        };

        let result = result.map_err(|e| {
            tracing::debug!(channel = %self.channel, method = %method, error = %e, "call failed");
            Failure::from(&e)
        });

        if let Err(e) = self.send(Frame::Reply { id, result }).await {
            tracing::debug!(channel = %self.channel, method = %method, error = %e, "failed to send reply");
        }
    }

    fn served(&self, method: &str) -> Option<Method> {
        self.methods.lock().unwrap_or_else(PoisonError::into_inner).get(method)
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        self.messenger.send(&Envelope::new(self.channel.clone(), frame)).await
    }

    /// Marks the connection closed, fails every pending call and drops the
    /// served methods.
    fn close(&self, reason: &str) {
        if self.closed.send_replace(true) {
            return;
        }

        let keys: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
        }

        drop(std::mem::take(&mut *self.methods.lock().unwrap_or_else(PoisonError::into_inner)));

        tracing::info!(channel = %self.channel, reason, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::error::FailureKind;
    use crate::memory::MemoryWindow;
    use crate::messenger::AllowedOrigins;

    const HOST: &str = "https://host.example";
    const EDITOR: &str = "https://editor.example";

    fn messengers() -> (WindowMessenger, WindowMessenger, Arc<MemoryWindow>) {
        let (editor, host) = MemoryWindow::pair(EDITOR, HOST);
        let host = Arc::new(host);
        let editor_side = WindowMessenger::new(Arc::new(editor), AllowedOrigins::List(vec![HOST.into()]));
        let host_side = WindowMessenger::new(host.clone(), AllowedOrigins::List(vec![EDITOR.into()]));
        (editor_side, host_side, host)
    }

    fn echo() -> Methods {
        Methods::new()
            .method("echo", |args| async move { Ok(Value::Array(args)) })
            .method("fail", |_| async { Err(Error::Application("nope".into())) })
    }

    #[tokio::test]
    async fn calls_flow_both_ways() {
        let (editor, host, _) = messengers();

        let a = Binding::new(editor, "ch").methods(echo()).connect();
        let b = Binding::new(host, "ch").methods(echo()).connect();
        let (a, b) = (a.promise().await.unwrap(), b.promise().await.unwrap());

        assert_eq!(a.call("echo", vec![json!(1)]).await.unwrap(), json!([1]));
        assert_eq!(b.call("echo", vec![json!("x")]).await.unwrap(), json!(["x"]));
    }

    #[tokio::test]
    async fn failures_come_back_as_remote_errors() {
        let (editor, host, _) = messengers();
        let server = Binding::new(editor, "ch").methods(echo()).connect();
        let client = Binding::new(host, "ch").connect();
        let client = client.promise().await.unwrap();
        let _server = server.promise().await.unwrap();

        match client.call("fail", vec![]).await {
            Err(Error::Remote(failure)) => assert_eq!(failure.kind, FailureKind::Application),
            other => panic!("unexpected result: {other:?}"),
        }
        match client.call("missing", vec![]).await {
            Err(Error::Remote(failure)) => assert_eq!(failure.kind, FailureKind::MethodNotFound),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_methods_fail_the_call_only() {
        let (editor, host, _) = messengers();
        let methods = echo().method("explode", |args: Vec<Value>| async move {
            if args.is_empty() {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let _server = Binding::new(editor, "ch").methods(methods).connect();
        let client = Binding::new(host, "ch").connect().promise().await.unwrap();

        assert!(matches!(client.call("explode", vec![]).await, Err(Error::Remote(_))));
        assert_eq!(client.call("echo", vec![]).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn other_channels_are_invisible() {
        let (editor, host, _) = messengers();
        let _a = Binding::new(editor, "one").connect();
        let b = Binding::new(host, "two").connect();

        let resolved = tokio::time::timeout(Duration::from_millis(100), b.promise()).await;
        assert!(resolved.is_err(), "handshake must not cross channels");
    }

    #[tokio::test]
    async fn destroy_closes_both_sides() {
        let (editor, host, _) = messengers();
        let a = Binding::new(editor, "ch").connect();
        let b = Binding::new(host, "ch").connect();
        let (a, b) = (a.promise().await.unwrap(), b.promise().await.unwrap());

        a.destroy().await;
        b.closed().await;

        assert!(a.is_closed());
        assert!(matches!(b.call("echo", vec![]).await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn closing_releases_served_methods() {
        let (editor, host, _) = messengers();
        let captured = Arc::new(());
        let held = captured.clone();
        let methods = Methods::new().method("hold", move |_| {
            let _ = &held;
            async { Ok(Value::Null) }
        });

        let a = Binding::new(editor, "ch").methods(methods).connect();
        let b = Binding::new(host, "ch").connect();
        let (a, b) = (a.promise().await.unwrap(), b.promise().await.unwrap());
        assert_eq!(b.call("hold", vec![]).await.unwrap(), Value::Null);
        assert_eq!(Arc::strong_count(&captured), 2);

        a.destroy().await;

        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[tokio::test]
    async fn remote_destroy_fails_pending_calls() {
        let (editor, host, _) = messengers();
        let slow = Methods::new().method("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let server = Binding::new(editor, "ch").methods(slow).connect();
        let client = Binding::new(host, "ch").connect().promise().await.unwrap();
        let server = server.promise().await.unwrap();

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("slow", vec![]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.destroy().await;

        assert!(matches!(call.await.unwrap(), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn closing_the_window_closes_the_connection() {
        let (editor, host, host_window) = messengers();
        let server = Binding::new(editor, "ch").connect();
        let _client = Binding::new(host, "ch").connect().promise().await.unwrap();
        let server = server.promise().await.unwrap();

        host_window.close().await;
        server.closed().await;

        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn calls_time_out() {
        let (editor, host, _) = messengers();
        let slow = Methods::new().method("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let _server = Binding::new(editor, "ch").methods(slow).connect();
        let client = Binding::new(host, "ch")
            .call_timeout(Duration::from_millis(50))
            .connect()
            .promise()
            .await
            .unwrap();

        assert!(matches!(
            client.call("slow", vec![]).await,
            Err(Error::Transport(TransportError::Timeout))
        ));
    }
}
