//! # officerpc
//!
//! Lets the window hosting the editor expose methods to the windows that embed
//! it. One channel runs between the editor ("server") window and its embedding
//! ("client") window; any number of clients are multiplexed over it by id.
//!
//! - [`serve`] / [`Server`]: the editor side. Tracks client ids and routes
//!   `onInvoke` calls through the [`Dispatcher`].
//! - [`ClientHost`]: the embedding side.
//! - [`Transport`]: the window messaging primitive, with one [`Listener`] per
//!   subscriber; [`MemoryWindow`] is an in-process implementation.

pub mod binding;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod memory;
pub mod messenger;
pub mod methods;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod transport;
pub mod window;


pub use binding::Binding;
pub use binding::RemoteProxy;
pub use client::Client;
pub use client::ClientHost;
pub use client::ClientOptions;
pub use dispatch::Dispatcher;
pub use error::Error;
pub use error::Failure;
pub use error::FailureKind;
pub use error::ProtocolError;
pub use error::Result;
pub use memory::MemoryWindow;
pub use methods::Methods;
pub use protocol::CHANNEL;
pub use protocol::InvokeEnvelope;
pub use protocol::InvokeOptions;
pub use proxy::Callback;
pub use proxy::InvokeContext;
pub use proxy::ProxyContext;
pub use proxy::ProxyFactory;
pub use registry::ClientId;
pub use registry::ClientRegistry;
pub use server::Server;
pub use server::ServerOptions;
pub use server::ServerState;
pub use server::serve;
pub use transport::Listener;
pub use transport::Transport;
