//! # Transport Abstraction
//!
//! A minimal, async interface for posting messages between two windows.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about frames, channels or
//!   methods. It moves opaque buffers and reports who sent them.
//! - **Origin-Stamped**: Every inbound message carries the sender's origin, and
//!   every outbound message names the origin it may be delivered to. A window
//!   whose origin does not match drops the message without telling anyone.

/// The wildcard target origin: deliver regardless of the receiver's origin.
pub const ANY_ORIGIN: &str = "*";

/// Errors that occur at the messaging layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The remote window is gone or the channel was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The operation timed out before a response was received.
    #[error("request timed out")]
    Timeout,
    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A message received from the remote window.
#[derive(Debug, Clone)]
pub struct Posted {
    /// Origin of the sending window, as reported by the platform.
    pub origin: String,
    pub data: Vec<u8>,
}

/// A handle to one remote window.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Posts a payload to the remote window.
    ///
    /// # invariants
    /// - Delivery only happens if `target_origin` is [`ANY_ORIGIN`] or equals
    ///   the remote window's origin; otherwise the payload is dropped and
    ///   this still returns `Ok`.
    /// - Must not interpret the payload content.
    async fn post(&self, data: &[u8], target_origin: &str) -> Result<()>;

    /// Registers a new listener for messages from the remote window.
    ///
    /// Every listener sees every message that arrives after it was
    /// registered, the way every `message` event listener on a window does.
    fn listen(&self) -> Box<dyn Listener>;
}

/// One subscription to a window's inbound messages.
#[async_trait::async_trait]
pub trait Listener: Send + 'static {
    /// Waits for the next message from the remote window.
    ///
    /// Returns `Ok(None)` once the remote window has gone away.
    async fn recv(&mut self) -> Result<Option<Posted>>;
}
