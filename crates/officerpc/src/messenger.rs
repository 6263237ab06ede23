//! # Window Messenger
//!
//! Puts an origin allow-list in front of a remote window's [`Transport`].
//!
//! Inbound messages from origins outside the list, and messages that are not
//! protocol envelopes, are dropped here. Outbound messages are addressed to
//! the narrowest origin known: the concrete origin of the first accepted
//! inbound message, else the single origin the list names, else `*`.
//!
//! Each messenger registers its own listener on the window, so several
//! messengers (one per channel) can share a window and all see its traffic.

use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::frame::Envelope;
use crate::transport::ANY_ORIGIN;
use crate::transport::Listener;
use crate::transport::Transport;

/// Which origins may talk to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// No restriction (`*` was listed).
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Resolves caller configuration: no list means only our own origin, a list
    /// containing `*` means anyone. Otherwise the list is taken as given.
    pub fn resolve(list: Option<Vec<String>>, local_origin: &str) -> Self {
        match list {
            None => Self::List(vec![local_origin.to_string()]),
            Some(list) if list.iter().any(|o| o == ANY_ORIGIN) => Self::Any,
            Some(list) => Self::List(list),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(list) => list.iter().any(|o| o == origin),
        }
    }

    fn single(&self) -> Option<&str> {
        match self {
            Self::List(list) if list.len() == 1 => Some(list[0].as_str()),
            _ => None,
        }
    }
}

pub struct WindowMessenger {
    remote: Arc<dyn Transport>,
    listener: Mutex<Box<dyn Listener>>,
    allowed: AllowedOrigins,
    concrete_origin: OnceLock<String>,
}

impl WindowMessenger {
    /// Starts listening on `remote` right away; messages that arrive before
    /// this call are not seen.
    pub fn new(remote: Arc<dyn Transport>, allowed: AllowedOrigins) -> Self {
        Self {
            listener: Mutex::new(remote.listen()),
            remote,
            allowed,
            concrete_origin: OnceLock::new(),
        }
    }

    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let data = envelope.encode()?;
        self.remote.post(&data, self.target_origin()).await?;
        Ok(())
    }

    /// Waits for the next envelope from an allowed origin.
    ///
    /// Returns `Ok(None)` once the remote window is gone.
    pub async fn recv(&self) -> Result<Option<Envelope>> {
        let mut listener = self.listener.lock().await;
        loop {
            let Some(posted) = listener.recv().await? else {
                return Ok(None);
            };

            if !self.allowed.allows(&posted.origin) {
                tracing::debug!(origin = %posted.origin, "ignoring message from disallowed origin");
                continue;
            }

            let Some(envelope) = Envelope::decode(&posted.data) else {
                tracing::trace!(origin = %posted.origin, "ignoring foreign message");
                continue;
            };

            let _ = self.concrete_origin.set(posted.origin);
            return Ok(Some(envelope));
        }
    }

    fn target_origin(&self) -> &str {
        if let Some(origin) = self.concrete_origin.get() {
            return origin;
        }
        self.allowed.single().unwrap_or(ANY_ORIGIN)
    }
}
