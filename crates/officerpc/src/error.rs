//! # Error Definitions
//!
//! Failures the connection layer can surface, grouped by what a caller does
//! about them:
//!
//! - **Environment**: no remote window is reachable. Fatal for the bootstrap.
//! - **Protocol usage**: the channel was used out of order, or a call named a
//!   method nobody implements. Fails that one call, never the connection.
//! - **Transport**: whatever the messaging collaborator rejected, unchanged.
//! - **Remote**: the other side ran the call and answered with a [`Failure`].
//!
//! A call from an unregistered client is not an error at all; the dispatcher
//! answers it with `Ok(None)`.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::transport::TransportError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No parent or opener window is reachable from this window.
    #[error("client window is not accessible: {0}")]
    ClientNotAccessible(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The remote side executed the call and reported a failure.
    #[error("remote call failed: {0}")]
    Remote(Failure),
    /// A method implementation failed on its own terms.
    #[error("{0}")]
    Application(String),
    /// The connection was destroyed or the remote window went away.
    #[error("connection closed")]
    ConnectionClosed,
    /// A payload could not be turned into (or out of) JSON.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// True for misuse of the protocol, whether detected here or reported
    /// back by the remote side.
    pub fn is_protocol_usage(&self) -> bool {
        match self {
            Self::Protocol(_) => true,
            Self::Remote(failure) => failure.kind.is_protocol_usage(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Misuse of the connection protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// An invocation arrived before the handshake stored the client handle.
    #[error("unexpected invoke before client connected")]
    InvokeBeforeConnected,
    /// The generated method table has no entry for this name.
    #[error("method '{0}' is not implemented")]
    MethodNotFound(String),
    /// The positional arguments of a protocol method did not decode.
    #[error("bad arguments for '{method}': {details}")]
    BadArguments { method: String, details: String },
    /// A retired client identifier was offered for registration again.
    #[error("client id '{0}' was retired and cannot be registered again")]
    RetiredClient(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The error side of a reply, as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvokeBeforeConnected,
    MethodNotFound,
    BadArguments,
    RetiredClient,
    /// The method implementation itself failed.
    Application,
    /// Anything else (transport or codec trouble on the serving side).
    Internal,
}

impl FailureKind {
    pub fn is_protocol_usage(self) -> bool {
        matches!(
            self,
            Self::InvokeBeforeConnected | Self::MethodNotFound | Self::BadArguments | Self::RetiredClient
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::InvokeBeforeConnected => "invoke before connected",
            Self::MethodNotFound => "method not found",
            Self::BadArguments => "bad arguments",
            Self::RetiredClient => "retired client",
            Self::Application => "application error",
            Self::Internal => "internal error",
        };
        f.write_str(tag)
    }
}

impl From<&Error> for Failure {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::Protocol(ProtocolError::InvokeBeforeConnected) => FailureKind::InvokeBeforeConnected,
            Error::Protocol(ProtocolError::MethodNotFound(_)) => FailureKind::MethodNotFound,
            Error::Protocol(ProtocolError::BadArguments { .. }) => FailureKind::BadArguments,
            Error::Protocol(ProtocolError::RetiredClient(_)) => FailureKind::RetiredClient,
            // relay what a nested remote call reported
            Error::Remote(failure) => return failure.clone(),
            Error::Application(_) => FailureKind::Application,
            Error::ClientNotAccessible(_)
            | Error::Transport(_)
            | Error::ConnectionClosed
            | Error::Codec(_) => FailureKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_keep_their_kind_on_the_wire() {
        let err = Error::from(ProtocolError::MethodNotFound("doesNotExist".into()));
        let failure = Failure::from(&err);

        assert_eq!(failure.kind, FailureKind::MethodNotFound);
        assert!(failure.message.contains("doesNotExist"));
        assert!(Error::Remote(failure).is_protocol_usage());
    }

    #[test]
    fn nested_remote_failures_are_relayed_verbatim() {
        let inner = Failure::new(FailureKind::Application, "boom");
        let relayed = Failure::from(&Error::Remote(inner.clone()));
        assert_eq!(relayed, inner);
    }

    #[test]
    fn application_errors_are_not_protocol_usage() {
        let err = Error::Application("disk full".into());
        assert!(!err.is_protocol_usage());
        assert_eq!(Failure::from(&err).kind, FailureKind::Application);
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_value(Failure::new(FailureKind::InvokeBeforeConnected, "x")).unwrap();
        assert_eq!(json["kind"], "invoke_before_connected");
    }
}
