//! # Protocol Frames
//!
//! Defines the envelope every message on a channel travels in, and the five
//! frame kinds: the `SYN`/`ACK` handshake, `CALL`/`REPLY` pairs, and `DESTROY`.
//!
//! ## Invariants
//! - **Panic Safety**: Decoding never panics; anything that is not one of our
//!   envelopes decodes to `None` and is ignored, since a window receives
//!   messages from every script that can reach it.
//! - **Channel Scoping**: The envelope names its channel. Filtering on it is the
//!   binding's job, not the codec's.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Failure;
use crate::error::Result;

/// Marks a message as belonging to this protocol at all.
pub const NAMESPACE: &str = "officerpc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub namespace: String,
    pub channel: String,
    #[serde(flatten)]
    pub frame: Frame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Announces a participant; answered with `Ack`.
    Syn { participant: String },
    Ack { participant: String },
    Call {
        id: u64,
        method: String,
        args: Vec<Value>,
    },
    Reply {
        id: u64,
        result: std::result::Result<Value, Failure>,
    },
    /// The sender is tearing the connection down.
    Destroy,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, frame: Frame) -> Self {
        Self {
            namespace: NAMESPACE.to_string(),
            channel: channel.into(),
            frame,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a posted payload, or `None` if it is not one of ours.
    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(data)
            .ok()
            .filter(|envelope| envelope.namespace == NAMESPACE)
    }
}
