use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A single request travelling over the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub address: String,
    pub action: String,
    pub body: Value,
}

impl Envelope {
    pub fn new(address: impl Into<String>, action: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            action: action.into(),
            body,
        }
    }
}

/// Category of a failed call. Preserved across every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A payload could not be decoded.
    Decode,
    /// The document store rejected or failed the operation.
    Store,
    /// Nothing is registered at the address.
    NoHandler,
    /// The consumer does not know the action.
    UnknownAction,
    /// The channel to a remote bus failed.
    Transport,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Decode => "decode",
            FailureKind::Store => "store",
            FailureKind::NoHandler => "no handler",
            FailureKind::UnknownAction => "unknown action",
            FailureKind::Transport => "transport",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Typed failure delivered as the reply to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct ServiceFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ServiceFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Store, message)
    }

    pub fn no_handler(address: &str) -> Self {
        Self::new(
            FailureKind::NoHandler,
            format!("No handlers for address {}", address),
        )
    }

    pub fn unknown_action(address: &str, action: &str) -> Self {
        Self::new(
            FailureKind::UnknownAction,
            format!("Invalid action '{}' for address {}", action, address),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

/// Outcome of one envelope.
pub type Reply = Result<Value, ServiceFailure>;

/// Sends envelopes and resolves their replies.
///
/// Implementations must not block the calling task; no ordering is promised
/// between independent calls.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Reply;
}
