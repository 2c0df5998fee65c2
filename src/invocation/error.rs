//! Error types for the invocation protocol
//!
//! Per-subsystem thiserror enums with `Result` aliases. Synchronous errors (`InvokeError`, `TransportError`) are
//! raised directly to the caller; everything that happens after dispatch
//! flows through the event protocol as an [`InvocationFailure`] carried in a
//! `Failure` event.

use std::fmt;
use thiserror::Error;

/// Errors raised synchronously by `invoke`, before any ack wait could begin
///
/// Once the transport has accepted the request, failures are surfaced
/// exclusively as `Failure` events so that callers blocked on low-level acks
/// are never stranded by a race between return-from-invoke and the failure.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The builder was invoked without a message payload
    #[error("invocation has no message payload")]
    MissingMessage,

    /// The connection is closed; nothing was dispatched
    #[error("connection is closed")]
    ConnectionClosed,

    /// The request could not be encoded for the internal dispatch path
    #[error("request encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Convenience result alias for invoke operations
pub type InvokeResult<T> = std::result::Result<T, InvokeError>;

/// Transport-level errors on the maintenance and fetch paths
#[derive(Debug, Error)]
pub enum TransportError {
    /// The named entity does not exist on the server
    #[error("entity {entity_type}/{entity_name} not found")]
    EntityNotFound {
        /// Target entity type identifier
        entity_type: String,
        /// Target entity instance name
        entity_name: String,
    },

    /// Creation was attempted for a name that is already taken
    ///
    /// Non-recoverable for that create call; no duplicate record is left behind.
    #[error("entity {entity_type}/{entity_name} already exists")]
    EntityAlreadyExists {
        /// Target entity type identifier
        entity_type: String,
        /// Target entity instance name
        entity_name: String,
    },

    /// The entity exists at a different version than the client requested
    #[error("entity {entity_type}/{entity_name} is version {actual}, client expected {expected}")]
    EntityVersionMismatch {
        /// Target entity type identifier
        entity_type: String,
        /// Target entity instance name
        entity_name: String,
        /// Version the client asked for
        expected: u64,
        /// Version recorded on the server
        actual: u64,
    },

    /// The connection is closed
    #[error("connection is closed")]
    ConnectionClosed,

    /// Internal message encoding or decoding failed
    #[error("internal message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Closed classification of post-dispatch invocation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The target entity does not exist
    EntityNotFound,
    /// The server-side entity raised an error while producing a result
    EntityFailure,
    /// The transport itself failed after accepting the request
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::EntityNotFound => "entity-not-found",
            FailureKind::EntityFailure => "entity-failure",
            FailureKind::Transport => "transport",
        };
        write!(f, "{name}")
    }
}

/// The payload of a `Failure` event
///
/// Carries a closed [`FailureKind`] plus the original cause, preserved as an
/// opaque error value for diagnostics rather than wrapped into a new type.
#[derive(Debug, Error)]
#[error("{kind} failure: {cause}")]
pub struct InvocationFailure {
    kind: FailureKind,
    cause: anyhow::Error,
}

impl InvocationFailure {
    /// Build a failure from a kind and its original cause
    pub fn new(kind: FailureKind, cause: anyhow::Error) -> Self {
        Self { kind, cause }
    }

    /// An entity-not-found failure
    pub fn entity_not_found(cause: anyhow::Error) -> Self {
        Self::new(FailureKind::EntityNotFound, cause)
    }

    /// A failure raised by the server-side entity's own execution
    pub fn entity(cause: anyhow::Error) -> Self {
        Self::new(FailureKind::EntityFailure, cause)
    }

    /// A post-dispatch transport failure
    pub fn transport(cause: anyhow::Error) -> Self {
        Self::new(FailureKind::Transport, cause)
    }

    /// The failure classification
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The preserved original cause
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Consume the failure, yielding the original cause
    pub fn into_cause(self) -> anyhow::Error {
        self.cause
    }
}
