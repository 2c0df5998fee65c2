//! Out-of-band maintenance channel: exists, create, destroy
//!
//! Maintenance operations reuse the low-level ack machinery: each sends a
//! single internal message and synchronously awaits its deferred result, the
//! `Received`-equivalent ack. No event subscription is involved; operations
//! resolve or fail purely on the presence of a transport error.

use super::connection::PassthroughConnection;
use super::message::PassthroughMessage;
use crate::invocation::error::{TransportError, TransportResult};

/// Maintenance handle on a named, versioned entity
#[derive(Clone)]
pub struct MaintenanceRef {
    connection: PassthroughConnection,
    entity_type: String,
    entity_name: String,
    entity_version: u64,
}

impl MaintenanceRef {
    pub(crate) fn new(
        connection: PassthroughConnection,
        entity_type: String,
        entity_name: String,
        entity_version: u64,
    ) -> Self {
        Self {
            connection,
            entity_type,
            entity_name,
            entity_version,
        }
    }

    /// Target entity type identifier
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Target entity instance name
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Whether the entity exists at this ref's version
    ///
    /// A missing entity is a normal, expected outcome and returns `false`;
    /// every other transport error propagates rather than being swallowed.
    pub fn exists(&self) -> TransportResult<bool> {
        let result = self.connection.send_and_wait(PassthroughMessage::Exists {
            entity_type: self.entity_type.clone(),
            entity_name: self.entity_name.clone(),
            entity_version: self.entity_version,
        });
        match result {
            Ok(_) => Ok(true),
            Err(TransportError::EntityNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create the entity with an opaque, already-encoded configuration
    ///
    /// An already-existing entity is a distinct, non-recoverable error
    /// ([`TransportError::EntityAlreadyExists`]); the existing record is left
    /// untouched.
    pub fn create(&self, configuration: &[u8]) -> TransportResult<()> {
        tracing::debug!(
            entity_type = %self.entity_type,
            entity_name = %self.entity_name,
            "creating entity"
        );
        self.connection
            .send_and_wait(PassthroughMessage::Create {
                entity_type: self.entity_type.clone(),
                entity_name: self.entity_name.clone(),
                entity_version: self.entity_version,
                configuration: configuration.to_vec(),
            })
            .map(|_| ())
    }

    /// Destroy the entity; missing entities propagate as not-found
    pub fn destroy(&self) -> TransportResult<()> {
        tracing::debug!(
            entity_type = %self.entity_type,
            entity_name = %self.entity_name,
            "destroying entity"
        );
        self.connection
            .send_and_wait(PassthroughMessage::Destroy {
                entity_type: self.entity_type.clone(),
                entity_name: self.entity_name.clone(),
            })
            .map(|_| ())
    }
}
