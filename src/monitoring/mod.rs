//! Entity-fetch records and the monitoring collector seam
//!
//! A fetch record ties a connected client to a live reference on a named
//! entity. The live descriptor has no meaning outside the process that
//! created it, so it is excluded from the serialized form and treated as
//! absent after deserialization; only the identity pair persists. The
//! collector protocol itself is defined elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque in-process handle for one fetched entity reference
///
/// Deliberately not serializable: a descriptor never crosses a
/// serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientDescriptor(u64);

impl ClientDescriptor {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Numeric identity of the descriptor within this process
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "descriptor#{}", self.0)
    }
}

/// The connection between a client and an entity, created by a fetch
///
/// Created when a client successfully fetches a reference to an entity,
/// destroyed when the client releases it or disconnects. Equality and
/// hashing combine all three fields; two records with absent descriptors
/// compare equal when their identifiers match, which is the state every
/// record is in after deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityFetchRecord {
    /// Identifier of the fetching client connection
    pub client_identifier: String,
    /// Identifier of the fetched entity
    pub entity_identifier: String,
    /// Live in-process reference; absent after deserialization
    #[serde(skip)]
    pub client_descriptor: Option<ClientDescriptor>,
}

impl EntityFetchRecord {
    /// Build a record for a successful fetch
    pub fn new(
        client_identifier: impl Into<String>,
        entity_identifier: impl Into<String>,
        client_descriptor: Option<ClientDescriptor>,
    ) -> Self {
        Self {
            client_identifier: client_identifier.into(),
            entity_identifier: entity_identifier.into(),
            client_descriptor,
        }
    }
}

impl fmt::Display for EntityFetchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntityFetchRecord{{client={}, entity={}, descriptor=",
            self.client_identifier, self.entity_identifier
        )?;
        match &self.client_descriptor {
            Some(descriptor) => write!(f, "{descriptor}}}"),
            None => write!(f, "absent}}"),
        }
    }
}

/// Sink for fetch/release notifications
///
/// The reference transport calls this on successful fetch and release; what
/// the collector does with the records is outside this crate.
pub trait MonitoringCollector: Send + Sync {
    /// A client fetched a reference to an entity
    fn entity_fetched(&self, record: &EntityFetchRecord);

    /// A client released a previously fetched reference
    fn entity_released(&self, record: &EntityFetchRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_combines_all_three_fields() {
        let a = EntityFetchRecord::new("client-1", "cache/users", Some(ClientDescriptor::new(7)));
        let b = EntityFetchRecord::new("client-1", "cache/users", Some(ClientDescriptor::new(7)));
        let c = EntityFetchRecord::new("client-1", "cache/users", Some(ClientDescriptor::new(8)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            a,
            EntityFetchRecord::new("client-2", "cache/users", Some(ClientDescriptor::new(7)))
        );
    }

    #[test]
    fn absent_descriptors_compare_equal_on_matching_identity() {
        let a = EntityFetchRecord::new("client-1", "cache/users", None);
        let b = EntityFetchRecord::new("client-1", "cache/users", None);
        let with_descriptor =
            EntityFetchRecord::new("client-1", "cache/users", Some(ClientDescriptor::new(1)));
        assert_eq!(a, b);
        assert_ne!(a, with_descriptor);
    }

    #[test]
    fn descriptor_is_dropped_by_serialization() {
        let record =
            EntityFetchRecord::new("client-1", "cache/users", Some(ClientDescriptor::new(3)));
        let json = serde_json::to_string(&record).expect("serialize record");
        assert!(!json.contains("descriptor"), "descriptor must not persist: {json}");
        let restored: EntityFetchRecord = serde_json::from_str(&json).expect("deserialize record");
        assert_eq!(restored.client_descriptor, None);
        assert_eq!(restored.client_identifier, record.client_identifier);
        assert_eq!(restored.entity_identifier, record.entity_identifier);
    }

    #[test]
    fn display_renders_absent_descriptor() {
        let record = EntityFetchRecord::new("client-1", "cache/users", None);
        let rendered = record.to_string();
        assert!(rendered.contains("client-1"));
        assert!(rendered.contains("absent"));
    }
}
