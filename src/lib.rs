//! Entity Client – the client-side invocation protocol of a clustered entity RPC framework
//!
//! This crate implements the client-observable invocation contract:
//! - A closed lifecycle event protocol with subscription-filtered callback delivery
//! - A one-shot, consuming invocation builder (reuse after invoke cannot compile)
//! - Future-style adapters projecting the event stream onto a single deferred result
//! - A reference in-process (passthrough) transport reproducing the ordering and
//!   ack-wait guarantees a networked, replicated transport must provide
//! - An out-of-band maintenance channel (exists/create/destroy) over the same
//!   ack machinery
//! - The entity-fetch record consumed by monitoring
//!
//! Message and configuration payloads are opaque bytes: encoding to and from typed
//! entity messages belongs to an external codec, and the server-side execution
//! engine is out of scope.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Invocation lifecycle: events, builder, errors, and future adapters
pub mod invocation;

/// Entity-fetch records emitted to monitoring on fetch/release
pub mod monitoring;

/// Reference in-process transport and maintenance channel
pub mod passthrough;

// Re-export key types for convenience
pub use invocation::builder::{
    ClientInstanceId, InvocationBuilder, InvocationCallback, InvocationRequest, Transport,
};
pub use invocation::error::{
    FailureKind, InvocationFailure, InvokeError, InvokeResult, TransportError, TransportResult,
};
pub use invocation::event::{
    deliver, EventKind, EventSequence, InvocationEvent, ProtocolViolation, Subscription,
};
pub use invocation::future::InvocationFuture;
pub use monitoring::{ClientDescriptor, EntityFetchRecord, MonitoringCollector};
pub use passthrough::{MaintenanceRef, PassthroughConnection, ReplicationGate};

/// Current version of the entity client crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
