//! In-process server state: entity table, handlers, acks, and event emission
//!
//! The server half of the passthrough connection. Holds the named entity
//! table driven by the maintenance channel, the pluggable per-type message
//! handlers standing in for the real execution engine, and the ack/
//! replication synchronization points. All per-invocation event emission
//! funnels through [`ServerState::run_invocation`], which asserts the
//! lifecycle ordering on every event it produces.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::invocation::builder::InvocationCallback;
use crate::invocation::error::{InvocationFailure, TransportError, TransportResult};
use crate::invocation::event::{deliver, EventKind, EventSequence, InvocationEvent, Subscription};
use crate::invocation::future::Completer;

use super::message::PassthroughMessage;

/// Entity message handler registered per entity type
///
/// Stands in for the server-side execution engine: given the opaque request
/// payload, produce an optional opaque response payload or fail. Types with
/// no registered handler echo their payload.
pub type MessageHandler = Arc<dyn Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync>;

/// Low-level ack synchronization cell shared between the dispatching caller
/// and the server thread. `completed` implies `received`.
pub(crate) struct AckCell {
    state: Mutex<AckState>,
    advanced: Condvar,
}

#[derive(Default)]
struct AckState {
    received: bool,
    completed: bool,
}

impl AckCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AckState::default()),
            advanced: Condvar::new(),
        }
    }

    pub(crate) fn mark_received(&self) {
        let mut state = self.state.lock();
        state.received = true;
        self.advanced.notify_all();
    }

    pub(crate) fn mark_completed(&self) {
        let mut state = self.state.lock();
        state.received = true;
        state.completed = true;
        self.advanced.notify_all();
    }

    pub(crate) fn wait_received(&self) {
        let mut state = self.state.lock();
        while !state.received {
            self.advanced.wait(&mut state);
        }
    }

    pub(crate) fn wait_completed(&self) {
        let mut state = self.state.lock();
        while !state.completed {
            self.advanced.wait(&mut state);
        }
    }
}

/// The modeled replication synchronization point
///
/// A replicated invocation must pass the gate after its `Result` event and
/// before its terminal event. The gate is open by default; tests close it to
/// deterministically hold terminal events back while earlier events flow.
#[derive(Clone)]
pub struct ReplicationGate {
    shared: Arc<GateShared>,
}

struct GateShared {
    open: Mutex<bool>,
    changed: Condvar,
}

impl ReplicationGate {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(GateShared {
                open: Mutex::new(true),
                changed: Condvar::new(),
            }),
        }
    }

    /// Hold replicated invocations at the sync point
    pub fn close(&self) {
        *self.shared.open.lock() = false;
    }

    /// Let held invocations proceed to their terminal event
    pub fn open(&self) {
        let mut open = self.shared.open.lock();
        *open = true;
        self.shared.changed.notify_all();
    }

    fn pass(&self) {
        let mut open = self.shared.open.lock();
        while !*open {
            self.shared.changed.wait(&mut open);
        }
    }
}

/// One request crossing into the server thread
pub(crate) enum ServerRequest {
    /// A regular entity invocation with its ack cell and event callback
    Invocation {
        bytes: Vec<u8>,
        acks: Arc<AckCell>,
        callback: Box<dyn InvocationCallback>,
        subscription: Subscription,
    },
    /// A fire-and-forget internal message with a deferred byte-payload result
    Internal {
        bytes: Vec<u8>,
        completer: Completer<TransportResult<Vec<u8>>>,
    },
}

type EntityKey = (String, String);

struct EntityRecord {
    version: u64,
    configuration: Vec<u8>,
}

/// Shared server-side state of one passthrough connection
pub(crate) struct ServerState {
    entities: RwLock<HashMap<EntityKey, EntityRecord>>,
    handlers: RwLock<HashMap<String, MessageHandler>>,
    gate: ReplicationGate,
    retired: AtomicU64,
}

impl ServerState {
    pub(crate) fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            gate: ReplicationGate::new(),
            retired: AtomicU64::new(0),
        }
    }

    pub(crate) fn gate(&self) -> ReplicationGate {
        self.gate.clone()
    }

    pub(crate) fn register_handler(&self, entity_type: impl Into<String>, handler: MessageHandler) {
        self.handlers.write().insert(entity_type.into(), handler);
    }

    /// Drive one invocation's full event sequence through the subscription filter
    ///
    /// The received/completed ack points always fire, even when processing
    /// fails, so ack waiters are never stranded by a failure race.
    pub(crate) fn run_invocation(
        &self,
        bytes: Vec<u8>,
        acks: &AckCell,
        mut callback: Box<dyn InvocationCallback>,
        subscription: Subscription,
    ) {
        let mut sequence = EventSequence::new();
        emit(
            &mut sequence,
            &mut *callback,
            subscription,
            InvocationEvent::Sent,
        );
        acks.mark_received();
        emit(
            &mut sequence,
            &mut *callback,
            subscription,
            InvocationEvent::Received,
        );

        let outcome = self.execute_invocation(bytes);
        acks.mark_completed();

        match outcome {
            Ok((response, replicate)) => {
                if let Some(payload) = response {
                    emit(
                        &mut sequence,
                        &mut *callback,
                        subscription,
                        InvocationEvent::Result(payload),
                    );
                }
                if replicate {
                    self.gate.pass();
                }
                if subscription.contains(EventKind::Retired) {
                    let retired = self.retired.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!(retired, "invocation resources released");
                    emit(
                        &mut sequence,
                        &mut *callback,
                        subscription,
                        InvocationEvent::Retired,
                    );
                } else {
                    emit(
                        &mut sequence,
                        &mut *callback,
                        subscription,
                        InvocationEvent::Complete,
                    );
                }
            }
            Err(failure) => {
                tracing::debug!(kind = %failure.kind(), "invocation failed");
                emit(
                    &mut sequence,
                    &mut *callback,
                    subscription,
                    InvocationEvent::Failure(failure),
                );
            }
        }
        debug_assert!(sequence.is_terminated());
    }

    /// Decode and run the entity half of an invocation
    ///
    /// Returns the optional response payload plus the replicate flag, or the
    /// failure destined for the `Failure` event.
    fn execute_invocation(
        &self,
        bytes: Vec<u8>,
    ) -> Result<(Option<Vec<u8>>, bool), InvocationFailure> {
        let message = PassthroughMessage::decode(&bytes)
            .map_err(|err| InvocationFailure::transport(anyhow::Error::new(err)))?;
        let (entity_type, entity_name, payload, replicate) = match message {
            PassthroughMessage::Invoke {
                entity_type,
                entity_name,
                payload,
                replicate,
                ..
            } => (entity_type, entity_name, payload, replicate),
            _ => {
                return Err(InvocationFailure::transport(anyhow::anyhow!(
                    "non-invoke message on the invocation path"
                )))
            }
        };

        if !self
            .entities
            .read()
            .contains_key(&(entity_type.clone(), entity_name.clone()))
        {
            return Err(InvocationFailure::entity_not_found(anyhow::Error::new(
                TransportError::EntityNotFound {
                    entity_type,
                    entity_name,
                },
            )));
        }

        let handler = self.handlers.read().get(&entity_type).cloned();
        let result = match handler {
            Some(handler) => (*handler)(&payload),
            None => Ok(Some(payload)),
        };
        match result {
            Ok(response) => Ok((response, replicate)),
            Err(cause) => Err(InvocationFailure::entity(cause)),
        }
    }

    /// Process one maintenance/fetch message, producing its deferred payload
    pub(crate) fn process_internal(&self, bytes: &[u8]) -> TransportResult<Vec<u8>> {
        let message = PassthroughMessage::decode(bytes)?;
        match message {
            PassthroughMessage::Exists {
                entity_type,
                entity_name,
                entity_version,
            } => {
                self.lookup(&entity_type, &entity_name, entity_version)?;
                Ok(Vec::new())
            }
            PassthroughMessage::Create {
                entity_type,
                entity_name,
                entity_version,
                configuration,
            } => {
                let mut entities = self.entities.write();
                match entities.entry((entity_type.clone(), entity_name.clone())) {
                    Entry::Occupied(_) => Err(TransportError::EntityAlreadyExists {
                        entity_type,
                        entity_name,
                    }),
                    Entry::Vacant(vacant) => {
                        vacant.insert(EntityRecord {
                            version: entity_version,
                            configuration,
                        });
                        tracing::debug!(%entity_type, %entity_name, entity_version, "entity created");
                        Ok(Vec::new())
                    }
                }
            }
            PassthroughMessage::Destroy {
                entity_type,
                entity_name,
            } => {
                let mut entities = self.entities.write();
                if entities
                    .remove(&(entity_type.clone(), entity_name.clone()))
                    .is_none()
                {
                    return Err(TransportError::EntityNotFound {
                        entity_type,
                        entity_name,
                    });
                }
                tracing::debug!(%entity_type, %entity_name, "entity destroyed");
                Ok(Vec::new())
            }
            PassthroughMessage::Fetch {
                entity_type,
                entity_name,
                entity_version,
                client_identifier,
            } => {
                let configuration = self.lookup(&entity_type, &entity_name, entity_version)?;
                tracing::debug!(%entity_type, %entity_name, %client_identifier, "entity fetched");
                Ok(configuration)
            }
            PassthroughMessage::Release {
                entity_type,
                entity_name,
                client_identifier,
            } => {
                tracing::debug!(%entity_type, %entity_name, %client_identifier, "entity released");
                Ok(Vec::new())
            }
            PassthroughMessage::Invoke { .. } => {
                unreachable!("invoke messages take the invocation path")
            }
        }
    }

    /// Existence + version check shared by exists and fetch
    fn lookup(
        &self,
        entity_type: &str,
        entity_name: &str,
        entity_version: u64,
    ) -> TransportResult<Vec<u8>> {
        let entities = self.entities.read();
        let record = entities
            .get(&(entity_type.to_string(), entity_name.to_string()))
            .ok_or_else(|| TransportError::EntityNotFound {
                entity_type: entity_type.to_string(),
                entity_name: entity_name.to_string(),
            })?;
        if record.version != entity_version {
            return Err(TransportError::EntityVersionMismatch {
                entity_type: entity_type.to_string(),
                entity_name: entity_name.to_string(),
                expected: entity_version,
                actual: record.version,
            });
        }
        Ok(record.configuration.clone())
    }
}

/// Assert the lifecycle ordering, then deliver through the subscription filter
fn emit(
    sequence: &mut EventSequence,
    callback: &mut dyn InvocationCallback,
    subscription: Subscription,
    event: InvocationEvent,
) {
    let kind = event.kind();
    if let Err(violation) = sequence.observe(kind) {
        panic!("fatal protocol violation in passthrough delivery: {violation}");
    }
    if let Some(event) = deliver(event, subscription) {
        callback.on_event(event);
    }
    tracing::trace!(%kind, "lifecycle event emitted");
}
