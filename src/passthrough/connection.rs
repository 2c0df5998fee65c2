//! The passthrough connection: dispatch, ack waits, and the server thread
//!
//! The client half of the reference transport. `dispatch` encodes the frozen
//! request, enqueues it for the server thread, and blocks the caller only
//! for the low-level acks the request flagged; everything later arrives on
//! the callback from the server thread. Maintenance and fetch traffic share
//! the same queue through fire-and-forget internal messages with deferred
//! byte-payload results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::invocation::builder::{
    ClientInstanceId, InvocationBuilder, InvocationCallback, InvocationRequest, Transport,
};
use crate::invocation::error::{InvokeError, InvokeResult, TransportError, TransportResult};
use crate::invocation::event::Subscription;
use crate::invocation::future::Deferred;
use crate::monitoring::{ClientDescriptor, EntityFetchRecord, MonitoringCollector};

use super::maintenance::MaintenanceRef;
use super::message::PassthroughMessage;
use super::server::{AckCell, MessageHandler, ReplicationGate, ServerRequest, ServerState};

/// In-process reference transport for a single client connection
///
/// Cheap to clone; all clones share one server thread and entity table.
/// Dropping the last clone (or calling [`close`](Self::close)) shuts the
/// queue down and joins the server thread after in-flight requests drain.
#[derive(Clone)]
pub struct PassthroughConnection {
    shared: Arc<ConnectionShared>,
}

struct ConnectionShared {
    client_identifier: String,
    sender: Mutex<Option<Sender<ServerRequest>>>,
    server: Arc<ServerState>,
    server_thread: Mutex<Option<JoinHandle<()>>>,
    collector: Option<Arc<dyn MonitoringCollector>>,
    fetched: Mutex<HashMap<u64, EntityFetchRecord>>,
    next_descriptor: AtomicU64,
}

impl PassthroughConnection {
    /// Open a connection with a fresh in-process server
    pub fn new(client_identifier: impl Into<String>) -> Self {
        Self::build(client_identifier.into(), None)
    }

    /// Open a connection that reports fetch/release to a monitoring collector
    pub fn with_collector(
        client_identifier: impl Into<String>,
        collector: Arc<dyn MonitoringCollector>,
    ) -> Self {
        Self::build(client_identifier.into(), Some(collector))
    }

    fn build(client_identifier: String, collector: Option<Arc<dyn MonitoringCollector>>) -> Self {
        let server = Arc::new(ServerState::new());
        let (sender, receiver) = mpsc::channel();
        let server_thread = {
            let server = Arc::clone(&server);
            thread::Builder::new()
                .name(format!("passthrough-{client_identifier}"))
                .spawn(move || serve(receiver, server))
                .expect("spawn passthrough server thread")
        };
        tracing::debug!(client = %client_identifier, "passthrough connection opened");
        Self {
            shared: Arc::new(ConnectionShared {
                client_identifier,
                sender: Mutex::new(Some(sender)),
                server,
                server_thread: Mutex::new(Some(server_thread)),
                collector,
                fetched: Mutex::new(HashMap::new()),
                next_descriptor: AtomicU64::new(1),
            }),
        }
    }

    /// Identifier of this client connection
    pub fn client_identifier(&self) -> &str {
        &self.shared.client_identifier
    }

    /// Stage an invocation against a named entity
    pub fn invocation_builder(
        &self,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
        entity_version: u64,
    ) -> InvocationBuilder {
        InvocationBuilder::new(
            Arc::new(self.clone()),
            entity_type,
            entity_name,
            entity_version,
            ClientInstanceId::new(),
        )
    }

    /// Obtain the out-of-band maintenance channel for a named entity
    pub fn maintenance_ref(
        &self,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
        entity_version: u64,
    ) -> MaintenanceRef {
        MaintenanceRef::new(
            self.clone(),
            entity_type.into(),
            entity_name.into(),
            entity_version,
        )
    }

    /// Register the server-side message handler for an entity type
    pub fn register_entity_handler(&self, entity_type: impl Into<String>, handler: MessageHandler) {
        self.shared.server.register_handler(entity_type, handler);
    }

    /// The modeled replication sync point, closable by tests
    pub fn replication_gate(&self) -> ReplicationGate {
        self.shared.server.gate()
    }

    /// Fetch a live reference to a named entity
    ///
    /// Issues an in-process descriptor, records the fetch, and notifies the
    /// collector. Fails if the entity is missing or at a different version.
    pub fn fetch(
        &self,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
        entity_version: u64,
    ) -> TransportResult<EntityFetchRecord> {
        let entity_type = entity_type.into();
        let entity_name = entity_name.into();
        self.send_and_wait(PassthroughMessage::Fetch {
            entity_type: entity_type.clone(),
            entity_name: entity_name.clone(),
            entity_version,
            client_identifier: self.shared.client_identifier.clone(),
        })?;
        let descriptor =
            ClientDescriptor::new(self.shared.next_descriptor.fetch_add(1, Ordering::Relaxed));
        let record = EntityFetchRecord::new(
            self.shared.client_identifier.clone(),
            format!("{entity_type}/{entity_name}"),
            Some(descriptor),
        );
        self.shared
            .fetched
            .lock()
            .insert(descriptor.id(), record.clone());
        if let Some(collector) = &self.shared.collector {
            collector.entity_fetched(&record);
        }
        Ok(record)
    }

    /// Release a previously fetched reference
    pub fn release(&self, record: &EntityFetchRecord) -> TransportResult<()> {
        let descriptor = match record.client_descriptor {
            Some(descriptor) => descriptor,
            None => return Ok(()), // nothing live to release
        };
        let (entity_type, entity_name) = record
            .entity_identifier
            .split_once('/')
            .map(|(entity_type, entity_name)| (entity_type.to_string(), entity_name.to_string()))
            .unwrap_or_else(|| (String::new(), record.entity_identifier.clone()));
        self.send_and_wait(PassthroughMessage::Release {
            entity_type,
            entity_name,
            client_identifier: record.client_identifier.clone(),
        })?;
        self.shared.fetched.lock().remove(&descriptor.id());
        if let Some(collector) = &self.shared.collector {
            collector.entity_released(record);
        }
        Ok(())
    }

    /// Close the connection: stop accepting requests, drain, join the server
    ///
    /// Any clone may close; subsequent dispatches fail synchronously.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    /// Send one internal message, returning its deferred byte-payload result
    pub(crate) fn send_internal(
        &self,
        message: PassthroughMessage,
    ) -> TransportResult<Deferred<TransportResult<Vec<u8>>>> {
        let bytes = message.encode()?;
        let (deferred, completer) = Deferred::pair();
        let sender = self.shared.sender.lock();
        let sender = sender.as_ref().ok_or(TransportError::ConnectionClosed)?;
        sender
            .send(ServerRequest::Internal { bytes, completer })
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(deferred)
    }

    /// Send one internal message and await its `Received`-equivalent ack
    pub(crate) fn send_and_wait(&self, message: PassthroughMessage) -> TransportResult<Vec<u8>> {
        let deferred = self.send_internal(message)?;
        match deferred.wait() {
            Some(result) => result,
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

impl Transport for PassthroughConnection {
    fn dispatch(
        &self,
        request: InvocationRequest,
        callback: Box<dyn InvocationCallback>,
        subscription: Subscription,
    ) -> InvokeResult<()> {
        let wait_for_received = request.wait_for_received();
        let wait_for_completed = request.wait_for_completed();
        let bytes = PassthroughMessage::invoke(&request).encode()?;
        let acks = Arc::new(AckCell::new());
        {
            let sender = self.shared.sender.lock();
            let sender = sender.as_ref().ok_or(InvokeError::ConnectionClosed)?;
            sender
                .send(ServerRequest::Invocation {
                    bytes,
                    acks: Arc::clone(&acks),
                    callback,
                    subscription,
                })
                .map_err(|_| InvokeError::ConnectionClosed)?;
        }
        if wait_for_received {
            acks.wait_received();
        }
        if wait_for_completed {
            acks.wait_completed();
        }
        Ok(())
    }
}

impl ConnectionShared {
    fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        let thread = self.server_thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::warn!(
                    client = %self.client_identifier,
                    "passthrough server thread panicked during shutdown"
                );
            }
        }
        tracing::debug!(client = %self.client_identifier, "passthrough connection closed");
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Server thread main loop: drain the queue until every sender is gone
fn serve(receiver: Receiver<ServerRequest>, server: Arc<ServerState>) {
    while let Ok(request) = receiver.recv() {
        match request {
            ServerRequest::Invocation {
                bytes,
                acks,
                callback,
                subscription,
            } => server.run_invocation(bytes, &acks, callback, subscription),
            ServerRequest::Internal { bytes, completer } => {
                completer.resolve(server.process_internal(&bytes));
            }
        }
    }
}
