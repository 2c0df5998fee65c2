//! Invocation staging: frozen requests, the consuming builder, and the transport seam
//!
//! The builder accumulates invocation parameters and hands a frozen
//! [`InvocationRequest`] to a [`Transport`] on `invoke`. Each setter consumes
//! and returns the builder, and every `invoke` flavor takes ownership, so a
//! second invoke on the same builder is a move error at compile time rather
//! than a runtime check.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{InvokeError, InvokeResult};
use super::event::{InvocationEvent, Subscription};
use super::future::{Completer, InvocationFuture, InvocationOutcome};

/// Identifier of one client-side entity endpoint instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientInstanceId(pub Uuid);

impl ClientInstanceId {
    /// Create a new random client instance id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback receiving the subscription-filtered lifecycle events of one invocation
///
/// Implemented for any `FnMut(InvocationEvent) + Send` closure. Events arrive
/// strictly in lifecycle order, from the transport's own execution context.
pub trait InvocationCallback: Send {
    /// Deliver one lifecycle event
    fn on_event(&mut self, event: InvocationEvent);
}

impl<F> InvocationCallback for F
where
    F: FnMut(InvocationEvent) + Send,
{
    fn on_event(&mut self, event: InvocationEvent) {
        self(event)
    }
}

/// A fully configured invocation, immutable once dispatched
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    entity_type: String,
    entity_name: String,
    entity_version: u64,
    client_instance: ClientInstanceId,
    payload: Vec<u8>,
    replicate: bool,
    wait_for_received: bool,
    wait_for_completed: bool,
}

impl InvocationRequest {
    /// Target entity type identifier
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Target entity instance name
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Protocol/entity version the client was built against
    pub fn entity_version(&self) -> u64 {
        self.entity_version
    }

    /// Client instance identifier
    pub fn client_instance(&self) -> ClientInstanceId {
        self.client_instance
    }

    /// Opaque message payload, already encoded by the external codec
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the invocation must be replicated to passive servers
    pub fn replicate(&self) -> bool {
        self.replicate
    }

    /// Whether `invoke` blocks until the `Received` ack
    pub fn wait_for_received(&self) -> bool {
        self.wait_for_received
    }

    /// Whether `invoke` blocks until the `Completed` ack (implies `Received`)
    pub fn wait_for_completed(&self) -> bool {
        self.wait_for_completed
    }
}

/// The seam between the invocation protocol and a concrete transport
///
/// The in-process [`PassthroughConnection`] is the reference implementation;
/// a production networked, replicated transport must honor the identical
/// event ordering and ack semantics.
///
/// [`PassthroughConnection`]: crate::passthrough::PassthroughConnection
pub trait Transport: Send + Sync {
    /// Accept a frozen request together with its callback and subscription
    ///
    /// Must block the caller only for the low-level acks the request flags,
    /// then drive the filtered event sequence asynchronously. Errors may be
    /// returned here only while the failure is known before any ack wait
    /// could begin; afterwards they must arrive as `Failure` events.
    fn dispatch(
        &self,
        request: InvocationRequest,
        callback: Box<dyn InvocationCallback>,
        subscription: Subscription,
    ) -> InvokeResult<()>;
}

/// One-shot builder for a client-to-entity invocation
///
/// Obtained from a connection's entity endpoint. Setters are fluent and
/// consuming; `invoke_with`, [`invoke`](Self::invoke), and
/// [`invoke_and_retire`](Self::invoke_and_retire) consume the builder.
/// Omitting [`replicate`](Self::replicate) means the message is replicated.
pub struct InvocationBuilder {
    transport: Arc<dyn Transport>,
    entity_type: String,
    entity_name: String,
    entity_version: u64,
    client_instance: ClientInstanceId,
    payload: Option<Vec<u8>>,
    replicate: bool,
    wait_for_received: bool,
    wait_for_completed: bool,
}

impl InvocationBuilder {
    /// Stage a new invocation against the given transport and entity
    pub fn new(
        transport: Arc<dyn Transport>,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
        entity_version: u64,
        client_instance: ClientInstanceId,
    ) -> Self {
        Self {
            transport,
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            entity_version,
            client_instance,
            payload: None,
            replicate: true,
            wait_for_received: false,
            wait_for_completed: false,
        }
    }

    /// Set the opaque, already-encoded message payload
    pub fn message(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set whether the invocation is replicated to passive servers
    pub fn replicate(mut self, requires_replication: bool) -> Self {
        self.replicate = requires_replication;
        self
    }

    /// Block `invoke` until the transport's `Received` ack
    pub fn ack_received(mut self) -> Self {
        self.wait_for_received = true;
        self
    }

    /// Block `invoke` until the transport's `Completed` ack
    pub fn ack_completed(mut self) -> Self {
        self.wait_for_completed = true;
        self
    }

    /// Dispatch the staged invocation with an explicit callback and subscription
    ///
    /// Freezes the request and hands it to the transport. Returns once the
    /// transport has honored the requested synchronous ack waits; delivery of
    /// later events continues asynchronously. Fails fast on a missing message
    /// or a connection already known to be unusable.
    pub fn invoke_with(
        self,
        callback: impl InvocationCallback + 'static,
        subscription: Subscription,
    ) -> InvokeResult<()> {
        let Self {
            transport,
            entity_type,
            entity_name,
            entity_version,
            client_instance,
            payload,
            replicate,
            wait_for_received,
            wait_for_completed,
        } = self;
        let payload = payload.ok_or(InvokeError::MissingMessage)?;
        let request = InvocationRequest {
            entity_type,
            entity_name,
            entity_version,
            client_instance,
            payload,
            replicate,
            wait_for_received,
            wait_for_completed,
        };
        tracing::debug!(
            entity_type = %request.entity_type,
            entity_name = %request.entity_name,
            replicate = request.replicate,
            wait_for_received = request.wait_for_received,
            wait_for_completed = request.wait_for_completed,
            "dispatching invocation"
        );
        transport.dispatch(request, Box::new(callback), subscription)
    }

    /// Dispatch and adapt the event stream into a deferred value resolved on `Complete`
    ///
    /// Subscribes to `{Result, Failure, Complete}`. A `Result` payload is
    /// buffered and released when `Complete` fires; an invocation whose
    /// message type legitimately produces no result resolves to `None`.
    /// `Failure` rejects the future and discards any buffered result.
    pub fn invoke(self) -> InvokeResult<InvocationFuture> {
        self.invoke_deferred(Subscription::completion())
    }

    /// Like [`invoke`](Self::invoke), but the deferred value resolves on `Retired`
    ///
    /// Use when the caller must know all server-side resources tied to the
    /// invocation have been released before proceeding, e.g. before
    /// destroying the entity.
    pub fn invoke_and_retire(self) -> InvokeResult<InvocationFuture> {
        self.invoke_deferred(Subscription::retirement())
    }

    fn invoke_deferred(self, subscription: Subscription) -> InvokeResult<InvocationFuture> {
        let (future, completer) = InvocationFuture::pair();
        let mut buffered: Option<Vec<u8>> = None;
        let mut completer: Option<Completer<InvocationOutcome>> = Some(completer);
        self.invoke_with(
            move |event: InvocationEvent| match event {
                InvocationEvent::Result(payload) => {
                    buffered = Some(payload);
                }
                InvocationEvent::Complete | InvocationEvent::Retired => {
                    if let Some(completer) = completer.take() {
                        completer.resolve(Ok(buffered.take()));
                    }
                }
                InvocationEvent::Failure(failure) => {
                    if let Some(completer) = completer.take() {
                        completer.resolve(Err(failure));
                    }
                }
                InvocationEvent::Sent | InvocationEvent::Received => {}
            },
            subscription,
        )?;
        Ok(future)
    }
}

impl fmt::Debug for InvocationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationBuilder")
            .field("entity_type", &self.entity_type)
            .field("entity_name", &self.entity_name)
            .field("entity_version", &self.entity_version)
            .field("client_instance", &self.client_instance)
            .field("has_message", &self.payload.is_some())
            .field("replicate", &self.replicate)
            .field("wait_for_received", &self.wait_for_received)
            .field("wait_for_completed", &self.wait_for_completed)
            .finish()
    }
}
