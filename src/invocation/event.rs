//! Lifecycle events, subscriptions, and the per-invocation ordering machine
//!
//! Every invocation produces a strictly ordered sequence of lifecycle events:
//! `Sent → [Received] → [Result] → (Complete | Failure | Retired)`. The kinds
//! form a closed enumeration; a caller subscribes to a subset at invoke time
//! and never observes events outside that subset. [`EventSequence`] asserts
//! the ordering and terminal-exclusivity invariants on the delivery path.

use std::fmt;
use thiserror::Error;

use super::error::InvocationFailure;

/// The closed set of lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The invocation left the client and entered the transport
    Sent,
    /// The server (or transport) acknowledged receipt
    Received,
    /// The entity produced a response payload (zero or one per invocation)
    Result,
    /// The invocation failed; no further events follow
    Failure,
    /// The invocation completed successfully; no further events follow
    Complete,
    /// The invocation completed and all server-side resources were released
    Retired,
}

impl EventKind {
    /// All event kinds, in lifecycle order
    pub const ALL: [EventKind; 6] = [
        EventKind::Sent,
        EventKind::Received,
        EventKind::Result,
        EventKind::Failure,
        EventKind::Complete,
        EventKind::Retired,
    ];

    /// True for the kinds that end an invocation's event stream
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::Failure | EventKind::Complete | EventKind::Retired
        )
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Sent => "sent",
            EventKind::Received => "received",
            EventKind::Result => "result",
            EventKind::Failure => "failure",
            EventKind::Complete => "complete",
            EventKind::Retired => "retired",
        };
        write!(f, "{name}")
    }
}

/// A fixed set of subscribed event kinds, checked on every delivery
///
/// Membership is a constant-time bit test. The set is frozen at the call to
/// `invoke`; events whose kind is not in the set are dropped, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subscription(u8);

impl Subscription {
    /// The empty subscription: every event is dropped
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Subscription containing every event kind
    pub const fn all() -> Self {
        Self::of(&EventKind::ALL)
    }

    /// Build a subscription from a list of kinds
    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Return this subscription with one more kind included
    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Constant-time membership test
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// The subset used by [`InvocationBuilder::invoke`]: resolve on `Complete`
    ///
    /// [`InvocationBuilder::invoke`]: super::builder::InvocationBuilder::invoke
    pub const fn completion() -> Self {
        Self::of(&[EventKind::Result, EventKind::Failure, EventKind::Complete])
    }

    /// The subset used by [`InvocationBuilder::invoke_and_retire`]: resolve on `Retired`
    ///
    /// [`InvocationBuilder::invoke_and_retire`]: super::builder::InvocationBuilder::invoke_and_retire
    pub const fn retirement() -> Self {
        Self::of(&[EventKind::Result, EventKind::Failure, EventKind::Retired])
    }
}

/// A single lifecycle event delivered to an invocation callback
#[derive(Debug)]
pub enum InvocationEvent {
    /// The invocation left the client
    Sent,
    /// The server acknowledged receipt
    Received,
    /// The entity's response payload, already encoded
    Result(Vec<u8>),
    /// The invocation failed; terminal
    Failure(InvocationFailure),
    /// The invocation completed successfully; terminal
    Complete,
    /// The invocation completed and server-side resources were released; terminal
    Retired,
}

impl InvocationEvent {
    /// The kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            InvocationEvent::Sent => EventKind::Sent,
            InvocationEvent::Received => EventKind::Received,
            InvocationEvent::Result(_) => EventKind::Result,
            InvocationEvent::Failure(_) => EventKind::Failure,
            InvocationEvent::Complete => EventKind::Complete,
            InvocationEvent::Retired => EventKind::Retired,
        }
    }
}

/// Pure subscription filter: pass the event through, or drop it silently
pub fn deliver(event: InvocationEvent, subscription: Subscription) -> Option<InvocationEvent> {
    if subscription.contains(event.kind()) {
        Some(event)
    } else {
        None
    }
}

/// Violation of the per-invocation event ordering contract
///
/// A correct transport never produces one of these; the delivery path treats
/// any occurrence as a fatal internal assertion, never as a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// An event was observed after a terminal event already fired
    #[error("event '{event}' observed after terminal event '{terminal}'")]
    AfterTerminal {
        /// The terminal event that ended the stream
        terminal: EventKind,
        /// The offending late event
        event: EventKind,
    },

    /// A kind that fires at most once was observed twice
    #[error("duplicate event '{0}'")]
    Duplicate(EventKind),

    /// An event was observed before the stream's `Sent` event
    #[error("event '{0}' observed before 'sent'")]
    BeforeSent(EventKind),
}

/// Tracks one invocation's progress through the lifecycle state machine
///
/// `Created → Sent → {Received?} → {Result?} → Terminal{Complete|Failure|Retired}`.
/// `Created` is never externally observable; `Sent` is the first observable
/// event, and nothing follows a terminal.
#[derive(Debug, Default)]
pub struct EventSequence {
    sent: bool,
    received: bool,
    result: bool,
    terminal: Option<EventKind>,
}

impl EventSequence {
    /// Fresh sequence in the `Created` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed event, rejecting any ordering violation
    pub fn observe(&mut self, kind: EventKind) -> Result<(), ProtocolViolation> {
        if let Some(terminal) = self.terminal {
            return Err(ProtocolViolation::AfterTerminal {
                terminal,
                event: kind,
            });
        }
        match kind {
            EventKind::Sent => {
                if self.sent {
                    return Err(ProtocolViolation::Duplicate(kind));
                }
                self.sent = true;
            }
            EventKind::Received => {
                if !self.sent {
                    return Err(ProtocolViolation::BeforeSent(kind));
                }
                if self.received {
                    return Err(ProtocolViolation::Duplicate(kind));
                }
                self.received = true;
            }
            EventKind::Result => {
                if !self.sent {
                    return Err(ProtocolViolation::BeforeSent(kind));
                }
                if self.result {
                    return Err(ProtocolViolation::Duplicate(kind));
                }
                self.result = true;
            }
            EventKind::Failure | EventKind::Complete | EventKind::Retired => {
                if !self.sent {
                    return Err(ProtocolViolation::BeforeSent(kind));
                }
                self.terminal = Some(kind);
            }
        }
        Ok(())
    }

    /// True once a terminal event has been observed
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }
}
