//! Integration tests for the invocation lifecycle
//!
//! Exercises the full path from builder through the passthrough transport:
//! event ordering, subscription filtering, the future adapters, failure
//! delivery, and the ack-wait/replication timing guarantees.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use entity_client::{
    EventKind, FailureKind, InvocationEvent, InvokeError, PassthroughConnection, Subscription,
};

const EVENT_WAIT: Duration = Duration::from_secs(5);
const QUIET_WAIT: Duration = Duration::from_millis(200);

/// What a test callback records for one delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    kind: EventKind,
    payload: Option<Vec<u8>>,
    failure_kind: Option<FailureKind>,
}

fn observe(event: InvocationEvent) -> Observed {
    let kind = event.kind();
    let (payload, failure_kind) = match event {
        InvocationEvent::Result(payload) => (Some(payload), None),
        InvocationEvent::Failure(failure) => (None, Some(failure.kind())),
        _ => (None, None),
    };
    Observed {
        kind,
        payload,
        failure_kind,
    }
}

fn recording_callback() -> (impl FnMut(InvocationEvent) + Send, Receiver<Observed>) {
    let (tx, rx): (Sender<Observed>, Receiver<Observed>) = mpsc::channel();
    (
        move |event: InvocationEvent| {
            tx.send(observe(event)).expect("record event");
        },
        rx,
    )
}

fn connect_with_entity() -> PassthroughConnection {
    let connection = PassthroughConnection::new("lifecycle-client");
    connection
        .maintenance_ref("cache", "users", 1)
        .create(b"config")
        .expect("create entity");
    connection
}

fn drain_until_terminal(rx: &Receiver<Observed>) -> Vec<Observed> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv_timeout(EVENT_WAIT).expect("event before timeout");
        let terminal = event.kind.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[test]
fn full_sequence_is_delivered_in_order() {
    let connection = connect_with_entity();
    let (callback, rx) = recording_callback();
    let subscription = Subscription::of(&[
        EventKind::Sent,
        EventKind::Received,
        EventKind::Result,
        EventKind::Failure,
        EventKind::Complete,
    ]);

    connection
        .invocation_builder("cache", "users", 1)
        .message(b"ping".to_vec())
        .invoke_with(callback, subscription)
        .expect("invoke");

    let events = drain_until_terminal(&rx);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Sent,
            EventKind::Received,
            EventKind::Result,
            EventKind::Complete,
        ]
    );
    // The unregistered entity type echoes its payload.
    assert_eq!(events[2].payload.as_deref(), Some(b"ping".as_slice()));
    // Nothing follows the terminal event.
    assert!(matches!(
        rx.recv_timeout(QUIET_WAIT),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn unsubscribed_kinds_never_reach_the_callback() {
    let connection = connect_with_entity();
    let (callback, rx) = recording_callback();
    let subscription = Subscription::of(&[EventKind::Result, EventKind::Complete]);

    connection
        .invocation_builder("cache", "users", 1)
        .message(b"ping".to_vec())
        .invoke_with(callback, subscription)
        .expect("invoke");

    let events = drain_until_terminal(&rx);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Result, EventKind::Complete]);
}

#[test]
fn retirement_subscription_selects_the_retired_terminal() {
    let connection = connect_with_entity();
    let (callback, rx) = recording_callback();

    connection
        .invocation_builder("cache", "users", 1)
        .message(b"ping".to_vec())
        .invoke_with(callback, Subscription::retirement())
        .expect("invoke");

    let events = drain_until_terminal(&rx);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Result, EventKind::Retired]);
}

#[test]
fn invoke_future_resolves_with_the_buffered_result() {
    let connection = connect_with_entity();
    let outcome = connection
        .invocation_builder("cache", "users", 1)
        .message(b"echo-me".to_vec())
        .invoke()
        .expect("dispatch")
        .wait()
        .expect("invocation succeeds");
    assert_eq!(outcome.as_deref(), Some(b"echo-me".as_slice()));
}

#[test]
fn invoke_future_resolves_absent_when_the_entity_produces_no_result() {
    let connection = connect_with_entity();
    connection.register_entity_handler("cache", Arc::new(|_payload: &[u8]| Ok(None)));

    let outcome = connection
        .invocation_builder("cache", "users", 1)
        .message(b"fire-and-forget".to_vec())
        .invoke()
        .expect("dispatch")
        .wait()
        .expect("invocation succeeds");
    assert_eq!(outcome, None);
}

#[test]
fn invoke_and_retire_resolves_after_retirement() {
    let connection = connect_with_entity();
    let outcome = connection
        .invocation_builder("cache", "users", 1)
        .message(b"payload".to_vec())
        .invoke_and_retire()
        .expect("dispatch")
        .wait()
        .expect("invocation succeeds");
    assert_eq!(outcome.as_deref(), Some(b"payload".as_slice()));
}

#[test]
fn entity_failure_rejects_the_future_and_discards_the_buffer() {
    let connection = connect_with_entity();
    connection.register_entity_handler(
        "cache",
        Arc::new(|_payload: &[u8]| Err(anyhow::anyhow!("entity exploded"))),
    );

    let failure = connection
        .invocation_builder("cache", "users", 1)
        .message(b"boom".to_vec())
        .invoke()
        .expect("dispatch")
        .wait()
        .expect_err("invocation must fail");
    assert_eq!(failure.kind(), FailureKind::EntityFailure);
    // The original cause is preserved, not wrapped away.
    assert!(failure.cause().to_string().contains("entity exploded"));
}

#[test]
fn failure_is_terminal_and_exclusive() {
    let connection = connect_with_entity();
    connection.register_entity_handler(
        "cache",
        Arc::new(|_payload: &[u8]| Err(anyhow::anyhow!("nope"))),
    );
    let (callback, rx) = recording_callback();

    connection
        .invocation_builder("cache", "users", 1)
        .message(b"boom".to_vec())
        .invoke_with(callback, Subscription::all())
        .expect("invoke");

    let events = drain_until_terminal(&rx);
    let terminals = events.iter().filter(|e| e.kind.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Failure));
    assert!(matches!(
        rx.recv_timeout(QUIET_WAIT),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn invocation_against_missing_entity_fails_with_entity_not_found() {
    let connection = PassthroughConnection::new("lifecycle-client");
    let failure = connection
        .invocation_builder("cache", "nobody-home", 1)
        .message(b"hello".to_vec())
        .invoke()
        .expect("dispatch is accepted before the server-side lookup")
        .wait()
        .expect_err("invocation must fail");
    assert_eq!(failure.kind(), FailureKind::EntityNotFound);
}

#[test]
fn missing_message_fails_fast_before_dispatch() {
    let connection = connect_with_entity();
    let err = connection
        .invocation_builder("cache", "users", 1)
        .invoke()
        .expect_err("missing message must fail synchronously");
    assert!(matches!(err, InvokeError::MissingMessage));
}

#[test]
fn dispatch_after_close_fails_synchronously() {
    let connection = connect_with_entity();
    connection.close();
    let err = connection
        .invocation_builder("cache", "users", 1)
        .message(b"late".to_vec())
        .invoke()
        .expect_err("closed connection must reject dispatch");
    assert!(matches!(err, InvokeError::ConnectionClosed));
}

#[test]
fn ack_received_returns_before_the_gated_terminal() {
    let connection = connect_with_entity();
    let gate = connection.replication_gate();
    gate.close();

    let (callback, rx) = recording_callback();
    let subscription = Subscription::of(&[
        EventKind::Sent,
        EventKind::Received,
        EventKind::Result,
        EventKind::Failure,
        EventKind::Complete,
    ]);

    // wait-for-received=true, wait-for-completed=false, replicate=true:
    // invoke returns once the Received ack fires, while the terminal stays
    // held at the replication sync point.
    connection
        .invocation_builder("cache", "users", 1)
        .message(b"replicated".to_vec())
        .ack_received()
        .invoke_with(callback, subscription)
        .expect("invoke returns after the received ack");

    for expected in [EventKind::Sent, EventKind::Received, EventKind::Result] {
        let event = rx.recv_timeout(EVENT_WAIT).expect("pre-terminal event");
        assert_eq!(event.kind, expected);
    }
    assert!(
        matches!(rx.recv_timeout(QUIET_WAIT), Err(RecvTimeoutError::Timeout)),
        "terminal must not fire before the replication sync point"
    );

    gate.open();
    let terminal = rx.recv_timeout(EVENT_WAIT).expect("terminal event");
    assert_eq!(terminal.kind, EventKind::Complete);
}

#[test]
fn future_resolution_is_gated_on_the_terminal_event() {
    let connection = connect_with_entity();
    let gate = connection.replication_gate();
    gate.close();

    let future = connection
        .invocation_builder("cache", "users", 1)
        .message(b"held".to_vec())
        .invoke()
        .expect("dispatch");

    // The result is buffered by the adapter, but the deferred value may not
    // resolve until Complete fires, which the gate is holding back.
    let future = match future.wait_for(QUIET_WAIT) {
        Err(future) => future,
        Ok(_) => panic!("future must not resolve before the replication sync point"),
    };
    assert!(!future.is_resolved());

    gate.open();
    let outcome = future.wait().expect("invocation succeeds");
    assert_eq!(outcome.as_deref(), Some(b"held".as_slice()));
}

#[test]
fn unreplicated_invocation_ignores_the_gate() {
    let connection = connect_with_entity();
    let gate = connection.replication_gate();
    gate.close();

    let outcome = connection
        .invocation_builder("cache", "users", 1)
        .message(b"local-only".to_vec())
        .replicate(false)
        .invoke()
        .expect("dispatch")
        .wait()
        .expect("invocation succeeds without passing the gate");
    assert_eq!(outcome.as_deref(), Some(b"local-only".as_slice()));

    gate.open(); // let the connection shut down cleanly
}

#[test]
fn ack_completed_blocks_until_processing_finished() {
    let connection = connect_with_entity();
    let (callback, rx) = recording_callback();

    connection
        .invocation_builder("cache", "users", 1)
        .message(b"ping".to_vec())
        .ack_completed()
        .invoke_with(
            callback,
            Subscription::of(&[EventKind::Result, EventKind::Complete]),
        )
        .expect("invoke");

    // By the time invoke returns the handler has run; the result is already
    // queued for delivery.
    let event = rx.recv_timeout(EVENT_WAIT).expect("result event");
    assert_eq!(event.kind, EventKind::Result);
    let event = rx.recv_timeout(EVENT_WAIT).expect("terminal event");
    assert_eq!(event.kind, EventKind::Complete);
}
