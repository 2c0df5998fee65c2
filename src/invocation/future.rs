//! Single-assignment deferred values and the invocation future
//!
//! [`Deferred`] is the blocking promise/future pair the protocol layers on
//! top of callback delivery: the completer half is written exactly once by
//! the event-handling side, the waiter half blocks until resolution. The
//! maintenance channel reuses the same cell for its deferred byte-payload
//! results.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::error::InvocationFailure;

/// Outcome carried by an [`InvocationFuture`]
pub type InvocationOutcome = Result<Option<Vec<u8>>, InvocationFailure>;

enum Slot<T> {
    Pending,
    Ready(T),
    /// The completer was dropped without resolving
    Abandoned,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Waiter half of a single-assignment deferred value
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

/// Completer half of a single-assignment deferred value
///
/// Resolving consumes the completer, so a second assignment cannot compile.
/// Dropping an unresolved completer marks the deferred value abandoned.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
    resolved: bool,
}

impl<T> Deferred<T> {
    /// Create a connected waiter/completer pair
    pub fn pair() -> (Deferred<T>, Completer<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        });
        (
            Deferred {
                shared: Arc::clone(&shared),
            },
            Completer {
                shared,
                resolved: false,
            },
        )
    }

    /// Block until resolution; `None` if the completer was dropped unresolved
    pub fn wait(self) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Pending) {
                Slot::Ready(value) => return Some(value),
                Slot::Abandoned => {
                    *slot = Slot::Abandoned;
                    return None;
                }
                Slot::Pending => {}
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// True once the value has been resolved (not merely abandoned)
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Ready(_))
    }

    /// Block up to `timeout`; `Err(self)` if still pending afterwards
    pub fn wait_for(self, timeout: Duration) -> Result<Option<T>, Deferred<T>> {
        {
            let mut slot = self.shared.slot.lock();
            loop {
                match std::mem::replace(&mut *slot, Slot::Pending) {
                    Slot::Ready(value) => return Ok(Some(value)),
                    Slot::Abandoned => {
                        *slot = Slot::Abandoned;
                        return Ok(None);
                    }
                    Slot::Pending => {}
                }
                if self.shared.ready.wait_for(&mut slot, timeout).timed_out() {
                    break;
                }
            }
        }
        Err(self)
    }
}

impl<T> Completer<T> {
    /// Resolve the deferred value, waking any waiter
    pub fn resolve(mut self, value: T) {
        let mut slot = self.shared.slot.lock();
        *slot = Slot::Ready(value);
        self.resolved = true;
        self.shared.ready.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.resolved {
            let mut slot = self.shared.slot.lock();
            if matches!(*slot, Slot::Pending) {
                *slot = Slot::Abandoned;
                self.shared.ready.notify_all();
            }
        }
    }
}

/// Deferred result of a dispatched invocation
///
/// Produced by [`InvocationBuilder::invoke`] and
/// [`InvocationBuilder::invoke_and_retire`]; resolves with the entity's
/// optional response payload, or rejects with the carried failure. Exactly
/// one resolution or rejection occurs, mirroring terminal-event exclusivity.
///
/// [`InvocationBuilder::invoke`]: super::builder::InvocationBuilder::invoke
/// [`InvocationBuilder::invoke_and_retire`]: super::builder::InvocationBuilder::invoke_and_retire
pub struct InvocationFuture {
    inner: Deferred<InvocationOutcome>,
}

impl std::fmt::Debug for InvocationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationFuture").finish_non_exhaustive()
    }
}

impl InvocationFuture {
    pub(crate) fn pair() -> (Self, Completer<InvocationOutcome>) {
        let (inner, completer) = Deferred::pair();
        (Self { inner }, completer)
    }

    /// Block until the invocation reaches its terminal event
    ///
    /// An invocation whose callback was torn down before any terminal event
    /// (the connection shut down mid-flight) rejects with a transport
    /// failure rather than blocking forever.
    pub fn wait(self) -> InvocationOutcome {
        match self.inner.wait() {
            Some(outcome) => outcome,
            None => Err(InvocationFailure::transport(anyhow::anyhow!(
                "invocation abandoned before a terminal event"
            ))),
        }
    }

    /// True once the terminal event has fired and the outcome is available
    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }

    /// Block up to `timeout`; `Err(self)` if no terminal event arrived in time
    pub fn wait_for(self, timeout: Duration) -> Result<InvocationOutcome, Self> {
        match self.inner.wait_for(timeout) {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Ok(Err(InvocationFailure::transport(anyhow::anyhow!(
                "invocation abandoned before a terminal event"
            )))),
            Err(inner) => Err(Self { inner }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn deferred_resolves_across_threads() {
        let (deferred, completer) = Deferred::pair();
        let handle = thread::spawn(move || {
            completer.resolve(42u32);
        });
        assert_eq!(deferred.wait(), Some(42));
        handle.join().expect("completer thread");
    }

    #[test]
    fn dropped_completer_marks_abandoned() {
        let (deferred, completer) = Deferred::<u32>::pair();
        drop(completer);
        assert!(!deferred.is_resolved());
        assert_eq!(deferred.wait(), None);
    }

    #[test]
    fn wait_for_times_out_while_pending() {
        let (deferred, completer) = Deferred::<u32>::pair();
        let deferred = match deferred.wait_for(Duration::from_millis(10)) {
            Err(deferred) => deferred,
            Ok(_) => panic!("pending deferred should time out"),
        };
        completer.resolve(7);
        assert_eq!(deferred.wait(), Some(7));
    }

    #[test]
    fn abandoned_invocation_future_rejects_with_transport_failure() {
        let (future, completer) = InvocationFuture::pair();
        drop(completer);
        let failure = future.wait().expect_err("abandoned future must reject");
        assert_eq!(failure.kind(), crate::invocation::error::FailureKind::Transport);
    }
}
