//! Invocation lifecycle and public client API
//!
//! This module carries the shared vocabulary of the invocation protocol (the
//! closed event enumeration and subscription filter), the one-shot builder
//! that stages and dispatches an invocation, the error taxonomy, and the
//! future adapters that project the event stream onto a single deferred value.

pub mod builder;
pub mod error;
pub mod event;
pub mod future;

pub use builder::{InvocationBuilder, InvocationCallback, InvocationRequest, Transport};
pub use error::{InvocationFailure, InvokeError, TransportError};
pub use event::{EventKind, InvocationEvent, Subscription};
pub use future::InvocationFuture;
