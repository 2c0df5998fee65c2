//! Reference in-process transport
//!
//! A passthrough connection stands in for the networked, replicated server:
//! it accepts configured invocations, honors the synchronous ack-wait flags,
//! and drives the full event sequence from its own server thread in the
//! exact order a conforming production transport must reproduce. A
//! successful invocation ends in `Retired` when the subscription asks for
//! retirement, `Complete` otherwise; the two never both fire. The same
//! connection exposes the out-of-band maintenance channel
//! (exists/create/destroy) and fetch bookkeeping.

mod connection;
mod maintenance;
mod message;
mod server;

pub use connection::PassthroughConnection;
pub use maintenance::MaintenanceRef;
pub use server::{MessageHandler, ReplicationGate};
