//! Camera status events and their bounded queue.
//!
//! ## Contents
//! - [`StreamStatus`], [`StatusEvent`] lifecycle state and transition record
//! - [`StatusQueue`], [`StatusStream`] producer/consumer halves of the bounded queue
//!
//! ## Quick reference
//! - **Publishers**: `StreamActor` (one per camera).
//! - **Consumers**: whatever the host wires to the [`StatusStream`] returned by
//!   [`StreamSupervisor::new`](crate::StreamSupervisor::new).

mod event;
mod queue;

pub use event::{StatusEvent, StreamStatus};
pub use queue::{StatusQueue, StatusStream};
