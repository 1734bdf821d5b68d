//! # Bounded status-event queue.
//!
//! [`StatusQueue`] is the producer side used by every camera loop;
//! [`StatusStream`] is the single consumer side handed to the host.
//!
//! ## Architecture
//! ```text
//! Producers (many):                       Consumer (one):
//!   StreamActor cam1 ──┐
//!   StreamActor cam2 ──┼──► StatusQueue ──► [bounded mpsc] ──► StatusStream::recv()/drain()
//!   StreamActor camN ──┘    (try_send)                          (host reporter)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` uses `try_send`; a supervisory loop never waits on a reporter.
//! - **Overflow**: when full, the **newest** event is dropped and a warning is logged.
//! - **Closure**: the queue closes when the engine and every loop have released their producers,
//!   which only happens during engine shutdown; `recv()` then returns `None`.

use tokio::sync::mpsc;

use super::event::StatusEvent;

/// Producer side of the status queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StatusQueue {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusQueue {
    /// Creates a queue with the given capacity (minimum 1).
    pub fn channel(capacity: usize) -> (StatusQueue, StatusStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (StatusQueue { tx }, StatusStream { rx })
    }

    /// Pushes an event without waiting.
    ///
    /// Returns `false` if the event was dropped (queue full or consumer gone).
    pub fn publish(&self, ev: StatusEvent) -> bool {
        match self.tx.try_send(ev) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(
                    camera_id = %ev.camera_id,
                    status = %ev.status,
                    "status queue full, dropping update"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer side of the status queue.
#[derive(Debug)]
pub struct StatusStream {
    rx: mpsc::Receiver<StatusEvent>,
}

impl StatusStream {
    /// Waits for the next event; `None` once the engine has shut down and the queue is empty.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    /// Takes every event currently buffered.
    pub fn drain(&mut self) -> Vec<StatusEvent> {
        let mut out = Vec::with_capacity(self.rx.len());
        while let Ok(ev) = self.rx.try_recv() {
            out.push(ev);
        }
        out
    }
}
