//! Host notification queue.
//!
//! The host calls into an [`EventSink`] from its own event dispatch (undo hooks).
//! Delivery is a non-blocking `try_send` into a bounded channel; a full queue
//! drops the event and bumps a counter instead of stalling the host. The
//! orchestrator owns the [`EventQueue`] and drains it at the start of every
//! command.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::host::HostEvent;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Sending half handed to the host.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<HostEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Delivers an event without blocking.
    ///
    /// Returns false if the event was dropped.
    pub fn notify(&self, event: HostEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?event, "host event queue full; event dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Receiving half owned by the session.
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<HostEvent>,
    rx: Receiver<HostEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` pending events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a sink feeding this queue.
    #[must_use]
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Removes every pending event and returns them in arrival order.
    pub fn drain(&self) -> Vec<HostEvent> {
        self.rx.try_iter().collect()
    }

    /// Number of events dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_and_counts() {
        let queue = EventQueue::new(2);
        let sink = queue.sink();
        assert!(sink.notify(HostEvent::UndoOccurred));
        assert!(sink.notify(HostEvent::UndoOccurred));
        assert!(!sink.notify(HostEvent::UndoOccurred));
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.drain().is_empty());
        assert!(sink.notify(HostEvent::UndoOccurred));
    }
}
