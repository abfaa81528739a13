//! Cross-thread event marshaling.
//!
//! Native worker threads hold an [`EventSender`] (reached through the
//! instance registry) and push [`Event`]s without blocking. The owning bridge
//! holds the [`EventQueue`] and drains it on the host loop thread once per
//! cycle, so every reaction to an event runs there and never concurrently
//! with a lifecycle call.
//!
//! A drain takes exactly the events that were queued when it started. Events
//! pushed while the drain is being processed wait for the next cycle.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

/// Lifecycle event reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// End of stream reached
    Finish,
    /// Native runtime failure (decode, demux, sink, setup)
    Error(String),
}

/// Producer side of an [`EventQueue`]. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Enqueues `event`. Never blocks.
    ///
    /// A send after the queue is gone is dropped; the instance is being torn
    /// down and the event no longer matters.
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            trace!("event queue closed, dropping event");
        }
    }
}

/// FIFO queue consumed only by the owning bridge.
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Creates an empty unbounded queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Returns a producer handle for native callbacks.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Enqueues from the owning thread (e.g. errors raised by synchronous calls).
    pub fn push(&self, event: Event) {
        // Cannot fail: the queue holds its own receiver.
        let _ = self.tx.send(event);
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Removes and returns every event queued at the start of the call, in
    /// enqueue order.
    pub fn drain(&mut self) -> Vec<Event> {
        let pending = self.rx.len();
        let mut events = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }
}
