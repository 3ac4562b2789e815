use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::framework::{EVENT_INTERFACE_DEAD, EVENT_PACKETS_AVAILABLE};

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod bridge_tests;

// Depth of the relay channel between the framework's notification thread
// and the consumer. Matches the queue the event rate was tuned against.
const EVENT_QUEUE_DEPTH: usize = 100;

/// Notification relayed from the framework into the consumer's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `count` frames are queued on the interface. Issue one
    /// [`read`](crate::Interface::read) per unit of `count` to drain them
    /// without under- or over-draining the framework queue.
    PacketsAvailable { count: u64 },
    /// The framework reported the interface unusable. Stop the handle.
    InterfaceDead,
}

/// Consumer half of the event bridge, returned by
/// [`Interface::start`](crate::Interface::start). One bridge belongs to
/// exactly one interface handle; it closes when the handle is stopped.
#[derive(Debug)]
pub struct EventBridge {
    rx: mpsc::Receiver<Event>,
    shared: Arc<BridgeShared>,
}

impl EventBridge {
    /// Wait for the next event. Returns `None` once the interface has been
    /// stopped and every queued event drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of notifications dropped because the consumer fell behind.
    ///
    /// After observing a nonzero count, drain the interface with `read`
    /// until it reports `NO_PACKET_READ`; the dropped events' packets are
    /// still queued on the framework side.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Flags and counters shared between the handle, the relay and the
/// consumer half. Deliberately holds no channel end, so dropping the
/// relay closes the bridge.
#[derive(Debug)]
pub(crate) struct BridgeShared {
    detached: AtomicBool,
    dead: AtomicBool,
    dropped: AtomicU64,
}

impl BridgeShared {
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }
}

/// Relay half, captured by the callback handed to the framework. Lives
/// exactly as long as the framework keeps the callback; its drop is what
/// lets [`EventBridge::recv`] return `None`. Runs on the framework's
/// notification thread: no locks, no blocking, no panics.
pub(crate) struct BridgeSender {
    tx: mpsc::Sender<Event>,
    pub(crate) shared: Arc<BridgeShared>,
}

pub(crate) fn channel() -> (BridgeSender, EventBridge) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let shared = Arc::new(BridgeShared {
        detached: AtomicBool::new(false),
        dead: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });
    let sender = BridgeSender {
        tx,
        shared: shared.clone(),
    };
    let bridge = EventBridge { rx, shared };
    (sender, bridge)
}

impl BridgeSender {
    pub(crate) fn relay(&self, event_type: u32, packet_count: u64) {
        if self.shared.detached.load(Ordering::Acquire) {
            return;
        }
        if event_type & EVENT_INTERFACE_DEAD != 0 {
            // Flag before the send: I/O reports the death even when the
            // channel is saturated.
            self.shared.dead.store(true, Ordering::Release);
            self.push(Event::InterfaceDead);
        }
        if event_type & EVENT_PACKETS_AVAILABLE != 0 && packet_count > 0 {
            self.push(Event::PacketsAvailable {
                count: packet_count,
            });
        }
    }

    fn push(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?event, "event queue full, dropping notification");
            }
            // Receiver gone: the consumer stopped listening.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
