use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::bridge::{self, BridgeShared, EventBridge};
use crate::config::StartConfig;
use crate::error::{Error, Result};
use crate::framework::{EventFn, Framework, Status};

#[cfg(test)]
#[path = "iface_tests.rs"]
mod iface_tests;

/// Capacity limits negotiated at start time, immutable for the rest of the
/// handle's life. Every read and write buffer derives from
/// `max_packet_size`; nothing is hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Upper bound for any single frame, in either direction.
    pub max_packet_size: usize,
    /// MTU to configure on the guest side of the interface.
    pub mtu: usize,
}

/// Observable lifecycle state of an [`Interface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopped,
    Failed,
}

enum Lifecycle {
    Created,
    Running {
        capacity: Capacity,
        bridge: Arc<BridgeShared>,
    },
    Stopped,
    Failed,
}

/// Handle for one attachment to the virtual network.
///
/// `start` at most once, then interleave `write` and bridge-driven `read`
/// freely from any thread, then `stop` exactly once. Every operation
/// serializes on one internal lock, so `stop` waits out in-flight I/O and
/// concurrent writers cannot tear each other's frames. Reads are best kept
/// on a single consumer task to preserve the framework's queue order.
pub struct Interface {
    framework: Arc<dyn Framework>,
    state: Mutex<Lifecycle>,
}

impl Interface {
    pub fn new(framework: Arc<dyn Framework>) -> Self {
        Self {
            framework,
            state: Mutex::new(Lifecycle::Created),
        }
    }

    /// Activate the attachment with the given start parameters.
    ///
    /// Blocks until the framework either activates the interface or
    /// definitively rejects it. On success the handle is `Running` and the
    /// negotiated [`Capacity`] plus the [`EventBridge`] carrying future
    /// packets-available notifications are returned. The relay callback is
    /// registered before the framework call, so no notification is missed.
    pub fn start(&self, config: &StartConfig) -> Result<(Capacity, EventBridge)> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Created => {}
            Lifecycle::Running { .. } => return Err(Error::AlreadyStarted),
            Lifecycle::Stopped => return Err(Error::InvalidState("start on a stopped interface")),
            Lifecycle::Failed => return Err(Error::InvalidState("start on a failed interface")),
        }

        let (sender, events) = bridge::channel();
        let shared = sender.shared.clone();
        let on_event: EventFn =
            Box::new(move |event_type, packet_count| sender.relay(event_type, packet_count));

        let (status, max_packet_size, mtu) = self.framework.start(config, on_event);
        if !status.is_success() {
            *state = Lifecycle::Failed;
            return Err(Error::StartFailed(status));
        }
        if max_packet_size == 0 || mtu == 0 {
            // Success status without usable limits: nothing can be sized,
            // unwind the half-initialized attachment.
            shared.detach();
            self.framework.stop();
            *state = Lifecycle::Failed;
            return Err(Error::StartFailed(Status::SETUP_INCOMPLETE));
        }

        let capacity = Capacity {
            max_packet_size: max_packet_size as usize,
            mtu: mtu as usize,
        };
        tracing::debug!(max_packet_size, mtu, "interface running");
        *state = Lifecycle::Running {
            capacity,
            bridge: shared,
        };
        Ok((capacity, events))
    }

    /// Deactivate the attachment.
    ///
    /// Once `stop` returns, no event reaches the bridge and every
    /// subsequent read or write fails with `InterfaceNotRunning`. A second
    /// call fails with `InvalidState` without reaching the framework again.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        let bridge = match &*state {
            Lifecycle::Running { bridge, .. } => bridge.clone(),
            Lifecycle::Created => return Err(Error::InvalidState("stop before start")),
            Lifecycle::Stopped => return Err(Error::InvalidState("interface already stopped")),
            Lifecycle::Failed => return Err(Error::InvalidState("stop on a failed interface")),
        };

        // Detach before asking the framework to wind down: a notification
        // racing with the teardown is ignored rather than relayed.
        bridge.detach();
        let status = self.framework.stop();
        *state = Lifecycle::Stopped;
        if !status.is_success() {
            return Err(Error::StopFailed(status));
        }
        tracing::debug!("interface stopped");
        Ok(())
    }

    /// Send one link-layer frame to the network.
    ///
    /// The whole frame is either accepted by the framework or the call
    /// fails; there is no partial-send state. Does not wait for delivery
    /// beyond the local hand-off.
    pub fn write(&self, frame: &[u8]) -> Result<()> {
        let state = self.state.lock();
        let (capacity, bridge) = running(&state)?;
        if bridge.is_dead() {
            return Err(Error::InterfaceDead);
        }
        if frame.is_empty() {
            return Err(Error::WriteFailed(Status::INVALID_ARGUMENT));
        }
        if frame.len() > capacity.max_packet_size {
            return Err(Error::PacketTooLarge {
                len: frame.len(),
                max: capacity.max_packet_size,
            });
        }

        let status = self.framework.write(frame);
        if !status.is_success() {
            return Err(Error::WriteFailed(status));
        }
        Ok(())
    }

    /// Receive the next queued frame, trimmed to its actual length.
    ///
    /// Call once per unit of `packet_count` from the most recent
    /// [`Event::PacketsAvailable`](crate::Event::PacketsAvailable); reading
    /// blindly reports `ReadFailed` with `NO_PACKET_READ` when the queue is
    /// empty.
    pub fn read(&self) -> Result<Bytes> {
        let state = self.state.lock();
        let (capacity, bridge) = running(&state)?;
        if bridge.is_dead() {
            return Err(Error::InterfaceDead);
        }

        let mut buf = BytesMut::zeroed(capacity.max_packet_size);
        let (status, len) = self.framework.read(&mut buf);
        if !status.is_success() {
            return Err(Error::ReadFailed(status));
        }
        buf.truncate(len);
        Ok(buf.freeze())
    }

    pub fn state(&self) -> State {
        match &*self.state.lock() {
            Lifecycle::Created => State::Created,
            Lifecycle::Running { bridge, .. } if bridge.is_dead() => State::Failed,
            Lifecycle::Running { .. } => State::Running,
            Lifecycle::Stopped => State::Stopped,
            Lifecycle::Failed => State::Failed,
        }
    }

    /// Negotiated limits; available while the handle is running.
    pub fn capacity(&self) -> Result<Capacity> {
        match &*self.state.lock() {
            Lifecycle::Running { capacity, .. } => Ok(*capacity),
            _ => Err(Error::InterfaceNotRunning),
        }
    }
}

fn running(state: &Lifecycle) -> Result<(Capacity, &Arc<BridgeShared>)> {
    match state {
        Lifecycle::Running { capacity, bridge } => Ok((*capacity, bridge)),
        _ => Err(Error::InterfaceNotRunning),
    }
}
