//! In-process simulation of the virtualization framework.
//!
//! [`SimNetwork`] is a shared hub: frames written through one attachment are
//! queued to every other attachment and announced through the real callback
//! path, from a per-attachment delivery thread the consumer does not
//! control. Delivery is blind frame fan-out with no NAT, DHCP or packet
//! inspection; the isolation flag is honored as a plain visibility rule.
//!
//! Exists so the adapter can be exercised end-to-end in tests and local
//! development without the host virtualization framework.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::config::StartConfig;
use crate::framework::{
    EventFn, Framework, Status, EVENT_INTERFACE_DEAD, EVENT_PACKETS_AVAILABLE,
};

#[cfg(test)]
#[path = "sim_tests.rs"]
mod sim_tests;

// Limits the host framework reports for a shared-mode interface.
const DEFAULT_MAX_PACKET_SIZE: u64 = 65550;
const DEFAULT_MTU: u64 = 1500;

#[derive(Default)]
struct PortState {
    queue: VecDeque<Bytes>,
    /// Frames enqueued but not yet announced to the callback.
    pending: u64,
    dead_pending: bool,
    shutdown: bool,
}

struct Port {
    inner: Mutex<PortState>,
    cv: Condvar,
    isolated: bool,
}

struct NetInner {
    ports: DashMap<u64, Arc<Port>>,
    next_port: AtomicU64,
    max_packet_size: u64,
    mtu: u64,
    dead: AtomicBool,
}

/// A shared virtual network segment living entirely in this process.
pub struct SimNetwork {
    inner: Arc<NetInner>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PACKET_SIZE, DEFAULT_MTU)
    }

    pub fn with_capacity(max_packet_size: u64, mtu: u64) -> Self {
        Self {
            inner: Arc::new(NetInner {
                ports: DashMap::new(),
                next_port: AtomicU64::new(1),
                max_packet_size,
                mtu,
                dead: AtomicBool::new(false),
            }),
        }
    }

    /// One framework-side attachment point, to be handed to
    /// [`Interface::new`](crate::Interface::new).
    pub fn attachment(&self) -> SimAttachment {
        SimAttachment {
            net: self.inner.clone(),
            port: Mutex::new(None),
        }
    }

    /// Declare the whole network unusable, as a host framework does when an
    /// interface dies underneath its consumer: every attachment gets an
    /// `EVENT_INTERFACE_DEAD` notification and subsequent start/read/write
    /// calls fail.
    pub fn kill(&self) {
        self.inner.dead.store(true, Ordering::Release);
        for entry in self.inner.ports.iter() {
            let port = entry.value();
            let mut st = port.inner.lock();
            st.dead_pending = true;
            port.cv.notify_one();
        }
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

struct Attached {
    id: u64,
    port: Arc<Port>,
    thread: Option<thread::JoinHandle<()>>,
}

/// [`Framework`] implementation backed by a [`SimNetwork`].
pub struct SimAttachment {
    net: Arc<NetInner>,
    port: Mutex<Option<Attached>>,
}

impl Framework for SimAttachment {
    fn start(&self, config: &StartConfig, on_event: EventFn) -> (Status, u64, u64) {
        let mut slot = self.port.lock();
        if slot.is_some() {
            return (Status::SETUP_INCOMPLETE, 0, 0);
        }
        if self.net.dead.load(Ordering::Acquire) {
            return (Status::GENERAL_FAILURE, 0, 0);
        }
        if config.debug {
            tracing::debug!(
                start = %config.start_addr,
                end = %config.end_addr,
                mask = %config.subnet_mask,
                mode = ?config.mode,
                isolation = config.isolation,
                "sim attachment starting"
            );
        }

        let id = self.net.next_port.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(Port {
            inner: Mutex::new(PortState::default()),
            cv: Condvar::new(),
            isolated: config.isolation,
        });

        let worker = port.clone();
        let thread = match thread::Builder::new()
            .name(format!("sim-net-{id}"))
            .spawn(move || deliver(worker, on_event))
        {
            Ok(handle) => handle,
            Err(_) => return (Status::CALLBACK_SETUP, 0, 0),
        };

        self.net.ports.insert(id, port.clone());
        *slot = Some(Attached {
            id,
            port,
            thread: Some(thread),
        });
        (Status::SUCCESS, self.net.max_packet_size, self.net.mtu)
    }

    fn stop(&self) -> Status {
        let mut slot = self.port.lock();
        let Some(mut attached) = slot.take() else {
            return Status::SETUP_INCOMPLETE;
        };
        self.net.ports.remove(&attached.id);
        {
            let mut st = attached.port.inner.lock();
            st.shutdown = true;
            attached.port.cv.notify_one();
        }
        if let Some(thread) = attached.thread.take() {
            // Joining is what guarantees no callback after stop returns.
            let _ = thread.join();
        }
        Status::SUCCESS
    }

    fn write(&self, frame: &[u8]) -> Status {
        let slot = self.port.lock();
        let Some(attached) = slot.as_ref() else {
            return Status::SETUP_INCOMPLETE;
        };
        if self.net.dead.load(Ordering::Acquire) {
            return Status::GENERAL_FAILURE;
        }
        if frame.len() as u64 > self.net.max_packet_size {
            return Status::PACKET_TOO_BIG;
        }

        let frame = Bytes::copy_from_slice(frame);
        for entry in self.net.ports.iter() {
            if *entry.key() == attached.id {
                continue;
            }
            let peer = entry.value();
            // Isolation restricts VM-to-VM visibility from either side.
            if attached.port.isolated || peer.isolated {
                continue;
            }
            let mut st = peer.inner.lock();
            st.queue.push_back(frame.clone());
            st.pending += 1;
            peer.cv.notify_one();
        }
        Status::SUCCESS
    }

    fn read(&self, buf: &mut [u8]) -> (Status, usize) {
        let slot = self.port.lock();
        let Some(attached) = slot.as_ref() else {
            return (Status::SETUP_INCOMPLETE, 0);
        };
        if self.net.dead.load(Ordering::Acquire) {
            return (Status::GENERAL_FAILURE, 0);
        }

        let mut st = attached.port.inner.lock();
        let Some(frame) = st.queue.pop_front() else {
            return (Status::NO_PACKET_READ, 0);
        };
        if frame.len() > buf.len() {
            // Undersized caller buffer; the frame stays queued.
            st.queue.push_front(frame);
            return (Status::INVALID_ARGUMENT, 0);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        (Status::SUCCESS, frame.len())
    }
}

/// Per-attachment notification thread: coalesces enqueued frames into one
/// packets-available announcement carrying the newly-available count.
fn deliver(port: Arc<Port>, on_event: EventFn) {
    loop {
        let (dead, frames) = {
            let mut st = port.inner.lock();
            while st.pending == 0 && !st.dead_pending && !st.shutdown {
                port.cv.wait(&mut st);
            }
            if st.shutdown {
                return;
            }
            (
                std::mem::take(&mut st.dead_pending),
                std::mem::take(&mut st.pending),
            )
        };
        // Callback outside the lock; it only hands off to the bridge.
        if dead {
            on_event(EVENT_INTERFACE_DEAD, 0);
        }
        if frames > 0 {
            on_event(EVENT_PACKETS_AVAILABLE, frames);
        }
    }
}
