//! Boundary with the network virtualization framework.
//!
//! The framework itself (its NAT, DHCP and isolation enforcement) is opaque
//! and authoritative; this crate only negotiates parameters and exchanges
//! bytes with it through the [`Framework`] trait. The integer status
//! vocabulary and the operation-mode values pass through unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StartConfig;

/// Status code returned by every framework call.
///
/// `SUCCESS` is the sole success sentinel; everything else is a failure the
/// caller maps into a typed [`Error`](crate::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(1000);
    pub const GENERAL_FAILURE: Status = Status(1001);
    pub const OUT_OF_MEMORY: Status = Status(1002);
    pub const INVALID_ARGUMENT: Status = Status(1003);
    pub const SETUP_INCOMPLETE: Status = Status(1004);
    pub const PERMISSION_DENIED: Status = Status(1005);
    pub const PACKET_TOO_BIG: Status = Status(1006);
    pub const BUFFER_EXHAUSTED: Status = Status(1007);
    pub const TOO_MANY_PACKETS: Status = Status(1008);
    pub const SHARING_SERVICE_BUSY: Status = Status(1009);
    pub const NOT_AUTHORIZED: Status = Status(1010);
    pub const NOT_WRITTEN: Status = Status(2001);
    pub const CALLBACK_SETUP: Status = Status(3000);
    pub const NO_PACKET_READ: Status = Status(4000);

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    fn message(self) -> &'static str {
        match self {
            Status::SUCCESS => "success",
            Status::GENERAL_FAILURE => "unspecified failure",
            Status::OUT_OF_MEMORY => "out of memory",
            Status::INVALID_ARGUMENT => "invalid argument provided",
            Status::SETUP_INCOMPLETE => "interface setup is incomplete",
            Status::PERMISSION_DENIED => "permission denied",
            Status::PACKET_TOO_BIG => "larger packet size than MTU",
            Status::BUFFER_EXHAUSTED => "kernel buffer exhausted",
            Status::TOO_MANY_PACKETS => "too many packets",
            Status::SHARING_SERVICE_BUSY => "sharing service busy",
            Status::NOT_AUTHORIZED => "not authorized",
            Status::NOT_WRITTEN => "packet not written",
            Status::CALLBACK_SETUP => "could not set up event callback",
            Status::NO_PACKET_READ => "no packet read",
            _ => "unknown status code",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.0)
    }
}

/// How the virtual network interconnects with the host and other VMs.
///
/// The discriminants are the framework's own values and pass through
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum OperationMode {
    /// Guests and host only; no outside traffic.
    Host = 1000,
    /// NAT through the host's active connection.
    Shared = 1001,
    /// The guest appears directly on a physical interface.
    Bridged = 1002,
}

impl OperationMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Event-type bit: inbound frames are queued, the count says how many.
pub const EVENT_PACKETS_AVAILABLE: u32 = 1 << 0;
/// Event-type bit: the framework considers the interface unusable.
pub const EVENT_INTERFACE_DEAD: u32 = 1 << 1;

/// Callback the framework invokes on its own notification thread with
/// `(event_type, packet_count)`. Implementations registered by this crate
/// only hand the pair off to the consumer's domain; they never block.
pub type EventFn = Box<dyn Fn(u32, u64) + Send + Sync>;

/// One attachment point of the virtualization framework.
///
/// Implementations are driven exclusively through an
/// [`Interface`](crate::Interface) handle, which serializes the calls and
/// maps status codes to typed errors.
pub trait Framework: Send + Sync {
    /// Activate the attachment. Returns `(status, max_packet_size, mtu)`;
    /// on success both limits must be populated and `on_event` must already
    /// be registered so no notification is missed.
    fn start(&self, config: &StartConfig, on_event: EventFn) -> (Status, u64, u64);

    /// Deactivate the attachment. Must not return until the notification
    /// thread has quiesced; no `on_event` invocation may happen afterwards.
    fn stop(&self) -> Status;

    /// Hand one whole frame to the network. There is no partial-write state:
    /// the frame is either accepted or the status reports why not.
    fn write(&self, frame: &[u8]) -> Status;

    /// Fill `buf` with the next queued frame and return its length. Must not
    /// block waiting for data; an empty queue is `NO_PACKET_READ`.
    fn read(&self, buf: &mut [u8]) -> (Status, usize);
}
