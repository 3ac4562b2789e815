//! Virtual network interface adapter.
//!
//! Attaches one virtual machine (or similar isolated execution context) to
//! a shared virtual network through an opaque virtualization framework:
//! capability negotiation, a guarded interface lifecycle, synchronous
//! packet I/O sized by the negotiated limits, and an event bridge that
//! relays the framework's packets-available notifications into the
//! consumer's own concurrency domain.

pub mod bridge;
pub mod config;
pub mod error;
pub mod framework;
pub mod iface;
pub mod proxy;
pub mod sim;

pub use bridge::{Event, EventBridge};
pub use config::StartConfig;
pub use error::{Error, Result};
pub use framework::{Framework, OperationMode, Status};
pub use iface::{Capacity, Interface, State};
