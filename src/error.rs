use crate::framework::Status;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a caller and the virtual network.
///
/// Framework-reported failures carry the underlying [`Status`] code so the
/// caller can distinguish transient congestion from fatal rejection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Address range, subnet mask or mode rejected before the framework was
    /// ever involved.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The framework refused to activate the interface.
    #[error("interface activation failed: {0}")]
    StartFailed(Status),

    /// The framework reported an error while deactivating the interface.
    #[error("interface deactivation failed: {0}")]
    StopFailed(Status),

    /// `start` called on a handle that is already running.
    #[error("interface already started")]
    AlreadyStarted,

    /// Lifecycle misuse other than a double start.
    #[error("invalid interface state: {0}")]
    InvalidState(&'static str),

    /// Read or write attempted outside the `Running` state.
    #[error("interface is not running")]
    InterfaceNotRunning,

    /// Write payload exceeds the negotiated maximum packet size.
    #[error("packet of {len} bytes exceeds the negotiated maximum of {max}")]
    PacketTooLarge { len: usize, max: usize },

    /// The framework rejected the frame at the transport level.
    #[error("packet write rejected: {0}")]
    WriteFailed(Status),

    /// The framework could not produce a frame.
    #[error("packet read failed: {0}")]
    ReadFailed(Status),

    /// The framework reported the interface unusable. The handle must be
    /// stopped and a fresh one started if operation is to continue.
    #[error("interface reported dead by the framework")]
    InterfaceDead,
}
