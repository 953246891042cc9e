//! Error type shared by the filter core

use ndis_rs::NdisStatus;

/// Errors surfaced by the filter core
///
/// Data path errors never leave the filter as errors: they are logged and
/// turned into a dropped (or passed) packet at the point of detection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Allocation of a descriptor, buffer list, or pool entry failed
    #[error("out of resources")]
    Resources,
    /// The caller asked for something the current state doesn't allow
    #[error("operation is not valid in the current state")]
    InvalidState,
    /// A wait gave up before the awaited condition became true
    #[error("timed out waiting for the operation to finish")]
    Timeout,
    /// No filter module is attached to an interface with this name
    #[error("no network interface named {0:?}")]
    NotFound(String),
    /// The filter module isn't running
    #[error("filter module is paused")]
    Paused,
    /// The interface is already bound to another filter instance
    #[error("interface {0:?} is already bound")]
    AlreadyAttached(String),
    /// Another request already occupies the in-flight slot
    #[error("a request is already in flight")]
    RequestInFlight,
    /// A configuration parameter couldn't be used
    #[error("invalid value for {key}: {reason}")]
    InvalidConfig { key: String, reason: &'static str },
    /// The underlying adapter failed a request
    #[error("adapter request failed with status {0}")]
    Host(NdisStatus),
}

impl Error {
    /// Closest `NDIS_STATUS` to report to the OS for this error
    pub fn status(&self) -> NdisStatus {
        match self {
            Error::Resources => NdisStatus::RESOURCES,
            Error::InvalidState | Error::RequestInFlight | Error::AlreadyAttached(_) => {
                NdisStatus::INVALID_STATE
            }
            Error::Timeout => NdisStatus::REQUEST_ABORTED,
            Error::NotFound(_) => NdisStatus::ADAPTER_NOT_FOUND,
            Error::Paused => NdisStatus::PAUSED,
            Error::InvalidConfig { .. } => NdisStatus::INVALID_PARAMETER,
            Error::Host(status) => *status,
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
