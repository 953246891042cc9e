//! The OS side of an instance
//!
//! An instance only knows the host interface through a [`HostBackend`], so
//! the state machine doesn't depend on how the OS binding is realized.

use std::sync::Arc;

use ndis_rs::PhysicalMedium;

use crate::error::Result;
use crate::instance::FilterInstance;
use crate::sg::SgBuf;
use crate::switch::Destination;
use crate::MacAddr;

/// What an instance learns about the host interface when attaching to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBinding {
    pub mac: MacAddr,
    pub medium: PhysicalMedium,
}

pub trait HostBackend: Send + Sync {
    /// Binds `instance` to the host interface named like it
    ///
    /// ## Errors
    ///
    /// - [`Error::NotFound`] if there is no such interface (yet)
    /// - [`Error::AlreadyAttached`] if the interface is bound to another instance
    ///
    /// [`Error::NotFound`]: crate::error::Error::NotFound
    /// [`Error::AlreadyAttached`]: crate::error::Error::AlreadyAttached
    fn attach(&self, instance: &Arc<FilterInstance>) -> Result<HostBinding>;

    /// Unbinds `instance` from the host interface, after waiting for its
    /// in-flight data path calls to drain
    fn detach(&self, instance: &FilterInstance);

    /// Starts or stops handing host traffic to the switch
    ///
    /// May block on requests to the adapter.
    fn set_active(&self, instance: &FilterInstance, active: bool);

    /// Sends a packet from the switch to the wire and/or the host stack
    fn xmit(&self, instance: &FilterInstance, packet: &SgBuf<'_>, dst: Destination)
        -> Result<()>;
}

impl core::fmt::Debug for dyn HostBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("HostBackend")
    }
}
