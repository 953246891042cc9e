//! The switch side of an instance

use std::net::IpAddr;

use crate::sg::SgBuf;
use crate::MacAddr;

/// Where a packet offered to the switch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the network, on its way up to the host stack
    FromWire,
    /// Sent by the host stack, on its way down to the network
    FromHost,
}

bitflags::bitflags! {
    /// Where the switch wants a packet to go
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Destination: u32 {
        /// Out through the adapter
        const WIRE = 1 << 0;
        /// Up to the host protocol stack
        const HOST = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressChange {
    Added,
    Removed,
}

/// The port of the virtual switch an instance is connected to
///
/// None of these are called with instance locks held.
pub trait SwitchPort: Send + Sync {
    /// Offers a packet to the switch, returning whether the switch consumed
    /// it.
    ///
    /// `packet` only lives for the duration of the call, the switch has to
    /// make an owned copy if it wants to keep it.
    fn receive(&self, packet: &SgBuf<'_>, direction: Direction) -> bool;

    /// Tells the switch the MAC address of the host interface
    fn report_mac_address(&self, mac: MacAddr);

    /// Tells the switch whether the host stack itself asked for promiscuous
    /// mode
    fn report_promiscuous_mode(&self, promiscuous: bool);

    /// Tells the switch an address was added to or removed from the host
    /// interface
    fn notify_host_address(&self, _change: AddressChange, _address: IpAddr) {}

    /// The host interface is gone for good, the switch should start tearing
    /// down its side of the connection
    fn host_gone(&self) {}
}

impl core::fmt::Debug for dyn SwitchPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SwitchPort")
    }
}
