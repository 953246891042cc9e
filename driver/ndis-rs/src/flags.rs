//! Flag sets passed along with `NET_BUFFER_LIST` batches and packet filter OIDs

bitflags::bitflags! {
    /// `NDIS_PACKET_TYPE_*` bits, as used by `OID_GEN_CURRENT_PACKET_FILTER`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFilter: u32 {
        const DIRECTED = 0x0000_0001;
        const MULTICAST = 0x0000_0002;
        const ALL_MULTICAST = 0x0000_0004;
        const BROADCAST = 0x0000_0008;
        const SOURCE_ROUTING = 0x0000_0010;
        const PROMISCUOUS = 0x0000_0020;
        const SMT = 0x0000_0040;
        const ALL_LOCAL = 0x0000_0080;
        const GROUP = 0x0000_1000;
        const ALL_FUNCTIONAL = 0x0000_2000;
        const FUNCTIONAL = 0x0000_4000;
        const MAC_FRAME = 0x0000_8000;
        const NO_LOCAL = 0x0001_0000;
    }
}

impl PacketFilter {
    /// Interprets a raw `OID_GEN_CURRENT_PACKET_FILTER` buffer
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..4)?.try_into().ok()?;
        Some(Self::from_bits_retain(u32::from_le_bytes(raw)))
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.bits().to_le_bytes()
    }
}

bitflags::bitflags! {
    /// `NDIS_SEND_FLAGS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SendFlags: u32 {
        const DISPATCH_LEVEL = 0x0000_0001;
        const CHECK_FOR_LOOPBACK = 0x0000_0002;
        const SINGLE_QUEUE = 0x0000_0004;
        const SWITCH_SINGLE_SOURCE = 0x0000_0010;
        const SWITCH_DESTINATION_GROUP = 0x0000_0020;
    }
}

bitflags::bitflags! {
    /// `NDIS_RECEIVE_FLAGS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReceiveFlags: u32 {
        const DISPATCH_LEVEL = 0x0000_0001;
        /// The indicating driver reclaims the batch as soon as the call
        /// returns, so nothing may be pended.
        const RESOURCES = 0x0000_0002;
        const SINGLE_ETHER_TYPE = 0x0000_0100;
        const SINGLE_VLAN = 0x0000_0200;
        const PERFECT_FILTERED = 0x0000_0400;
        const SINGLE_QUEUE = 0x0000_0800;
        const SHARED_MEMORY_INFO_VALID = 0x0000_1000;
        const MORE_NBLS = 0x0000_2000;
    }
}

bitflags::bitflags! {
    /// `NDIS_SEND_COMPLETE_FLAGS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SendCompleteFlags: u32 {
        const DISPATCH_LEVEL = 0x0000_0001;
        const SWITCH_SINGLE_SOURCE = 0x0000_0002;
    }
}

bitflags::bitflags! {
    /// `NDIS_RETURN_FLAGS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReturnFlags: u32 {
        const DISPATCH_LEVEL = 0x0000_0001;
        const SWITCH_SINGLE_SOURCE = 0x0000_0002;
    }
}

impl ReceiveFlags {
    /// Whether the receive indication allows keeping ownership of the batch
    /// past the end of the call
    pub fn can_pend(self) -> bool {
        !self.contains(Self::RESOURCES)
    }
}

impl From<ReceiveFlags> for ReturnFlags {
    fn from(value: ReceiveFlags) -> Self {
        if value.contains(ReceiveFlags::DISPATCH_LEVEL) {
            ReturnFlags::DISPATCH_LEVEL
        } else {
            ReturnFlags::empty()
        }
    }
}

impl From<SendFlags> for SendCompleteFlags {
    fn from(value: SendFlags) -> Self {
        if value.contains(SendFlags::DISPATCH_LEVEL) {
            SendCompleteFlags::DISPATCH_LEVEL
        } else {
            SendCompleteFlags::empty()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_filter_le_bytes() {
        let filter = PacketFilter::DIRECTED | PacketFilter::BROADCAST | PacketFilter::PROMISCUOUS;
        let bytes = filter.to_le_bytes();

        assert_eq!(bytes, [0x29, 0, 0, 0]);
        assert_eq!(PacketFilter::from_le_bytes(&bytes), Some(filter));
        assert_eq!(PacketFilter::from_le_bytes(&bytes[..3]), None);
    }

    #[test]
    fn resources_cannot_pend() {
        assert!(ReceiveFlags::DISPATCH_LEVEL.can_pend());
        assert!(!(ReceiveFlags::DISPATCH_LEVEL | ReceiveFlags::RESOURCES).can_pend());
    }

    #[test]
    fn dispatch_level_carries_over() {
        let flags = ReceiveFlags::DISPATCH_LEVEL | ReceiveFlags::MORE_NBLS;
        assert_eq!(ReturnFlags::from(flags), ReturnFlags::DISPATCH_LEVEL);
        assert_eq!(
            SendCompleteFlags::from(SendFlags::CHECK_FOR_LOOPBACK),
            SendCompleteFlags::empty()
        );
    }
}
