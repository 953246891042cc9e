//! Object identifiers and the values some of them carry

/// An `NDIS_OID`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Oid(pub u32);

impl Oid {
    pub const GEN_CURRENT_PACKET_FILTER: Self = Self(0x0001_010E);
    pub const GEN_PHYSICAL_MEDIUM: Self = Self(0x0001_0202);
    pub const GEN_LINK_STATE: Self = Self(0x0001_0211);
    pub const OID_802_3_CURRENT_ADDRESS: Self = Self(0x0101_0102);
    pub const OID_802_3_PERMANENT_ADDRESS: Self = Self(0x0101_0101);
    pub const TCP_OFFLOAD_CURRENT_CONFIG: Self = Self(0xFC01_020B);
}

/// A `NDIS_PHYSICAL_MEDIUM` value, as answered to `OID_GEN_PHYSICAL_MEDIUM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalMedium(pub u32);

impl PhysicalMedium {
    pub const UNSPECIFIED: Self = Self(0);
    pub const WIRELESS_LAN: Self = Self(1);
    pub const CABLE_MODEM: Self = Self(2);
    pub const PHONE_LINE: Self = Self(3);
    pub const POWER_LINE: Self = Self(4);
    pub const DSL: Self = Self(5);
    pub const FIBRE_CHANNEL: Self = Self(6);
    pub const IEEE1394: Self = Self(7);
    pub const WIRELESS_WAN: Self = Self(8);
    pub const NATIVE_802_11: Self = Self(9);
    pub const BLUETOOTH: Self = Self(10);
    pub const INFINIBAND: Self = Self(11);
    pub const WIMAX: Self = Self(12);
    pub const UWB: Self = Self(13);
    pub const IEEE802_3: Self = Self(14);

    /// Whether adapters of this medium can be put into promiscuous mode at all
    ///
    /// Wireless, cellular, and Bluetooth adapters either reject the packet
    /// filter bit or silently ignore it.
    pub fn supports_promiscuous(self) -> bool {
        !matches!(
            self,
            Self::WIRELESS_LAN
                | Self::NATIVE_802_11
                | Self::WIRELESS_WAN
                | Self::BLUETOOTH
                | Self::WIMAX
        )
    }
}

#[cfg(test)]
mod test {
    use super::PhysicalMedium;

    #[test]
    fn promiscuous_capable_media() {
        assert!(PhysicalMedium::IEEE802_3.supports_promiscuous());
        assert!(PhysicalMedium::UNSPECIFIED.supports_promiscuous());

        assert!(!PhysicalMedium::WIRELESS_LAN.supports_promiscuous());
        assert!(!PhysicalMedium::NATIVE_802_11.supports_promiscuous());
        assert!(!PhysicalMedium::WIRELESS_WAN.supports_promiscuous());
        assert!(!PhysicalMedium::BLUETOOTH.supports_promiscuous());
    }
}
