//! `NDIS_STATUS` codes

/// An `NDIS_STATUS` value.
///
/// Negative values are errors, everything else (including
/// [`NdisStatus::PENDING`]) is a success code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NdisStatus(pub i32);

impl NdisStatus {
    pub const SUCCESS: Self = Self(0);
    pub const PENDING: Self = Self(0x0000_0103);
    pub const FAILURE: Self = Self(0xC000_0001_u32 as i32);
    pub const RESOURCES: Self = Self(0xC000_009A_u32 as i32);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D_u32 as i32);
    pub const NOT_SUPPORTED: Self = Self(0xC000_00BB_u32 as i32);
    pub const INVALID_STATE: Self = Self(0xC000_0184_u32 as i32);
    pub const ADAPTER_NOT_FOUND: Self = Self(0xC001_0006_u32 as i32);
    pub const REQUEST_ABORTED: Self = Self(0xC001_000C_u32 as i32);
    pub const INVALID_LENGTH: Self = Self(0xC001_0014_u32 as i32);
    pub const PAUSED: Self = Self(0xC023_002A_u32 as i32);
    pub const TIMEOUT: Self = Self(0x0000_0102);

    // Status indication codes
    pub const MEDIA_CONNECT: Self = Self(0x4001_000B);
    pub const MEDIA_DISCONNECT: Self = Self(0x4001_000C);
    pub const LINK_STATE: Self = Self(0x4001_0017);
    pub const TASK_OFFLOAD_CURRENT_CONFIG: Self = Self(0x4002_0000);

    /// Equivalent to `NT_SUCCESS`
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_pending(self) -> bool {
        self.0 == Self::PENDING.0
    }
}

impl core::fmt::Debug for NdisStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NdisStatus({:#010x})", self.0 as u32)
    }
}

impl core::fmt::Display for NdisStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}
