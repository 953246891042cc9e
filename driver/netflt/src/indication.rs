//! Status indications coming up from the adapter

use ndis_rs::NdisStatus;

bitflags::bitflags! {
    /// Task offloads announced by a `TASK_OFFLOAD_CURRENT_CONFIG` indication
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OffloadCaps: u32 {
        const IPV4_CHECKSUM = 1 << 0;
        const TCP_CHECKSUM = 1 << 1;
        const UDP_CHECKSUM = 1 << 2;
        const LSO_V1 = 1 << 3;
        const LSO_V2 = 1 << 4;
        const IPSEC = 1 << 5;
        const RSC = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPayload {
    OffloadConfig(OffloadCaps),
    LinkState { connected: bool, speed_bps: u64 },
    Other(Vec<u8>),
}

/// An `NDIS_STATUS_INDICATION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndication {
    pub code: NdisStatus,
    pub payload: StatusPayload,
}

impl StatusIndication {
    pub fn offload_config(caps: OffloadCaps) -> Self {
        Self {
            code: NdisStatus::TASK_OFFLOAD_CURRENT_CONFIG,
            payload: StatusPayload::OffloadConfig(caps),
        }
    }

    pub fn link_state(connected: bool, speed_bps: u64) -> Self {
        Self {
            code: NdisStatus::LINK_STATE,
            payload: StatusPayload::LinkState {
                connected,
                speed_bps,
            },
        }
    }

    /// The offloads announced, if this is an offload configuration indication
    pub fn offloads(&self) -> Option<OffloadCaps> {
        match (self.code, &self.payload) {
            (NdisStatus::TASK_OFFLOAD_CURRENT_CONFIG, StatusPayload::OffloadConfig(caps)) => {
                Some(*caps)
            }
            _ => None,
        }
    }
}
