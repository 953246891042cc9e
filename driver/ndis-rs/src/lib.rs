//! Helper utilities for making it easier to work with `NET_BUFFER_LIST`s and `NET_BUFFER`s
//!
//! Based off of [ndis-driver-library](https://github.com/microsoft/ndis-driver-library),
//! but modelled as owned structures so that filter logic can be exercised
//! outside of the kernel.
#![no_std]

extern crate alloc;

// During tests, allow importing std
#[cfg(any(test))]
extern crate std;

pub mod flags;
pub mod mdl;
pub mod nb;
pub mod nb_list;
pub mod oid;
pub mod status;

pub use flags::{PacketFilter, ReceiveFlags, ReturnFlags, SendCompleteFlags, SendFlags};
pub use mdl::{Mdl, MdlChain};
pub use nb::{chain::NbChain, NetBuffer, NetBufferError};
pub use nb_list::{
    chain::NblChain, counted_queue::NblCountedQueue, queue::NblQueue, NblFlags, NetBufferList,
    SourceHandle,
};
pub use oid::{Oid, PhysicalMedium};
pub use status::NdisStatus;

// NblQueue: can push at both ends, and append other queues in O(1)
// NblChain: can only push & pop at the front, but doesn't need a tail link
//
// Send-complete and return paths partition chains into ours vs. foreign, which
// is why both shapes exist.
