//! Helpers for working with `NET_BUFFER_LIST`s

use alloc::boxed::Box;
use core::{marker::PhantomData, num::NonZeroUsize, ptr::NonNull};

use crate::{NbChain, NdisStatus, NetBuffer, NblChain};

pub mod chain;
pub mod counted_queue;
pub mod queue;

bitflags::bitflags! {
    /// `NDIS_NBL_FLAGS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NblFlags: u32 {
        const SEND_READ_ONLY = 0x0000_0001;
        const RECV_READ_ONLY = 0x0000_0002;
        const HD_SPLIT = 0x0000_0100;
        const IS_IPV4 = 0x0000_0200;
        const IS_IPV6 = 0x0000_0400;
        const IS_TCP = 0x0000_0800;
        const IS_UDP = 0x0000_1000;
        /// Set by NDIS on receive indications of packets that were looped
        /// back from the send path
        const IS_LOOPBACK_PACKET = 0x0000_8000;
    }
}

/// Identifies the driver that allocated (and must eventually free) a
/// [`NetBufferList`], like the `SourceHandle` field of a `NET_BUFFER_LIST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SourceHandle(NonZeroUsize);

impl SourceHandle {
    /// Creates a handle from a raw value, with 0 representing no handle
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub const fn raw(self) -> usize {
        self.0.get()
    }
}

/// A batch of [`NetBuffer`]s, the unit of send completion and of receive
/// return.
pub struct NetBufferList {
    next: Option<Box<NetBufferList>>,
    nb_chain: NbChain,
    flags: NblFlags,
    source_handle: Option<SourceHandle>,
    status: NdisStatus,
    /// Index of the pool size class this list was allocated from
    pool_class: Option<usize>,
}

impl NetBufferList {
    /// Creates a detached [`NetBufferList`] holding `nb_chain`
    pub fn new(nb_chain: NbChain) -> Self {
        Self {
            next: None,
            nb_chain,
            flags: NblFlags::empty(),
            source_handle: None,
            status: NdisStatus::SUCCESS,
            pool_class: None,
        }
    }

    /// Creates a detached [`NetBufferList`] holding just `nb`
    pub fn from_net_buffer(nb: NetBuffer) -> Self {
        Self::new(core::iter::once(nb).collect())
    }

    pub fn nb_chain(&self) -> &NbChain {
        &self.nb_chain
    }

    pub fn nb_chain_mut(&mut self) -> &mut NbChain {
        &mut self.nb_chain
    }

    /// Gets the `NDIS_NBL_FLAGS_*` of the nbl
    pub fn flags(&self) -> NblFlags {
        self.flags
    }

    /// Gets a mutable reference to the `NDIS_NBL_FLAGS_*` of the nbl
    pub fn flags_mut(&mut self) -> &mut NblFlags {
        &mut self.flags
    }

    /// Handle of the driver that allocated this nbl, if it was tagged
    pub fn source_handle(&self) -> Option<SourceHandle> {
        self.source_handle
    }

    pub fn set_source_handle(&mut self, handle: Option<SourceHandle>) {
        self.source_handle = handle;
    }

    /// Completion status of the nbl
    pub fn status(&self) -> NdisStatus {
        self.status
    }

    pub fn set_status(&mut self, status: NdisStatus) {
        self.status = status;
    }

    pub fn pool_class(&self) -> Option<usize> {
        self.pool_class
    }

    pub fn set_pool_class(&mut self, class: Option<usize>) {
        self.pool_class = class;
    }

    /// Gets the next [`NetBufferList`] in a chain
    pub(crate) fn next_nbl(&self) -> Option<&NetBufferList> {
        self.next.as_deref()
    }

    /// Gets a pointer to the next [`NetBufferList`] in a chain
    pub(crate) fn next_nbl_ptr(&mut self) -> Option<NonNull<NetBufferList>> {
        self.next.as_deref_mut().map(NonNull::from)
    }

    /// Gets the next [`NetBufferList`] in a chain, and detaches the current
    /// [`NetBufferList`] from the chain.
    pub(crate) fn take_next_nbl(&mut self) -> Option<Box<NetBufferList>> {
        self.next.take()
    }

    /// Sets the next [`NetBufferList`] link to point to `next`.
    pub(crate) fn set_next_nbl(&mut self, next: Option<Box<NetBufferList>>) {
        self.next = next;
    }
}

impl core::fmt::Debug for NetBufferList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetBufferList")
            .field("flags", &self.flags)
            .field("source_handle", &self.source_handle)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// An iterator over [`NetBufferList`]s in the same chain.
pub struct Iter<'chain> {
    next: Option<&'chain NetBufferList>,
}

impl<'chain> Iter<'chain> {
    /// Creates a new iterator over a chain of [`NetBufferList`]s.
    pub fn new(head: Option<&'chain NetBufferList>) -> Self {
        Self { next: head }
    }
}

impl<'chain> Iterator for Iter<'chain> {
    type Item = &'chain NetBufferList;

    fn next(&mut self) -> Option<Self::Item> {
        // Get the next nbl to yield, or bail if it's `None`
        let current = self.next.take()?;

        // Get the next nbl in the chain
        self.next = current.next_nbl();
        Some(current)
    }
}

impl<'a> core::iter::FusedIterator for Iter<'a> {}

/// A mutable iterator over [`NetBufferList`]s in the same chain.
pub struct IterMut<'chain> {
    next: Option<NonNull<NetBufferList>>,
    chain: PhantomData<&'chain mut NetBufferList>,
}

impl<'chain> IterMut<'chain> {
    /// Creates a new mutable iterator over a chain of [`NetBufferList`]s.
    pub fn new(head: Option<&'chain mut NetBufferList>) -> Self {
        Self {
            next: head.map(NonNull::from),
            chain: PhantomData,
        }
    }
}

impl<'chain> Iterator for IterMut<'chain> {
    type Item = &'chain mut NetBufferList;

    fn next(&mut self) -> Option<Self::Item> {
        // Get the next nbl to yield, or bail if it's `None`
        let mut current = self.next.take()?;

        // SAFETY: `IterMut::new` gets `head` from a `&'chain mut`, and every
        // following pointer comes from the `Box` owned by the previous
        // element. The link is private and never touched through the yielded
        // references, so while mutable references can exist to different
        // elements in the chain, none of them alias.
        let current = unsafe { current.as_mut() };

        // Get the next nbl in the chain
        self.next = current.next_nbl_ptr();
        Some(current)
    }
}

impl<'a> core::iter::FusedIterator for IterMut<'a> {}

// SAFETY: Effectively a `&mut NetBufferList` into the chain.
unsafe impl<'a> Send for IterMut<'a> {}
// SAFETY: Effectively a `&mut NetBufferList` into the chain.
unsafe impl<'a> Sync for IterMut<'a> {}

/// An owning iterator over all of the [`NetBufferList`]s in the same chain.
pub struct IntoIter {
    chain: NblChain,
}

impl IntoIter {
    /// Creates an owning iterator over a chain of [`NetBufferList`]s.
    pub fn new(chain: NblChain) -> Self {
        Self { chain }
    }
}

impl Iterator for IntoIter {
    type Item = Box<NetBufferList>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chain.pop_front()
    }
}

impl core::iter::FusedIterator for IntoIter {}

#[allow(dead_code)]
fn assert_properties() {
    fn is_send<T: Send>() {}
    fn is_sync<T: Sync>() {}

    is_send::<crate::NetBufferList>();
    is_sync::<crate::NetBufferList>();

    is_send::<crate::NblChain>();
    is_sync::<crate::NblChain>();

    is_send::<crate::NblQueue>();
    is_sync::<crate::NblQueue>();

    is_send::<crate::NblCountedQueue>();
    is_sync::<crate::NblCountedQueue>();

    is_send::<Iter<'_>>();
    is_sync::<Iter<'_>>();

    is_send::<IterMut<'_>>();
    is_sync::<IterMut<'_>>();

    is_send::<IntoIter>();
    is_sync::<IntoIter>();
}
