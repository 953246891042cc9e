//! Helpers for working with `NET_BUFFER`s
use alloc::boxed::Box;
use core::{marker::PhantomData, ptr::NonNull};

use crate::{Mdl, MdlChain, NbChain};

pub mod chain;

/// Errors from adjusting the used data space of a [`NetBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetBufferError {
    /// The requested data space does not fit inside of the `MDL` chain
    OutOfBounds,
}

impl core::fmt::Display for NetBufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NetBufferError::OutOfBounds => f.write_str("data space exceeds the mdl chain"),
        }
    }
}

/// Data to send or receive over the network.
///
/// # Validity Invariant
///
/// `data_offset + data_length` never exceeds the total byte count of the
/// `MDL` chain. The fragments may extend past the used data space, since
/// buffers are commonly over-allocated.
pub struct NetBuffer {
    next: Option<Box<NetBuffer>>,
    mdl_chain: MdlChain,
    data_offset: usize,
    data_length: usize,
}

impl NetBuffer {
    /// Creates a detached [`NetBuffer`] over `mdl_chain`, using `data_length`
    /// bytes starting `data_offset` bytes into the chain.
    pub fn new(
        mdl_chain: MdlChain,
        data_offset: usize,
        data_length: usize,
    ) -> Result<Self, NetBufferError> {
        let end = data_offset
            .checked_add(data_length)
            .ok_or(NetBufferError::OutOfBounds)?;

        if end > mdl_chain.total_byte_count() {
            return Err(NetBufferError::OutOfBounds);
        }

        Ok(Self {
            next: None,
            mdl_chain,
            data_offset,
            data_length,
        })
    }

    /// Creates a [`NetBuffer`] with no data and no `MDL`s
    pub fn empty() -> Self {
        Self {
            next: None,
            mdl_chain: MdlChain::new(),
            data_offset: 0,
            data_length: 0,
        }
    }

    /// Creates a [`NetBuffer`] holding a copy of `bytes` in a single `MDL`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut mdl_chain = MdlChain::new();
        mdl_chain.push_front(Mdl::new(bytes));

        Self {
            next: None,
            mdl_chain,
            data_offset: 0,
            data_length: bytes.len(),
        }
    }

    /// Get the current `MDL` and offset into the `MDL` that the driver is using.
    ///
    /// The current `MDL` is the first fragment that actually contains the
    /// byte at `data_offset`, so zero-length fragments in front of the data
    /// are stepped over. Is `None` if there is no used data space.
    pub fn current_mdl_offset(&self) -> Option<(&Mdl, usize)> {
        if self.data_length == 0 {
            return None;
        }

        let mut remaining = self.data_offset;
        for mdl in self.mdl_chain.iter() {
            if remaining < mdl.byte_count() {
                return Some((mdl, remaining));
            }
            remaining -= mdl.byte_count();
        }

        // Validity invariant guarantees that the data start is inside the chain
        None
    }

    /// The `MDL` chain that maps the data buffer holding the network data.
    pub fn mdl_chain(&self) -> &MdlChain {
        &self.mdl_chain
    }

    /// Mutable access to the `MDL` chain.
    ///
    /// Fragments can be rewritten but not resized through this, so the
    /// validity invariant is upheld.
    pub fn first_mdl_mut(&mut self) -> Option<&mut Mdl> {
        self.mdl_chain.first_mut()
    }

    /// The offset (in bytes) from the beginning of the `MDL` chain to
    /// the start of the used network data space in the MDL chain.
    ///
    /// Also the size of the unused data space (in bytes).
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// The data length (in bytes) of the used data space in the MDL chain.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Total number of bytes described by the `MDL` chain
    pub fn capacity(&self) -> usize {
        self.mdl_chain.total_byte_count()
    }

    /// Sets the length of the used data space, keeping the current offset.
    pub fn set_data_length(&mut self, data_length: usize) -> Result<(), NetBufferError> {
        let end = self
            .data_offset
            .checked_add(data_length)
            .ok_or(NetBufferError::OutOfBounds)?;

        if end > self.capacity() {
            return Err(NetBufferError::OutOfBounds);
        }

        self.data_length = data_length;
        Ok(())
    }

    /// Replaces the used data space outright, e.g. when recycling a pooled buffer.
    pub fn reset_data_space(
        &mut self,
        data_offset: usize,
        data_length: usize,
    ) -> Result<(), NetBufferError> {
        let end = data_offset
            .checked_add(data_length)
            .ok_or(NetBufferError::OutOfBounds)?;

        if end > self.capacity() {
            return Err(NetBufferError::OutOfBounds);
        }

        self.data_offset = data_offset;
        self.data_length = data_length;
        Ok(())
    }

    /// Moves the start of the used data space forward by `bytes`, like
    /// `NdisAdvanceNetBufferDataStart` (e.g. after consuming a header).
    pub fn advance(&mut self, bytes: usize) -> Result<(), NetBufferError> {
        if bytes > self.data_length {
            return Err(NetBufferError::OutOfBounds);
        }

        self.data_offset += bytes;
        self.data_length -= bytes;
        Ok(())
    }

    /// Moves the start of the used data space back by `bytes`, like
    /// `NdisRetreatNetBufferDataStart` without allocating new space.
    pub fn retreat(&mut self, bytes: usize) -> Result<(), NetBufferError> {
        if bytes > self.data_offset {
            return Err(NetBufferError::OutOfBounds);
        }

        self.data_offset -= bytes;
        self.data_length += bytes;
        Ok(())
    }

    /// Copies the used data space into `dest`, returning the number of bytes copied.
    ///
    /// Copies at most `dest.len()` bytes.
    pub fn copy_data_to(&self, dest: &mut [u8]) -> usize {
        let Some((mdl, offset)) = self.current_mdl_offset() else {
            return 0;
        };

        let wanted = self.data_length.min(dest.len());
        let mut copied = 0;
        let mut offset = offset;

        for mdl in crate::mdl::Iter::new(Some(mdl)) {
            if copied == wanted {
                break;
            }

            let bytes = &mdl.as_bytes()[offset..];
            let amount = bytes.len().min(wanted - copied);
            dest[copied..copied + amount].copy_from_slice(&bytes[..amount]);

            copied += amount;
            offset = 0;
        }

        copied
    }

    /// Gets the next [`NetBuffer`] in a chain
    pub(crate) fn next_nb(&self) -> Option<&NetBuffer> {
        self.next.as_deref()
    }

    /// Gets a pointer to the next [`NetBuffer`] in a chain
    pub(crate) fn next_nb_ptr(&mut self) -> Option<NonNull<NetBuffer>> {
        self.next.as_deref_mut().map(NonNull::from)
    }

    /// Gets the next [`NetBuffer`] in a chain, and detaches the current
    /// [`NetBuffer`] from the chain.
    pub(crate) fn take_next_nb(&mut self) -> Option<Box<NetBuffer>> {
        self.next.take()
    }

    /// Sets the next [`NetBuffer`] link to point to `next`.
    pub(crate) fn set_next_nb(&mut self, next: Option<Box<NetBuffer>>) {
        debug_assert!(self.next.is_none(), "overwriting an existing nb link");
        self.next = next;
    }
}

impl core::fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetBuffer")
            .field("data_offset", &self.data_offset)
            .field("data_length", &self.data_length)
            .field("mdls", &self.mdl_chain.len())
            .finish_non_exhaustive()
    }
}

/// An iterator over [`NetBuffer`]s in the same chain.
pub struct Iter<'chain> {
    next: Option<&'chain NetBuffer>,
}

impl<'chain> Iter<'chain> {
    /// Creates a new iterator over a chain of [`NetBuffer`]s.
    pub fn new(head: Option<&'chain NetBuffer>) -> Self {
        Self { next: head }
    }
}

impl<'chain> Iterator for Iter<'chain> {
    type Item = &'chain NetBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        // Get the next nb to yield, or bail if it's `None`
        let current = self.next.take()?;

        // Get the next nb in the chain
        self.next = current.next_nb();
        Some(current)
    }
}

impl<'a> core::iter::FusedIterator for Iter<'a> {}

/// A mutable iterator over [`NetBuffer`]s in the same chain.
pub struct IterMut<'chain> {
    next: Option<NonNull<NetBuffer>>,
    chain: PhantomData<&'chain mut NetBuffer>,
}

impl<'chain> IterMut<'chain> {
    /// Creates a new mutable iterator over a chain of [`NetBuffer`]s.
    pub fn new(head: Option<&'chain mut NetBuffer>) -> Self {
        Self {
            next: head.map(NonNull::from),
            chain: PhantomData,
        }
    }
}

impl<'chain> Iterator for IterMut<'chain> {
    type Item = &'chain mut NetBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        // Get the next nb to yield, or bail if it's `None`
        let mut current = self.next.take()?;

        // SAFETY: `IterMut::new` gets `head` from a `&'chain mut`, and every
        // following pointer comes from the `Box` owned by the previous
        // element. Each element is yielded exactly once, and the link to the
        // next element isn't reachable from the yielded reference, so no two
        // live references alias.
        let current = unsafe { current.as_mut() };

        // Get the next nb in the chain
        self.next = current.next_nb_ptr();
        Some(current)
    }
}

impl<'a> core::iter::FusedIterator for IterMut<'a> {}

// SAFETY: Effectively a `&mut NetBuffer` into the chain.
unsafe impl<'a> Send for IterMut<'a> {}
// SAFETY: Effectively a `&mut NetBuffer` into the chain.
unsafe impl<'a> Sync for IterMut<'a> {}

/// An owning iterator over all of the [`NetBuffer`]s in the same chain.
pub struct IntoIter {
    chain: NbChain,
}

impl IntoIter {
    /// Creates an owning iterator over a chain of [`NetBuffer`]s.
    pub fn new(chain: NbChain) -> Self {
        Self { chain }
    }
}

impl Iterator for IntoIter {
    type Item = Box<NetBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chain.pop_front()
    }
}

impl core::iter::FusedIterator for IntoIter {}

#[allow(dead_code)]
fn assert_properties() {
    fn is_send<T: Send>() {}
    fn is_sync<T: Sync>() {}

    is_send::<crate::NetBuffer>();
    is_sync::<crate::NetBuffer>();

    is_send::<crate::NbChain>();
    is_sync::<crate::NbChain>();

    is_send::<Iter<'_>>();
    is_sync::<Iter<'_>>();

    is_send::<IterMut<'_>>();
    is_sync::<IterMut<'_>>();

    is_send::<IntoIter>();
    is_sync::<IntoIter>();
}

#[cfg(test)]
mod test {
    use std::vec;

    use crate::{Mdl, MdlChain, NetBuffer, NetBufferError};

    #[test]
    fn offset_past_chain_rejected() {
        let chain = [Mdl::zeroed(4), Mdl::zeroed(4)]
            .into_iter()
            .collect::<MdlChain>();

        assert_eq!(
            NetBuffer::new(chain, 6, 3).map(|_| ()),
            Err(NetBufferError::OutOfBounds)
        );
    }

    #[test]
    fn current_mdl_skips_empty_and_consumed() {
        let chain = [
            Mdl::zeroed(0),
            Mdl::new(vec![0, 1, 2]),
            Mdl::zeroed(0),
            Mdl::new(vec![3, 4, 5, 6]),
        ]
        .into_iter()
        .collect::<MdlChain>();
        let nb = NetBuffer::new(chain, 4, 2).unwrap();

        let (mdl, offset) = nb.current_mdl_offset().unwrap();
        assert_eq!(mdl.as_bytes(), &[3, 4, 5, 6]);
        assert_eq!(offset, 1);
    }

    #[test]
    fn advance_and_retreat() {
        let mut nb = crate::test::fragmented_nb(&[2, 0, 5]);
        assert_eq!(nb.data_length(), 7);

        nb.advance(3).unwrap();
        assert_eq!((nb.data_offset(), nb.data_length()), (3, 4));
        assert_eq!(nb.advance(5), Err(NetBufferError::OutOfBounds));

        nb.retreat(1).unwrap();
        assert_eq!((nb.data_offset(), nb.data_length()), (2, 5));
        assert_eq!(nb.retreat(3), Err(NetBufferError::OutOfBounds));
    }

    #[test]
    fn reset_data_space_bounds() {
        let mut nb = crate::test::fragmented_nb(&[4, 4]);
        nb.advance(5).unwrap();

        nb.reset_data_space(2, 6).unwrap();
        assert_eq!((nb.data_offset(), nb.data_length()), (2, 6));
        assert_eq!(nb.reset_data_space(2, 7), Err(NetBufferError::OutOfBounds));
        assert_eq!((nb.data_offset(), nb.data_length()), (2, 6));
    }

    #[test]
    fn copy_data_honours_offset_and_length() {
        let mut nb = crate::test::fragmented_nb(&[3, 0, 2, 4]);
        nb.advance(2).unwrap();
        nb.set_data_length(4).unwrap();

        let mut out = [0xffu8; 8];
        let copied = nb.copy_data_to(&mut out);

        assert_eq!(copied, 4);
        assert_eq!(&out[..4], &[2, 3, 4, 5]);
        assert_eq!(out[4], 0xff);
    }

    #[test]
    fn empty_data_has_no_current_mdl() {
        let nb = NetBuffer::empty();
        assert!(nb.current_mdl_offset().is_none());
        assert_eq!(nb.copy_data_to(&mut [0; 4]), 0);
    }
}
