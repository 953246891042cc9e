// MdlChain: Start of an MdlChain, has no offset
// Mdl: One fragment in the chain, may be zero-length
//
// Offsets into the chain are tracked by the owning `NetBuffer`.

use alloc::boxed::Box;
use alloc::vec::Vec;

/// A single memory descriptor as part of an [`MdlChain`].
///
/// Describes one contiguous fragment of packet memory. Fragments can
/// legitimately be zero bytes long.
pub struct Mdl {
    /// Next fragment in the chain
    next: Option<Box<Mdl>>,
    /// Memory described by this fragment
    buffer: Box<[u8]>,
}

impl Mdl {
    /// Creates a detached [`Mdl`] describing `buffer`
    pub fn new(buffer: impl Into<Box<[u8]>>) -> Self {
        Self {
            next: None,
            buffer: buffer.into(),
        }
    }

    /// Creates a detached [`Mdl`] describing `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        Self::new(alloc::vec![0; len])
    }

    /// Gets the byte length of the MDL's buffer
    pub fn byte_count(&self) -> usize {
        self.buffer.len()
    }

    /// Gets the memory described by this fragment
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Gets mutable access to the memory described by this fragment
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Gets the next [`Mdl`] in a chain
    pub fn next_mdl(&self) -> Option<&Mdl> {
        self.next.as_deref()
    }

    /// Gets the next [`Mdl`] in a chain, and detaches the current
    /// [`Mdl`] from the chain.
    pub(crate) fn take_next_mdl(&mut self) -> Option<Box<Mdl>> {
        self.next.take()
    }
}

impl core::fmt::Debug for Mdl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "Mdl {{ byte_count: {} }} @ {:#x?}",
            self.byte_count(),
            self as *const _
        ))
    }
}

/// A singly-linked list of [`Mdl`]s.
///
/// A [`MdlChain`] owns all of the [`Mdl`]s that it comprises.
#[derive(Debug, Default)]
pub struct MdlChain {
    head: Option<Box<Mdl>>,
}

// Same size as the raw `PMDL` head it stands in for
static_assertions::assert_eq_size!(MdlChain, *mut u8);

impl MdlChain {
    /// Creates a new empty [`MdlChain`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the first [`Mdl`] in the chain
    ///
    /// Completes in O(1) time
    pub fn first(&self) -> Option<&Mdl> {
        self.head.as_deref()
    }

    /// Gets a mutable reference to the first [`Mdl`] in the chain
    ///
    /// Completes in O(1) time
    pub fn first_mut(&mut self) -> Option<&mut Mdl> {
        self.head.as_deref_mut()
    }

    /// Pushes an [`Mdl`] at the front of the chain
    ///
    /// Completes in O(1) time
    pub fn push_front(&mut self, mut mdl: Mdl) {
        debug_assert!(
            mdl.next.is_none(),
            "mdl to add to the chain must be detached"
        );

        mdl.next = self.head.take();
        self.head = Some(Box::new(mdl));
    }

    /// Pushes an [`Mdl`] at the back of the chain
    ///
    /// Completes in O(n) time
    pub fn push_back(&mut self, mdl: Mdl) {
        debug_assert!(
            mdl.next.is_none(),
            "mdl to add to the chain must be detached"
        );

        let mut link = &mut self.head;
        while let Some(current) = link {
            link = &mut current.next;
        }
        *link = Some(Box::new(mdl));
    }

    /// Pops the first [`Mdl`] from the front of the chain
    ///
    /// Completes in O(1) time
    pub fn pop_front(&mut self) -> Option<Mdl> {
        let mut current = self.head.take()?;
        self.head = current.take_next_mdl();
        Some(*current)
    }

    /// Number of fragments in the chain
    ///
    /// Completes in O(n) time
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Sum of the byte counts of all fragments in the chain
    ///
    /// Completes in O(n) time
    pub fn total_byte_count(&self) -> usize {
        self.iter().map(Mdl::byte_count).sum()
    }

    /// Creates an iterator over all of the [`Mdl`]s in the chain
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.as_deref(),
        }
    }
}

impl FromIterator<Mdl> for MdlChain {
    fn from_iter<T: IntoIterator<Item = Mdl>>(iter: T) -> Self {
        let mut fragments = iter.into_iter().collect::<Vec<_>>();
        let mut chain = MdlChain::new();

        while let Some(mdl) = fragments.pop() {
            chain.push_front(mdl);
        }

        chain
    }
}

impl Drop for MdlChain {
    fn drop(&mut self) {
        // Unlink iteratively so long chains don't recurse through `Box` drops
        let mut next = self.head.take();
        while let Some(mut mdl) = next {
            next = mdl.take_next_mdl();
        }
    }
}

/// An iterator over [`Mdl`]s in the same chain.
pub struct Iter<'chain> {
    next: Option<&'chain Mdl>,
}

impl<'chain> Iter<'chain> {
    /// Creates an iterator starting at `head` and continuing to the end of its chain
    pub fn new(head: Option<&'chain Mdl>) -> Self {
        Self { next: head }
    }
}

impl<'chain> Iterator for Iter<'chain> {
    type Item = &'chain Mdl;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.next_mdl();
        Some(current)
    }
}

impl<'a> core::iter::FusedIterator for Iter<'a> {}

#[allow(dead_code)]
fn assert_properties() {
    fn is_send<T: Send>() {}
    fn is_sync<T: Sync>() {}

    is_send::<Mdl>();
    is_sync::<Mdl>();

    is_send::<MdlChain>();
    is_sync::<MdlChain>();

    is_send::<Iter<'_>>();
    is_sync::<Iter<'_>>();
}
