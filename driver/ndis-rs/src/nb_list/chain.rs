//! A singly-linked list of [`NetBufferList`]s.

use alloc::boxed::Box;

use super::{IntoIter, Iter, IterMut, NetBufferList};
use crate::NblQueue;

/// A singly-linked list of [`NetBufferList`]s.
///
/// A [`NblChain`] owns all of the [`NetBufferList`]s that it comprises.
#[derive(Debug, Default)]
pub struct NblChain {
    head: Option<Box<NetBufferList>>,
}

// Same size as the raw `PNET_BUFFER_LIST` head it stands in for
static_assertions::assert_eq_size!(NblChain, *mut u8);

impl NblChain {
    /// Creates an empty [`NblChain`]
    pub fn empty() -> Self {
        Self { head: None }
    }

    /// Gets the first element of the chain
    ///
    /// Completes in O(1) time
    pub fn first(&self) -> Option<&NetBufferList> {
        self.head.as_deref()
    }

    /// Gets a mutable reference to the first element of the chain
    ///
    /// Completes in O(1) time
    pub fn first_mut(&mut self) -> Option<&mut NetBufferList> {
        self.head.as_deref_mut()
    }

    /// Gets the last element in the chain
    ///
    /// Completes in O(n) time
    pub fn last(&self) -> Option<&NetBufferList> {
        self.iter().last()
    }

    /// Pushes a [`NetBufferList`] at the front of the chain
    ///
    /// Completes in O(1) time
    pub fn push_front(&mut self, nbl: Box<NetBufferList>) {
        let mut nbl = nbl;

        debug_assert!(
            nbl.next_nbl().is_none(),
            "nbl to add to the chain must be detached"
        );

        // Link the new nbl to the old head
        nbl.set_next_nbl(self.head.take());
        self.head = Some(nbl);
    }

    /// Pops the next [`NetBufferList`] from the front of the chain
    ///
    /// Completes in O(1) time
    pub fn pop_front(&mut self) -> Option<Box<NetBufferList>> {
        let mut current = self.head.take()?;

        // Take & break the link with the next `NetBufferList` so that we don't
        // accidentally take the rest of the chain with `current`.
        self.head = current.take_next_nbl();

        Some(current)
    }

    /// Number of [`NetBufferList`]s in the chain
    ///
    /// Completes in O(n) time
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Creates an iterator over all of the [`NetBufferList`]s in the chain
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.head.as_deref())
    }

    /// Creates a mutable iterator over all of the [`NetBufferList`]s in the chain
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        IterMut::new(self.head.as_deref_mut())
    }
}

impl From<NblQueue> for NblChain {
    fn from(queue: NblQueue) -> Self {
        let mut queue = queue;
        Self {
            head: queue.take_head(),
        }
    }
}

impl FromIterator<Box<NetBufferList>> for NblChain {
    fn from_iter<T: IntoIterator<Item = Box<NetBufferList>>>(iter: T) -> Self {
        iter.into_iter().collect::<NblQueue>().into()
    }
}

impl IntoIterator for NblChain {
    type Item = Box<NetBufferList>;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self)
    }
}

impl Drop for NblChain {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(mut nbl) = next {
            next = nbl.take_next_nbl();
        }
    }
}
