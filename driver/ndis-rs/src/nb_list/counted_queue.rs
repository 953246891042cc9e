//! A [`NblQueue`] that keeps track of the queue length.

use alloc::boxed::Box;

use crate::{NblChain, NblQueue, NetBufferList};

use super::{Iter, IterMut};

/// A [`NblQueue`] that keeps track of the queue length.
#[derive(Debug, Default)]
pub struct NblCountedQueue {
    /// Backing queue
    queue: NblQueue,
    length: usize,
}

impl NblCountedQueue {
    /// Creates a new empty [`NblCountedQueue`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the length of the counted queue
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Pushes a [`NetBufferList`] at the back of the queue
    ///
    /// Completes in O(1) time
    pub fn push_back(&mut self, nbl: Box<NetBufferList>) {
        self.queue.push_back(nbl);
        self.length += 1;
        self.assert_valid();
    }

    /// Pushes a [`NetBufferList`] at the front of the queue
    ///
    /// Completes in O(1) time
    pub fn push_front(&mut self, nbl: Box<NetBufferList>) {
        self.queue.push_front(nbl);
        self.length += 1;
        self.assert_valid();
    }

    /// Pops the next [`NetBufferList`] from the front of the queue
    ///
    /// Completes in O(1) time
    pub fn pop_front(&mut self) -> Option<Box<NetBufferList>> {
        let nbl = self.queue.pop_front()?;
        self.length -= 1;
        self.assert_valid();
        Some(nbl)
    }

    /// Moves all of the elements of `other` to the back of this queue
    ///
    /// Completes in O(1) time
    pub fn append(&mut self, other: &mut NblCountedQueue) {
        self.queue.append(&mut other.queue);
        self.length += core::mem::take(&mut other.length);
        self.assert_valid();
    }

    /// Creates an iterator over all of the [`NetBufferList`]s in the queue
    pub fn iter(&self) -> Iter<'_> {
        self.queue.iter()
    }

    /// Creates a mutable iterator over all of the [`NetBufferList`]s in the queue
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        self.queue.iter_mut()
    }

    /// Drops the length tracking, yielding the backing queue
    pub fn into_queue(self) -> NblQueue {
        self.queue
    }

    /// Ensures that the counted queue is valid
    fn assert_valid(&self) {
        if cfg!(debug_assertions) {
            self.queue.assert_valid();

            let real_len = self.iter().count();
            debug_assert_eq!(self.length, real_len, "mismatch in counted queue length");
        }
    }
}

impl From<NblChain> for NblCountedQueue {
    fn from(chain: NblChain) -> Self {
        let queue = NblQueue::from(chain);
        let length = queue.iter().count();

        Self { queue, length }
    }
}

impl From<NblCountedQueue> for NblChain {
    fn from(queue: NblCountedQueue) -> Self {
        queue.into_queue().into()
    }
}
