//! A queue of [`NetBufferList`] with O(1) append of single elements.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::{NblChain, NetBufferList};

use super::{Iter, IterMut};

/// A queue of [`NetBufferList`] with O(1) append of single elements.
#[derive(Debug, Default)]
pub struct NblQueue {
    /// Points to the head of the queue (the next element to pop), or `None` if
    /// the queue is empty.
    head: Option<Box<NetBufferList>>,
    /// Points to the tail of the queue (the next element to append after), or
    /// `None` if the queue is empty.
    ///
    /// Invariant: Always points into the chain owned by `head`.
    tail: Option<NonNull<NetBufferList>>,
}

// SAFETY: `tail` only ever points into the chain that the queue owns through
// `head`, so the queue is as thread-safe as a `Box<NetBufferList>`.
unsafe impl Send for NblQueue {}
// SAFETY: `tail` is only dereferenced behind a `&mut self`.
unsafe impl Sync for NblQueue {}

impl NblQueue {
    /// Creates a new empty [`NblQueue`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Gets the first element of the queue
    ///
    /// Completes in O(1) time
    pub fn first(&self) -> Option<&NetBufferList> {
        self.head.as_deref()
    }

    /// Pushes a [`NetBufferList`] at the front of the queue
    ///
    /// Completes in O(1) time
    pub fn push_front(&mut self, nbl: Box<NetBufferList>) {
        self.assert_valid();

        let mut nbl = nbl;
        debug_assert!(
            nbl.next_nbl().is_none(),
            "nbl to add to the queue must be detached"
        );

        // Link the new nbl to the old head
        nbl.set_next_nbl(self.head.take());
        let head = self.head.insert(nbl);

        if self.tail.is_none() {
            // The queue was empty, so the new head is now also the tail
            self.tail = Some(NonNull::from(&mut **head));
        }

        self.assert_valid();
    }

    /// Pushes a [`NetBufferList`] at the back of the queue
    ///
    /// Completes in O(1) time
    pub fn push_back(&mut self, nbl: Box<NetBufferList>) {
        self.assert_valid();

        debug_assert!(
            nbl.next_nbl().is_none(),
            "nbl to add to the queue must be detached"
        );

        let new_tail = match self.tail {
            Some(mut tail) => {
                // SAFETY: By the invariant of `tail`, it points to the last
                // element of the chain owned by `head`, which we have
                // exclusive access to through `&mut self`.
                let tail = unsafe { tail.as_mut() };
                tail.set_next_nbl(Some(nbl));
                tail.next_nbl_ptr()
            }
            None => {
                // The queue was empty, so the new tail is now also the head
                let head = self.head.insert(nbl);
                Some(NonNull::from(&mut **head))
            }
        };
        self.tail = new_tail;

        self.assert_valid();
    }

    /// Pops the next [`NetBufferList`] from the front of the queue
    ///
    /// Completes in O(1) time
    pub fn pop_front(&mut self) -> Option<Box<NetBufferList>> {
        self.assert_valid();

        let mut current = self.head.take()?;

        // Take & break the link with the next `NetBufferList` so that we don't
        // accidentally take the rest of the chain with `current`.
        self.head = current.take_next_nbl();

        // Fixup the queue links
        if self.head.is_none() {
            // If the queue is empty, both links should be empty
            self.tail = None;
        }

        self.assert_valid();

        Some(current)
    }

    /// Moves all of the elements of `other` to the back of this queue
    ///
    /// Completes in O(1) time
    pub fn append(&mut self, other: &mut NblQueue) {
        self.assert_valid();
        other.assert_valid();

        let Some(other_head) = other.head.take() else {
            return;
        };
        let other_tail = other.tail.take();

        match self.tail {
            Some(mut tail) => {
                // SAFETY: By the invariant of `tail`, it points to the last
                // element of the chain owned by `head`.
                unsafe { tail.as_mut() }.set_next_nbl(Some(other_head));
            }
            None => self.head = Some(other_head),
        }
        self.tail = other_tail;

        self.assert_valid();
    }

    /// Creates an iterator over all of the [`NetBufferList`]s in the queue
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.head.as_deref())
    }

    /// Creates a mutable iterator over all of the [`NetBufferList`]s in the queue
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        IterMut::new(self.head.as_deref_mut())
    }

    /// Takes the whole chain out of the queue, leaving it empty
    pub(crate) fn take_head(&mut self) -> Option<Box<NetBufferList>> {
        self.tail = None;
        self.head.take()
    }

    /// Ensures that the queue is valid (only up to all of the nbls in the chain)
    pub(super) fn assert_valid(&self) {
        if cfg!(debug_assertions) {
            if self.head.is_some() {
                // `self.tail` should be equal to the last element in the queue
                let tail = self.tail.expect("tail should be Some if head is Some");
                let real_tail = self.iter().last().expect("queue is not empty");
                debug_assert_eq!(
                    tail.as_ptr().cast_const(),
                    real_tail as *const _,
                    "tail should point to the actual last element"
                );
            } else {
                // Both the head and tail should be `None` if the queue is empty
                debug_assert!(
                    self.tail.is_none(),
                    "head and tail in an empty NblQueue must both be None"
                );
            }
        }
    }
}

impl From<NblChain> for NblQueue {
    fn from(chain: NblChain) -> Self {
        let mut chain = chain;
        let mut queue = NblQueue::new();

        // Relinking one at a time finds the tail
        while let Some(nbl) = chain.pop_front() {
            queue.push_back(nbl);
        }

        queue
    }
}

impl FromIterator<Box<NetBufferList>> for NblQueue {
    fn from_iter<T: IntoIterator<Item = Box<NetBufferList>>>(iter: T) -> Self {
        let mut queue = NblQueue::new();
        for nbl in iter {
            queue.push_back(nbl);
        }
        queue
    }
}

impl Drop for NblQueue {
    fn drop(&mut self) {
        let mut next = self.take_head();
        while let Some(mut nbl) = next {
            next = nbl.take_next_nbl();
        }
    }
}
