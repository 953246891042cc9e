//! A singly-linked list of [`NetBuffer`]s.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::{IntoIter, Iter, IterMut, NetBuffer};

/// A singly-linked list of [`NetBuffer`]s.
///
/// A [`NbChain`] owns all of the [`NetBuffer`]s that it comprises.
#[derive(Debug, Default)]
pub struct NbChain {
    head: Option<Box<NetBuffer>>,
}

impl NbChain {
    /// Creates an empty [`NbChain`]
    pub fn empty() -> Self {
        Self { head: None }
    }

    /// Gets the first element of the chain
    ///
    /// Completes in O(1) time
    pub fn first(&self) -> Option<&NetBuffer> {
        self.head.as_deref()
    }

    /// Gets a mutable reference to the first element of the chain
    ///
    /// Completes in O(1) time
    pub fn first_mut(&mut self) -> Option<&mut NetBuffer> {
        self.head.as_deref_mut()
    }

    /// Pushes a [`NetBuffer`] at the front of the chain
    ///
    /// Completes in O(1) time
    pub fn push_front(&mut self, nb: Box<NetBuffer>) {
        let mut nb = nb;

        debug_assert!(
            nb.next_nb().is_none(),
            "nb to add to the chain must be detached"
        );

        nb.set_next_nb(self.head.take());
        self.head = Some(nb);
    }

    /// Pops the next [`NetBuffer`] from the front of the chain
    ///
    /// Completes in O(1) time
    pub fn pop_front(&mut self) -> Option<Box<NetBuffer>> {
        let mut current = self.head.take()?;

        // Break the link with the next `NetBuffer` so that we don't
        // accidentally take the rest of the chain with `current`.
        self.head = current.take_next_nb();

        Some(current)
    }

    /// Number of [`NetBuffer`]s in the chain
    ///
    /// Completes in O(n) time
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Creates an iterator over all of the [`NetBuffer`]s in the chain
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.head.as_deref())
    }

    /// Creates a mutable iterator over all of the [`NetBuffer`]s in the chain
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        IterMut::new(self.head.as_deref_mut())
    }
}

impl FromIterator<NetBuffer> for NbChain {
    fn from_iter<T: IntoIterator<Item = NetBuffer>>(iter: T) -> Self {
        let mut nbs = iter.into_iter().collect::<Vec<_>>();
        let mut chain = NbChain::empty();

        while let Some(nb) = nbs.pop() {
            chain.push_front(Box::new(nb));
        }

        chain
    }
}

impl IntoIterator for NbChain {
    type Item = Box<NetBuffer>;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self)
    }
}

impl Drop for NbChain {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(mut nb) = next {
            next = nb.take_next_nb();
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use crate::{NbChain, NetBuffer};

    #[test]
    fn create_empty_chain() {
        let chain = NbChain::empty();

        assert_eq!(chain.iter().count(), 0);
        assert!(chain.is_empty());
    }

    #[test]
    fn collect_keeps_order() {
        let chain = [1usize, 2, 3]
            .into_iter()
            .map(|len| NetBuffer::from_bytes(&[0; 8][..len]))
            .collect::<NbChain>();

        let lengths = chain.iter().map(NetBuffer::data_length).collect::<Vec<_>>();
        assert_eq!(lengths, [1, 2, 3]);
    }

    #[test]
    fn iter_mut_visits_every_nb() {
        let mut chain = (0..4)
            .map(|_| NetBuffer::from_bytes(&[0xaa; 16]))
            .collect::<NbChain>();

        for (index, nb) in chain.iter_mut().enumerate() {
            nb.advance(index).unwrap();
        }

        let lengths = chain.into_iter().map(|nb| nb.data_length()).collect::<Vec<_>>();
        assert_eq!(lengths, [16, 15, 14, 13]);
    }
}
