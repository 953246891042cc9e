//! Scatter-gather descriptors
//!
//! The switch sees every packet as an [`SgBuf`]: an ordered list of byte
//! segments plus the total length. Descriptors built from a [`NetBuffer`]
//! borrow its fragments; [`SgBuf::to_owned_copy`] produces one that owns a
//! private copy of the bytes.
//!
//! [`NetBuffer`]: ndis_rs::NetBuffer

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Number of segments a descriptor can hold without a heap allocation
pub const INLINE_SEGMENTS: usize = 8;

#[derive(Debug, Clone)]
enum Segments<'a> {
    Inline(heapless::Vec<Cow<'a, [u8]>, INLINE_SEGMENTS>),
    /// Fixed capacity, never grown after construction
    Heap(Vec<Cow<'a, [u8]>>),
}

/// A packet as seen by the switch
#[derive(Debug, Clone)]
pub struct SgBuf<'a> {
    total_len: usize,
    segments: Segments<'a>,
}

impl Default for SgBuf<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SgBuf<'a> {
    /// Creates an empty descriptor with the inline segment capacity
    pub fn new() -> Self {
        Self {
            total_len: 0,
            segments: Segments::Inline(heapless::Vec::new()),
        }
    }

    /// Creates an empty descriptor able to hold `segments` segments
    ///
    /// ## Errors
    ///
    /// - [`Error::Resources`] if the segment array couldn't be allocated
    pub fn with_capacity(segments: usize) -> Result<Self> {
        if segments <= INLINE_SEGMENTS {
            return Ok(Self::new());
        }

        let mut heap = Vec::new();
        heap.try_reserve_exact(segments)
            .map_err(|_| Error::Resources)?;

        Ok(Self {
            total_len: 0,
            segments: Segments::Heap(heap),
        })
    }

    /// Builds a descriptor viewing `segments`, leaving out empty ones
    ///
    /// ## Errors
    ///
    /// - [`Error::Resources`] if the segment array couldn't be allocated
    pub fn from_segments(segments: &[&'a [u8]]) -> Result<Self> {
        let used = segments.iter().filter(|segment| !segment.is_empty()).count();
        let mut sg = Self::with_capacity(used)?;

        for segment in segments.iter().filter(|segment| !segment.is_empty()) {
            sg.push_segment(Cow::Borrowed(*segment))?;
        }

        Ok(sg)
    }

    /// Total number of bytes across all segments
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Maximum number of segments this descriptor can hold
    pub fn capacity(&self) -> usize {
        match &self.segments {
            Segments::Inline(_) => INLINE_SEGMENTS,
            Segments::Heap(heap) => heap.capacity(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.as_slice().len()
    }

    /// Iterates over the segments in order
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        self.as_slice().iter().map(|segment| segment.as_ref())
    }

    /// Whether every segment is a view into memory owned by someone else
    pub fn is_view(&self) -> bool {
        self.as_slice()
            .iter()
            .all(|segment| matches!(segment, Cow::Borrowed(_)))
    }

    /// Appends a non-empty segment
    ///
    /// ## Errors
    ///
    /// - [`Error::Resources`] if the descriptor is already full
    pub fn push_segment(&mut self, segment: Cow<'a, [u8]>) -> Result<()> {
        debug_assert!(!segment.is_empty(), "zero-length segments are never pushed");
        let len = segment.len();

        match &mut self.segments {
            Segments::Inline(inline) => inline.push(segment).map_err(|_| Error::Resources)?,
            Segments::Heap(heap) => {
                if heap.len() == heap.capacity() {
                    return Err(Error::Resources);
                }
                heap.push(segment);
            }
        }

        self.total_len += len;
        Ok(())
    }

    /// Removes all segments, keeping the capacity
    pub fn clear(&mut self) {
        match &mut self.segments {
            Segments::Inline(inline) => inline.clear(),
            Segments::Heap(heap) => heap.clear(),
        }
        self.total_len = 0;
    }

    /// Copies the segments back to back into `dest`, returning the number of
    /// bytes copied. Copies at most `dest.len()` bytes.
    pub fn copy_to(&self, dest: &mut [u8]) -> usize {
        let mut copied = 0;

        for segment in self.segments() {
            if copied == dest.len() {
                break;
            }

            let amount = segment.len().min(dest.len() - copied);
            dest[copied..copied + amount].copy_from_slice(&segment[..amount]);
            copied += amount;
        }

        copied
    }

    /// The concatenated bytes of all segments
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_len);
        for segment in self.segments() {
            bytes.extend_from_slice(segment);
        }
        bytes
    }

    /// Makes a descriptor owning a private, contiguous copy of the bytes, so
    /// that it can outlive the buffer it was built from.
    ///
    /// ## Errors
    ///
    /// - [`Error::Resources`] if the copy couldn't be allocated
    pub fn to_owned_copy(&self) -> Result<SgBuf<'static>> {
        let mut copy = SgBuf::new();
        if self.total_len == 0 {
            return Ok(copy);
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(self.total_len)
            .map_err(|_| Error::Resources)?;
        for segment in self.segments() {
            bytes.extend_from_slice(segment);
        }

        copy.push_segment(Cow::Owned(bytes))?;
        Ok(copy)
    }

    fn as_slice(&self) -> &[Cow<'a, [u8]>] {
        match &self.segments {
            Segments::Inline(inline) => inline.as_slice(),
            Segments::Heap(heap) => heap.as_slice(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::borrow::Cow;

    use super::{SgBuf, INLINE_SEGMENTS};
    use crate::error::Error;

    #[test]
    fn inline_until_full() {
        let bytes = [1u8; 4];
        let mut sg = SgBuf::new();

        for _ in 0..INLINE_SEGMENTS {
            sg.push_segment(Cow::Borrowed(&bytes)).unwrap();
        }

        assert_eq!(sg.total_len(), 4 * INLINE_SEGMENTS);
        assert_eq!(
            sg.push_segment(Cow::Borrowed(&bytes)),
            Err(Error::Resources)
        );
        assert_eq!(sg.total_len(), 4 * INLINE_SEGMENTS);
    }

    #[test]
    fn heap_capacity_is_fixed() {
        let bytes = [7u8; 2];
        let mut sg = SgBuf::with_capacity(INLINE_SEGMENTS + 2).unwrap();
        let capacity = sg.capacity();
        assert!(capacity >= INLINE_SEGMENTS + 2);

        for _ in 0..capacity {
            sg.push_segment(Cow::Borrowed(&bytes)).unwrap();
        }
        assert_eq!(
            sg.push_segment(Cow::Borrowed(&bytes)),
            Err(Error::Resources)
        );
    }

    #[test]
    fn from_segments_skips_empty() {
        let sg = SgBuf::from_segments(&[&[1, 2], &[], &[3]]).unwrap();

        assert_eq!(sg.segment_count(), 2);
        assert_eq!(sg.to_vec(), [1, 2, 3]);
        assert!(sg.is_view());
    }

    #[test]
    fn copy_to_short_destination() {
        let sg = SgBuf::from_segments(&[&[1, 2, 3], &[4, 5]]).unwrap();
        let mut dest = [0u8; 4];

        assert_eq!(sg.copy_to(&mut dest), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
    }

    #[test]
    fn owned_copy_outlives_source() {
        let owned = {
            let source = vec![9u8, 8, 7];
            let sg = SgBuf::from_segments(&[&source[..1], &source[1..]]).unwrap();
            sg.to_owned_copy().unwrap()
        };

        assert_eq!(owned.segment_count(), 1);
        assert_eq!(owned.to_vec(), [9, 8, 7]);
        assert!(!owned.is_view());
    }
}
