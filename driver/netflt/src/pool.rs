//! Buffer list pools
//!
//! Frames the filter injects are built in pre-sized buffer lists taken from
//! fixed size classes, so that the data path doesn't need a fresh allocation
//! per packet.

use core::sync::atomic::{AtomicUsize, Ordering};

use ndis_rs::{Mdl, MdlChain, NblFlags, NdisStatus, NetBuffer, NetBufferList};

use crate::config::PoolClassConfig;
use crate::error::{Error, Result};
use crate::sync::SpinLock;

/// Headroom reserved in front of the frame data of every pooled buffer, for
/// lower layers that prepend their own headers.
pub const FRAME_OVERHEAD: usize = 64;

#[derive(Debug)]
struct PoolClass {
    /// Total bytes in each buffer, headroom included
    buffer_size: usize,
    capacity: usize,
    free: SpinLock<Vec<Box<NetBufferList>>>,
    outstanding: AtomicUsize,
}

impl PoolClass {
    fn new(config: &PoolClassConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            capacity: config.capacity,
            free: SpinLock::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Reserves one of the `capacity` slots of this class
    fn reserve(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |outstanding| {
                (outstanding < self.capacity).then_some(outstanding + 1)
            })
            .is_ok()
    }

    fn unreserve(&self) {
        let old = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        assert!(old != 0, "pool outstanding count underflow");
    }
}

/// Size-classed pools of buffer lists
#[derive(Debug)]
pub struct NblPool {
    /// Sorted by `buffer_size`, smallest first
    classes: Vec<PoolClass>,
    /// Allocations made outside of any class
    unclassed: AtomicUsize,
}

impl NblPool {
    /// Creates a pool with the given size classes
    pub fn new(classes: &[PoolClassConfig]) -> Self {
        let mut classes = classes.iter().map(PoolClass::new).collect::<Vec<_>>();
        classes.sort_by_key(|class| class.buffer_size);

        Self {
            classes,
            unclassed: AtomicUsize::new(0),
        }
    }

    /// Creates a pool without size classes, where every buffer is allocated
    /// with the exact size requested
    pub fn unclassed() -> Self {
        Self::new(&[])
    }

    pub fn is_classed(&self) -> bool {
        !self.classes.is_empty()
    }

    /// Index of the smallest class whose buffers fit `len` bytes of frame data
    pub fn class_for(&self, len: usize) -> Option<usize> {
        let needed = len.checked_add(FRAME_OVERHEAD)?;
        self.classes
            .iter()
            .position(|class| class.buffer_size >= needed)
    }

    /// Allocates a buffer list with a single buffer of `len` bytes of used
    /// data space. Stale bytes from earlier users may be left in pooled buffers.
    ///
    /// ## Errors
    ///
    /// - [`Error::Resources`] if no class fits `len`, the fitting class is
    ///   exhausted, or the allocation failed
    pub fn alloc(&self, len: usize) -> Result<Box<NetBufferList>> {
        if !self.is_classed() {
            let nbl = Self::alloc_exact(len)?;
            self.unclassed.fetch_add(1, Ordering::AcqRel);
            return Ok(nbl);
        }

        let index = self.class_for(len).ok_or(Error::Resources)?;
        let class = &self.classes[index];

        if !class.reserve() {
            return Err(Error::Resources);
        }

        let recycled = class.free.lock().pop();
        let mut nbl = match recycled {
            Some(nbl) => nbl,
            None => match Self::alloc_exact(class.buffer_size) {
                Ok(mut nbl) => {
                    nbl.set_pool_class(Some(index));
                    nbl
                }
                Err(err) => {
                    class.unreserve();
                    return Err(err);
                }
            },
        };

        let reset = nbl
            .nb_chain_mut()
            .first_mut()
            .map(|nb| nb.reset_data_space(FRAME_OVERHEAD, len));

        match reset {
            Some(Ok(())) => Ok(nbl),
            _ => {
                // Can't happen for buffers made by this pool, but don't leak the slot
                class.unreserve();
                Err(Error::Resources)
            }
        }
    }

    /// Returns a buffer list allocated by [`Self::alloc`]
    pub fn free(&self, mut nbl: Box<NetBufferList>) {
        let Some(index) = nbl.pool_class() else {
            let old = self.unclassed.fetch_sub(1, Ordering::AcqRel);
            assert!(old != 0, "pool outstanding count underflow");
            return;
        };

        let Some(class) = self.classes.get(index) else {
            debug_assert!(false, "buffer list from an unknown pool class");
            return;
        };

        *nbl.flags_mut() = NblFlags::empty();
        nbl.set_status(NdisStatus::SUCCESS);
        nbl.set_source_handle(None);

        class.free.lock().push(nbl);
        class.unreserve();
    }

    /// Number of buffer lists handed out and not yet freed
    pub fn outstanding(&self) -> usize {
        self.classes
            .iter()
            .map(|class| class.outstanding.load(Ordering::Acquire))
            .sum::<usize>()
            + self.unclassed.load(Ordering::Acquire)
    }

    fn alloc_exact(len: usize) -> Result<Box<NetBufferList>> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| Error::Resources)?;
        bytes.resize(len, 0);

        let mut mdl_chain = MdlChain::new();
        mdl_chain.push_front(Mdl::new(bytes));
        let nb = NetBuffer::new(mdl_chain, 0, len).map_err(|_| Error::Resources)?;

        Ok(Box::new(NetBufferList::from_net_buffer(nb)))
    }
}
