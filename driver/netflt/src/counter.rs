//! Reference and busy counting
//!
//! Every holder of an instance pointer owns a reference. Data path calls hold
//! a busy count on top of that for their whole duration, and teardown blocks
//! until the busy count drains to zero.

use core::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sync::{EventType, KEvent, SpinLock, Timeout};

/// Upper bound on a single sleep while waiting for a counter to drain.
///
/// The event is what wakes waiters up, the re-check only bounds how long a
/// missed wakeup could go unnoticed.
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

/// A counter that signals an event whenever it drops to zero
#[derive(Debug)]
pub struct DrainCounter {
    count: AtomicU32,
    /// Signaled while `count` is zero
    drained: KEvent,
    /// Serializes flipping `drained`, so that the event always ends up
    /// agreeing with the last observed count
    transition: SpinLock<()>,
}

impl Default for DrainCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainCounter {
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            drained: KEvent::new(EventType::Notification, true),
            transition: SpinLock::new(()),
        }
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn inc(&self) {
        let old = self.count.fetch_add(1, Ordering::AcqRel);
        assert!(old != u32::MAX, "drain counter overflow");

        if old == 0 {
            let _guard = self.transition.lock();
            if self.count.load(Ordering::Acquire) != 0 {
                self.drained.clear();
            }
        }
    }

    pub fn dec(&self) {
        let old = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(old != 0, "drain counter underflow");

        if old == 1 {
            let _guard = self.transition.lock();
            if self.count.load(Ordering::Acquire) == 0 {
                self.drained.set();
            }
        }
    }

    /// Blocks until the count reaches zero
    ///
    /// ## Errors
    ///
    /// - [`Error::Timeout`] if the count was still non-zero once `timeout` passed
    pub fn wait_drained(&self, timeout: Timeout) -> Result<()> {
        let deadline = timeout.deadline();

        loop {
            if self.get() == 0 {
                return Ok(());
            }

            let slice = match deadline {
                None => RECHECK_INTERVAL,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout);
                    }
                    remaining.min(RECHECK_INTERVAL)
                }
            };

            // Either outcome means "look at the count again"
            let _ = self.drained.wait(Timeout::relative(slice));
        }
    }
}

/// The reference and busy counts of one instance
#[derive(Debug)]
pub struct RefCounts {
    refs: AtomicU32,
    busy: DrainCounter,
}

impl RefCounts {
    /// Starts out with `initial_refs` references and nothing busy
    pub fn new(initial_refs: u32) -> Self {
        Self {
            refs: AtomicU32::new(initial_refs),
            busy: DrainCounter::new(),
        }
    }

    /// Takes a reference, plus a busy count if `busy` is set
    pub fn retain(&self, busy: bool) {
        // Reference first, so that busy > 0 always implies refs > 0
        let old = self.refs.fetch_add(1, Ordering::AcqRel);
        assert!(old != u32::MAX, "reference count overflow");

        if busy {
            self.busy.inc();
        }
    }

    /// Drops a reference (and busy count), returning `true` if it was the
    /// last reference.
    pub fn release(&self, busy: bool) -> bool {
        if busy {
            self.busy.dec();
        }

        let old = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(old != 0, "reference count underflow");

        old == 1
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub fn busy(&self) -> u32 {
        self.busy.get()
    }

    /// Blocks until no busy references are left
    ///
    /// ## Errors
    ///
    /// - [`Error::Timeout`] if some were still held once `timeout` passed
    pub fn wait_idle(&self, timeout: Timeout) -> Result<()> {
        self.busy.wait_drained(timeout)
    }
}
