//! Synchronization primitives used by the filter core
//!
//! - [`SpinLock`] for short critical sections. Never hold one across a call
//!   into the switch or the OS.
//! - [`KEvent`] for the few places that are allowed to block (draining in-flight
//!   work during teardown and pause).

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use crate::error::{Error, Result};

/// Raw spin lock backing [`SpinLock`]
pub struct RawSpinLock {
    locked: AtomicBool,
}

// SAFETY: `locked` is only ever set by a successful acquire and cleared by the
// holder, so at most one guard exists at a time.
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        let backoff = Backoff::new();
        while !self.try_lock() {
            // Spin on a plain load so that waiters don't bounce the cache line
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A spin-lock based mutex protecting some data.
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

/// How long a wait on a [`KEvent`] may take
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// Waits for an interval to pass
    pub const fn relative(duration: Duration) -> Self {
        Self(Some(duration))
    }

    /// Like [`Self::relative`], but in units of milliseconds.
    pub const fn relative_ms(duration: u64) -> Self {
        Self(Some(Duration::from_millis(duration)))
    }

    /// Don't wait and return immediately
    pub const fn dont_wait() -> Self {
        Self(Some(Duration::ZERO))
    }

    /// Wait indefinitely until the object is set to the signaled state.
    pub const fn forever() -> Self {
        Self(None)
    }

    /// The wait interval, or `None` for an unbounded wait
    pub const fn duration(self) -> Option<Duration> {
        self.0
    }

    /// Absolute point in time at which a wait started now expires
    pub(crate) fn deadline(self) -> Option<Instant> {
        self.0.map(|duration| Instant::now() + duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Stays signaled until explicitly cleared, releasing every waiter
    Notification,
    /// Releases a single waiter, then resets itself
    Synchronization,
}

/// A kernel-style event object
#[derive(Debug)]
pub struct KEvent {
    event_type: EventType,
    signaled: Mutex<bool>,
    waiters: Condvar,
}

impl KEvent {
    pub fn new(event_type: EventType, start_signaled: bool) -> Self {
        Self {
            event_type,
            signaled: Mutex::new(start_signaled),
            waiters: Condvar::new(),
        }
    }

    /// Sets the event to the signaled state
    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        *signaled = true;

        match self.event_type {
            EventType::Notification => self.waiters.notify_all(),
            EventType::Synchronization => self.waiters.notify_one(),
        }
    }

    /// Resets the event to the non-signaled state
    pub fn clear(&self) {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for the event to become signaled
    ///
    /// ## Errors
    ///
    /// - [`Error::Timeout`] if `timeout` passed without the event being signaled
    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        let signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);

        let mut signaled = match timeout.duration() {
            None => self
                .waiters
                .wait_while(signaled, |signaled| !*signaled)
                .unwrap_or_else(PoisonError::into_inner),
            Some(duration) => {
                let (signaled, result) = self
                    .waiters
                    .wait_timeout_while(signaled, duration, |signaled| !*signaled)
                    .unwrap_or_else(PoisonError::into_inner);

                if result.timed_out() && !*signaled {
                    return Err(Error::Timeout);
                }
                signaled
            }
        };

        if self.event_type == EventType::Synchronization {
            *signaled = false;
        }

        Ok(())
    }
}
