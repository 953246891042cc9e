//! A single-slot mailbox for an in-flight [`Arc`]
//!
//! Filling the slot only succeeds if it was empty, which makes "at most one
//! request in flight" an explicit, checkable property instead of an ambient
//! serialization guarantee.
#![no_std]

// During tests, allow importing std
#[cfg(any(feature = "std", test))]
extern crate std;

// Needed for `Arc`
extern crate alloc;

use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::sync::Arc;

/// Holds at most one `Arc<T>`
pub struct RequestSlot<T> {
    /// Invariant: This either stores a pointer from `Arc::into_raw` that the
    /// slot owns one strong count of, or null representing an empty slot
    inner: AtomicPtr<T>,
}

// Is a wrapper around an `Arc`, so we use the same bounds
unsafe impl<T: Send + Sync> Send for RequestSlot<T> {}
unsafe impl<T: Send + Sync> Sync for RequestSlot<T> {}

impl<T> Default for RequestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for RequestSlot<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestSlot")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

impl<T> RequestSlot<T> {
    /// Constructs a new empty `RequestSlot<T>`
    ///
    /// ## Examples
    ///
    /// ```rust
    ///# use request_slot::RequestSlot;
    /// let slot = RequestSlot::<u32>::new();
    ///
    /// assert!(!slot.is_occupied());
    /// ```
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Puts `value` into the slot if the slot is empty.
    ///
    /// If the slot is already occupied, `value` is handed back as `Err(value)`.
    ///
    /// ## Examples
    ///
    /// ```rust
    ///# extern crate alloc;
    ///# use request_slot::RequestSlot;
    /// use alloc::sync::Arc;
    ///
    /// let slot = RequestSlot::new();
    ///
    /// assert!(slot.try_put(Arc::new(8)).is_ok());
    /// assert_eq!(slot.try_put(Arc::new(9)), Err(Arc::new(9)));
    /// ```
    pub fn try_put(&self, value: Arc<T>) -> Result<(), Arc<T>> {
        let new_ptr = Arc::into_raw(value).cast_mut();

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            new_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: Came from `Arc::into_raw` just above, and wasn't
                // stored in `inner`, so we still own the strong count
                Err(unsafe { Arc::from_raw(new_ptr) })
            }
        }
    }

    /// Takes the current value out of the slot, leaving it empty
    ///
    /// ## Examples
    ///
    /// ```rust
    ///# extern crate alloc;
    ///# use request_slot::RequestSlot;
    /// use alloc::sync::Arc;
    ///
    /// let slot = RequestSlot::new();
    /// slot.try_put(Arc::new(12)).unwrap();
    ///
    /// assert_eq!(slot.take(), Some(Arc::new(12)));
    /// assert_eq!(slot.take(), None);
    /// ```
    pub fn take(&self) -> Option<Arc<T>> {
        let old_ptr = self.inner.swap(core::ptr::null_mut(), Ordering::AcqRel);

        // SAFETY: Swapping gave us exclusive ownership of the strong count the
        // slot was holding, by the invariant of `inner`
        unsafe { Self::manifest_owned_arc(old_ptr) }
    }

    /// Takes the current value out of the slot only if it is `expected`
    /// (compared by identity, not by value).
    ///
    /// ## Examples
    ///
    /// ```rust
    ///# extern crate alloc;
    ///# use request_slot::RequestSlot;
    /// use alloc::sync::Arc;
    ///
    /// let slot = RequestSlot::new();
    /// let request = Arc::new(1);
    /// slot.try_put(request.clone()).unwrap();
    ///
    /// assert_eq!(slot.take_if(&Arc::new(1)), None);
    /// assert!(slot.take_if(&request).is_some());
    /// ```
    pub fn take_if(&self, expected: &Arc<T>) -> Option<Arc<T>> {
        let expected_ptr = Arc::as_ptr(expected).cast_mut();

        match self.inner.compare_exchange(
            expected_ptr,
            core::ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // SAFETY: The exchange gave us exclusive ownership of the strong
            // count the slot was holding. It can't be null since `expected`
            // is a live `Arc`.
            Ok(old_ptr) => unsafe { Self::manifest_owned_arc(old_ptr) },
            Err(_) => None,
        }
    }

    /// Whether the slot currently holds a value
    pub fn is_occupied(&self) -> bool {
        !self.inner.load(Ordering::Acquire).is_null()
    }

    /// Manifests the [`Arc`] whose strong count the slot was holding
    ///
    /// ## Safety
    ///
    /// - `arc_ptr` must be from an [`Arc::into_raw`] or null
    /// - Must have exclusive ownership of the strong count behind `arc_ptr`
    #[must_use]
    unsafe fn manifest_owned_arc(arc_ptr: *mut T) -> Option<Arc<T>> {
        if arc_ptr.is_null() {
            None
        } else {
            // SAFETY: Caller ensures the pointer came from `Arc::into_raw` and
            // that we own its strong count
            Some(unsafe { Arc::from_raw(arc_ptr) })
        }
    }
}

impl<T> Drop for RequestSlot<T> {
    fn drop(&mut self) {
        let arc_ptr = *self.inner.get_mut();

        // SAFETY:
        // - `inner` always stores either an owned `Arc<T>` or null
        // - we have a mutable reference to self, so by definition we have
        //   exclusive access
        let _ = unsafe { Self::manifest_owned_arc(arc_ptr) };
    }
}
