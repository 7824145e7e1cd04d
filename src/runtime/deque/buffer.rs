//! Growable circular buffer backing the work-stealing deque.
//!
//! Slots hold type-erased task pointers. The buffer never owns the tasks:
//! dropping a buffer frees the slot array only, ownership of the pointees
//! stays with the deque.

use std::sync::atomic::{AtomicPtr, Ordering};

/// Fixed-capacity, power-of-two sized ring of opaque pointers.
pub struct RingBuffer {
    log_size: u32,
    mask: usize,
    slots: Box<[AtomicPtr<()>]>,
}

impl RingBuffer {
    /// Allocate a buffer with `1 << log_size` null slots.
    pub fn alloc(log_size: u32) -> Self {
        let size = 1usize << log_size;
        let slots = (0..size)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            log_size,
            mask: size - 1,
            slots,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn log_size(&self) -> u32 {
        self.log_size
    }

    /// Read the slot for logical index `index`.
    #[inline]
    pub fn get(
        &self,
        index: usize,
    ) -> *mut () {
        self.slots[index & self.mask].load(Ordering::Relaxed)
    }

    /// Write the slot for logical index `index`.
    #[inline]
    pub fn set(
        &self,
        index: usize,
        value: *mut (),
    ) {
        self.slots[index & self.mask].store(value, Ordering::Relaxed);
    }

    /// Build a buffer of twice the capacity holding the live window
    /// `[top, bottom)` at the same logical indices.
    ///
    /// Logical indices are masked independently in both buffers, so a
    /// window that wraps around the old buffer is laid out contiguously
    /// (or wrapped at a different point) in the new one with its order
    /// preserved. Publishing the result is left to the caller.
    pub fn grow(
        &self,
        bottom: usize,
        top: usize,
    ) -> RingBuffer {
        debug_assert!(bottom >= top);
        debug_assert!(bottom - top <= self.capacity());
        let grown = RingBuffer::alloc(self.log_size + 1);
        for index in top..bottom {
            grown.set(index, self.get(index));
        }
        grown
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}
