//! Backing storage of stream views.
//!
//! A [`StreamBuffer`] holds the window a consumer reads. Producers write
//! their bursts straight into it at disjoint offsets, so several workers
//! may write one buffer concurrently. The matching guarantees disjointness
//! and the frame counter decrement orders every write before the
//! consumer's reads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::runtime::memory::{SlabBlock, SlabCache};

struct BufferInner {
    block: SlabBlock,
    /// Copies made along the reuse chain that led to this buffer.
    chain_copies: usize,
    hand_offs: AtomicUsize,
}

/// Shared handle to a slab-backed data window.
#[derive(Clone)]
pub struct StreamBuffer {
    inner: Arc<BufferInner>,
}

impl StreamBuffer {
    /// Zeroed buffer of `bytes` bytes from `slab`.
    pub fn allocate(
        slab: &Arc<SlabCache>,
        bytes: usize,
    ) -> Self {
        Self::with_chain(slab.allocate_zeroed(bytes), 0)
    }

    fn with_chain(
        block: SlabBlock,
        chain_copies: usize,
    ) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                block,
                chain_copies,
                hand_offs: AtomicUsize::new(0),
            }),
        }
    }

    /// Local copy of `source` allocated from `slab`, one step further down
    /// the reuse chain.
    pub fn copy_of(
        slab: &Arc<SlabCache>,
        source: &StreamBuffer,
    ) -> Self {
        let mut block = slab.allocate(source.len());
        block.as_mut_slice().copy_from_slice(source.as_slice_unchecked());
        Self::with_chain(block, source.inner.chain_copies + 1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.block.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// NUMA node holding the data.
    pub fn node(&self) -> usize {
        self.inner.block.node()
    }

    pub fn chain_copies(&self) -> usize {
        self.inner.chain_copies
    }

    pub fn hand_offs(&self) -> usize {
        self.inner.hand_offs.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hand_off(&self) {
        self.inner.hand_offs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ptr_eq(
        &self,
        other: &StreamBuffer,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn as_slice_unchecked(&self) -> &[u8] {
        self.inner.block.as_slice()
    }

    /// Bytes `[offset, offset + len)`.
    ///
    /// # Safety
    /// No write to the range may happen while the slice is alive.
    #[inline]
    pub(crate) unsafe fn slice(
        &self,
        offset: usize,
        len: usize,
    ) -> &[u8] {
        assert!(offset + len <= self.len());
        std::slice::from_raw_parts(self.inner.block.as_ptr().add(offset), len)
    }

    /// Mutable bytes `[offset, offset + len)`.
    ///
    /// # Safety
    /// The caller must have exclusive access to the range for the lifetime
    /// of the slice.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(
        &self,
        offset: usize,
        len: usize,
    ) -> &mut [u8] {
        assert!(offset + len <= self.len());
        std::slice::from_raw_parts_mut(self.inner.block.as_mut_ptr().add(offset), len)
    }

    /// Copy `[offset, offset + len)` from `source` into the same range of
    /// `self`.
    ///
    /// # Safety
    /// The range of `self` must be exclusively owned by the caller and the
    /// range of `source` must not be written concurrently.
    pub(crate) unsafe fn copy_range_from(
        &self,
        source: &StreamBuffer,
        offset: usize,
        len: usize,
    ) {
        if self.ptr_eq(source) {
            return;
        }
        assert!(offset + len <= self.len() && offset + len <= source.len());
        std::ptr::copy_nonoverlapping(
            source.inner.block.as_ptr().add(offset),
            self.inner.block.as_mut_ptr().add(offset),
            len,
        );
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("len", &self.len())
            .field("chain_copies", &self.inner.chain_copies)
            .finish()
    }
}
