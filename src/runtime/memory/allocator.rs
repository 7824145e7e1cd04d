//! Allocation errors and size-class arithmetic shared by the slab caches.

use std::alloc::Layout;

use super::header::{HEADER_SIZE, TAIL_SIZE};

/// Memory allocation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The system allocator could not satisfy the request
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
    /// Request size plus block overhead does not fit in `usize`
    #[error("allocation of {requested} bytes overflows the address space")]
    SizeOverflow { requested: usize },
}

impl AllocError {
    /// Layout to report to `handle_alloc_error`.
    pub fn layout(&self) -> Layout {
        let bytes = match self {
            AllocError::OutOfMemory { bytes } => *bytes,
            AllocError::SizeOverflow { .. } => usize::MAX >> 1,
        };
        Layout::from_size_align(bytes.min(isize::MAX as usize), 1).unwrap_or(Layout::new::<u8>())
    }
}

/// Total block bytes (header and tail canary included) for a payload.
#[inline]
pub fn block_bytes(payload: usize) -> Result<usize, AllocError> {
    payload
        .checked_add(HEADER_SIZE + TAIL_SIZE)
        .ok_or(AllocError::SizeOverflow { requested: payload })
}

/// Smallest power-of-two class (log2) holding `bytes`, never below `min_log2`.
#[inline]
pub fn class_for(
    bytes: usize,
    min_log2: u32,
) -> u32 {
    let class = if bytes <= 1 {
        0
    } else {
        usize::BITS - (bytes - 1).leading_zeros()
    };
    class.max(min_log2)
}

/// Usable payload bytes in a block of class `log2`.
#[inline]
pub fn class_payload(log2: u32) -> usize {
    (1usize << log2) - HEADER_SIZE - TAIL_SIZE
}
