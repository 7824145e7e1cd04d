//! Metadata header stored in front of every slab block.
//!
//! ```text
//! | BlockHeader (32 B) | payload (size B) ... | tail canary (8 B) | slack |
//! ```
//!
//! While a block sits on a free list, `link` chains it to the next free
//! block of the same class.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

pub const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();
pub const TAIL_SIZE: usize = std::mem::size_of::<u64>();

pub const HEAD_CANARY: u64 = 0x5AB5_C0DE_F00D_D1CE;
pub const TAIL_CANARY: u64 = 0x7A11_C0DE_BEEF_0FF5;

/// Block bypassed the free lists.
pub const FLAG_TOO_BIG: u8 = 1 << 0;
/// NUMA node not yet checked since the memory was obtained.
pub const FLAG_PLACEMENT_UNVERIFIED: u8 = 1 << 1;
/// Block is handed out.
pub const FLAG_LIVE: u8 = 1 << 2;

/// Node value meaning "unknown".
pub const NODE_UNKNOWN: u32 = u32::MAX;

#[repr(C, align(32))]
pub struct BlockHeader {
    pub canary: u64,
    /// Requested payload bytes.
    pub size: u64,
    /// Owning slab context.
    pub context: u16,
    pub class_log2: u8,
    pub flags: AtomicU8,
    pub node: AtomicU32,
    /// Next free block while on a free list.
    pub link: usize,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == 32);

impl BlockHeader {
    /// Header of the block whose payload starts at `payload`.
    ///
    /// # Safety
    /// `payload` must come from a slab cache and the block must be alive.
    #[inline]
    pub unsafe fn of<'a>(payload: NonNull<u8>) -> &'a BlockHeader {
        &*(payload.as_ptr().sub(HEADER_SIZE) as *const BlockHeader)
    }

    /// Payload address for a block starting at `block`.
    #[inline]
    pub fn payload(block: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: every block is at least HEADER_SIZE + TAIL_SIZE bytes.
        unsafe { NonNull::new_unchecked(block.as_ptr().add(HEADER_SIZE)) }
    }

    /// Write a fresh header plus tail canary for a block about to be
    /// handed out.
    ///
    /// # Safety
    /// `block` must point to at least `HEADER_SIZE + size + TAIL_SIZE`
    /// writable bytes aligned for `BlockHeader`.
    pub unsafe fn init(
        block: NonNull<u8>,
        context: u16,
        class_log2: u8,
        size: usize,
        flags: u8,
        node: u32,
    ) {
        std::ptr::write(
            block.as_ptr() as *mut BlockHeader,
            BlockHeader {
                canary: HEAD_CANARY,
                size: size as u64,
                context,
                class_log2,
                flags: AtomicU8::new(flags | FLAG_LIVE),
                node: AtomicU32::new(node),
                link: 0,
            },
        );
        let tail = block.as_ptr().add(HEADER_SIZE + size) as *mut u64;
        std::ptr::write_unaligned(tail, TAIL_CANARY);
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_flag(
        &self,
        flag: u8,
    ) -> bool {
        self.flags() & flag != 0
    }

    /// Check both canaries of a live block.
    ///
    /// # Safety
    /// `payload` must be the payload pointer this header belongs to.
    pub unsafe fn canaries_intact(
        &self,
        payload: NonNull<u8>,
    ) -> bool {
        if self.canary != HEAD_CANARY {
            return false;
        }
        let tail = payload.as_ptr().add(self.size as usize) as *const u64;
        std::ptr::read_unaligned(tail) == TAIL_CANARY
    }
}
