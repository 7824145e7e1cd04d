//! Segregated free-list slab caches.
//!
//! One [`SlabCache`] per allocation context (NUMA node). Each power-of-two
//! size class has its own locked free list; empty lists are refilled in
//! bulk by carving a large slab out of a shared bump region, which in turn
//! grows from the system allocator. Blocks above the class ceiling go
//! straight to the system allocator and never touch a free list.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use serde::Serialize;

use super::allocator::{block_bytes, class_for, AllocError};
use super::header::{
    BlockHeader, FLAG_LIVE, FLAG_PLACEMENT_UNVERIFIED, FLAG_TOO_BIG, HEADER_SIZE, NODE_UNKNOWN,
    TAIL_SIZE,
};
use crate::util::config::SlabConfig;
use crate::violation;

const REGION_ALIGN: usize = 4096;
const TOO_BIG_ALIGN: usize = 64;

/// Source of NUMA placement facts for memory the cache handed out.
///
/// Placement is checked lazily, after the memory has been touched, instead
/// of binding every refill eagerly.
pub trait PlacementProbe: Send + Sync {
    /// Node backing `addr`, or `None` when unknown.
    fn node_of(
        &self,
        addr: *const u8,
    ) -> Option<usize>;
}

/// Assumes memory lives on the node of the cache that allocated it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstTouchPlacement;

impl PlacementProbe for FirstTouchPlacement {
    fn node_of(
        &self,
        _addr: *const u8,
    ) -> Option<usize> {
        None
    }
}

/// Allocation statistics for one cache.
#[derive(Debug, Default)]
pub struct SlabStats {
    pub allocations: AtomicUsize,
    pub frees: AtomicUsize,
    pub refills: AtomicUsize,
    pub too_big: AtomicUsize,
    pub region_growths: AtomicUsize,
    pub placement_checks: AtomicUsize,
}

/// Plain copy of [`SlabStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlabStatsSnapshot {
    pub allocations: usize,
    pub frees: usize,
    pub refills: usize,
    pub too_big: usize,
    pub region_growths: usize,
    pub placement_checks: usize,
}

impl SlabStats {
    pub fn snapshot(&self) -> SlabStatsSnapshot {
        SlabStatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            too_big: self.too_big.load(Ordering::Relaxed),
            region_growths: self.region_growths.load(Ordering::Relaxed),
            placement_checks: self.placement_checks.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for SlabStatsSnapshot {
    type Output = SlabStatsSnapshot;

    fn add(
        self,
        rhs: Self,
    ) -> Self {
        SlabStatsSnapshot {
            allocations: self.allocations + rhs.allocations,
            frees: self.frees + rhs.frees,
            refills: self.refills + rhs.refills,
            too_big: self.too_big + rhs.too_big,
            region_growths: self.region_growths + rhs.region_growths,
            placement_checks: self.placement_checks + rhs.placement_checks,
        }
    }
}

struct FreeList {
    head: *mut u8,
    len: usize,
}

// SAFETY: the list only holds blocks owned by the cache and is accessed
// under its mutex.
unsafe impl Send for FreeList {}

impl FreeList {
    /// # Safety
    /// `block` must be an unused block of this list's class.
    unsafe fn push(
        &mut self,
        block: *mut u8,
    ) {
        (*(block as *mut BlockHeader)).link = self.head as usize;
        self.head = block;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        let block = NonNull::new(self.head)?;
        // SAFETY: every block on the list carries a header with a valid link.
        self.head = unsafe { (*(block.as_ptr() as *const BlockHeader)).link as *mut u8 };
        self.len -= 1;
        Some(block)
    }
}

struct BumpRegion {
    cursor: usize,
    end: usize,
    chunks: Vec<(NonNull<u8>, Layout)>,
}

// SAFETY: chunks are owned by the cache and released in its Drop.
unsafe impl Send for BumpRegion {}

/// Size-classed allocator for one context.
pub struct SlabCache {
    id: u16,
    node: usize,
    config: SlabConfig,
    classes: Box<[CachePadded<Mutex<FreeList>>]>,
    region: Mutex<BumpRegion>,
    probe: Arc<dyn PlacementProbe>,
    stats: SlabStats,
}

impl SlabCache {
    pub fn new(
        id: u16,
        node: usize,
        config: SlabConfig,
        probe: Arc<dyn PlacementProbe>,
    ) -> Self {
        let classes = (config.min_class_log2..=config.max_class_log2)
            .map(|_| {
                CachePadded::new(Mutex::new(FreeList {
                    head: std::ptr::null_mut(),
                    len: 0,
                }))
            })
            .collect();
        Self {
            id,
            node,
            config,
            classes,
            region: Mutex::new(BumpRegion {
                cursor: 0,
                end: 0,
                chunks: Vec::new(),
            }),
            probe,
            stats: SlabStats::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Node this cache allocates for.
    #[inline]
    pub fn node(&self) -> usize {
        self.node
    }

    pub fn stats(&self) -> &SlabStats {
        &self.stats
    }

    /// Blocks currently on the free list of class `log2`.
    pub fn free_blocks(
        &self,
        log2: u32,
    ) -> usize {
        self.class_list(log2).map(|list| list.lock().len).unwrap_or(0)
    }

    /// Total blocks sitting on any free list.
    pub fn total_free_blocks(&self) -> usize {
        self.classes.iter().map(|list| list.lock().len).sum()
    }

    fn class_list(
        &self,
        log2: u32,
    ) -> Option<&Mutex<FreeList>> {
        if log2 < self.config.min_class_log2 || log2 > self.config.max_class_log2 {
            return None;
        }
        Some(&self.classes[(log2 - self.config.min_class_log2) as usize])
    }

    /// Allocate `size` payload bytes. Out of memory is fatal.
    pub fn allocate(
        self: &Arc<Self>,
        size: usize,
    ) -> SlabBlock {
        match self.try_allocate(size) {
            Ok(block) => block,
            Err(e) => {
                tracing::error!("slab context {}: {}", self.id, e);
                alloc::handle_alloc_error(e.layout())
            },
        }
    }

    /// Allocate `size` zeroed payload bytes. Out of memory is fatal.
    pub fn allocate_zeroed(
        self: &Arc<Self>,
        size: usize,
    ) -> SlabBlock {
        let mut block = self.allocate(size);
        block.as_mut_slice().fill(0);
        block
    }

    /// Fallible allocation.
    pub fn try_allocate(
        self: &Arc<Self>,
        size: usize,
    ) -> Result<SlabBlock, AllocError> {
        let total = block_bytes(size)?;
        let class = class_for(total, self.config.min_class_log2);
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);

        let block = match self.class_list(class) {
            Some(list) => {
                let mut list = list.lock();
                match list.pop() {
                    Some(block) => block,
                    None => {
                        self.refill(class, &mut list)?;
                        list.pop().ok_or(AllocError::OutOfMemory { bytes: total })?
                    },
                }
            },
            None => return self.allocate_too_big(size, total),
        };

        // SAFETY: the block spans 1 << class >= total bytes and keeps the
        // placement recorded while it was free.
        unsafe {
            let previous = &*(block.as_ptr() as *const BlockHeader);
            let node = previous.node.load(Ordering::Relaxed);
            let flags = previous.flags() & FLAG_PLACEMENT_UNVERIFIED;
            BlockHeader::init(block, self.id, class as u8, size, flags, node);
        }
        Ok(SlabBlock {
            payload: BlockHeader::payload(block),
            len: size,
            cache: self.clone(),
        })
    }

    fn allocate_too_big(
        self: &Arc<Self>,
        size: usize,
        total: usize,
    ) -> Result<SlabBlock, AllocError> {
        let layout = Layout::from_size_align(total, TOO_BIG_ALIGN)
            .map_err(|_| AllocError::SizeOverflow { requested: size })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let block = NonNull::new(raw).ok_or(AllocError::OutOfMemory { bytes: total })?;
        self.stats.too_big.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("slab context {}: direct allocation of {} bytes", self.id, total);
        // SAFETY: fresh allocation of `total` bytes.
        unsafe {
            BlockHeader::init(
                block,
                self.id,
                0,
                size,
                FLAG_TOO_BIG | FLAG_PLACEMENT_UNVERIFIED,
                NODE_UNKNOWN,
            );
        }
        Ok(SlabBlock {
            payload: BlockHeader::payload(block),
            len: size,
            cache: self.clone(),
        })
    }

    /// Carve one refill slab from the bump region and split it into blocks
    /// of class `log2` on `list`.
    fn refill(
        &self,
        log2: u32,
        list: &mut FreeList,
    ) -> Result<(), AllocError> {
        let refill_bytes = 1usize << self.config.refill_log2;
        let block_size = 1usize << log2;
        let base = {
            let mut region = self.region.lock();
            if region.end - region.cursor < refill_bytes {
                self.grow_region(&mut region)?;
            }
            let base = region.cursor;
            region.cursor += refill_bytes;
            base
        };

        for index in (0..refill_bytes / block_size).rev() {
            let block = (base + index * block_size) as *mut u8;
            // SAFETY: the range lies inside a region chunk owned by this
            // cache and is not handed out elsewhere.
            unsafe {
                std::ptr::write(
                    block as *mut BlockHeader,
                    BlockHeader {
                        canary: 0,
                        size: 0,
                        context: self.id,
                        class_log2: log2 as u8,
                        flags: AtomicU8::new(FLAG_PLACEMENT_UNVERIFIED),
                        node: AtomicU32::new(NODE_UNKNOWN),
                        link: 0,
                    },
                );
                list.push(block);
            }
        }
        self.stats.refills.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "slab context {}: refilled class 2^{} with {} blocks",
            self.id,
            log2,
            refill_bytes / block_size
        );
        Ok(())
    }

    fn grow_region(
        &self,
        region: &mut BumpRegion,
    ) -> Result<(), AllocError> {
        let chunk = 1usize << self.config.region_chunk_log2;
        let layout = Layout::from_size_align(chunk, REGION_ALIGN)
            .map_err(|_| AllocError::SizeOverflow { requested: chunk })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let start = NonNull::new(raw).ok_or(AllocError::OutOfMemory { bytes: chunk })?;
        region.chunks.push((start, layout));
        region.cursor = start.as_ptr() as usize;
        region.end = region.cursor + chunk;
        self.stats.region_growths.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("slab context {}: bump region grew by {} bytes", self.id, chunk);
        Ok(())
    }

    /// Return a block to this cache.
    ///
    /// # Safety
    /// `payload` must be a live block allocated by this cache.
    unsafe fn release(
        &self,
        payload: NonNull<u8>,
    ) {
        let header = BlockHeader::of(payload);
        if header.context != self.id {
            violation!(
                "block of slab context {} released into context {}",
                header.context,
                self.id
            );
        }
        if !header.canaries_intact(payload) {
            violation!("slab block {:p} overran its bounds", payload.as_ptr());
        }
        let flags = header.flags.fetch_and(!FLAG_LIVE, Ordering::AcqRel);
        if flags & FLAG_LIVE == 0 {
            violation!("slab block {:p} freed twice", payload.as_ptr());
        }
        self.stats.frees.fetch_add(1, Ordering::Relaxed);

        let block = payload.as_ptr().sub(HEADER_SIZE);
        if flags & FLAG_TOO_BIG != 0 {
            let total = header.size as usize + HEADER_SIZE + TAIL_SIZE;
            let layout = Layout::from_size_align_unchecked(total, TOO_BIG_ALIGN);
            alloc::dealloc(block, layout);
            return;
        }

        let class = u32::from(header.class_log2);
        match self.class_list(class) {
            Some(list) => list.lock().push(block),
            None => violation!("slab block with unknown class 2^{}", class),
        }
    }

    /// NUMA node backing a live block, resolving it on first inspection.
    pub fn node_of(
        &self,
        block: &SlabBlock,
    ) -> usize {
        // SAFETY: `block` keeps its payload alive.
        let header = unsafe { BlockHeader::of(block.payload) };
        if header.has_flag(FLAG_PLACEMENT_UNVERIFIED) {
            self.stats.placement_checks.fetch_add(1, Ordering::Relaxed);
            let node = self
                .probe
                .node_of(block.payload.as_ptr())
                .unwrap_or(self.node);
            header.node.store(node as u32, Ordering::Relaxed);
            header
                .flags
                .fetch_and(!FLAG_PLACEMENT_UNVERIFIED, Ordering::AcqRel);
            return node;
        }
        match header.node.load(Ordering::Relaxed) {
            NODE_UNKNOWN => self.node,
            node => node as usize,
        }
    }
}

impl Drop for SlabCache {
    fn drop(&mut self) {
        let region = self.region.get_mut();
        for (start, layout) in region.chunks.drain(..) {
            // SAFETY: every chunk came from `alloc::alloc` with this layout;
            // no block can outlive the cache because blocks hold an Arc to it.
            unsafe { alloc::dealloc(start.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for SlabCache {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SlabCache")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// An owned slab block. Returned to its cache on drop.
pub struct SlabBlock {
    payload: NonNull<u8>,
    len: usize,
    cache: Arc<SlabCache>,
}

// SAFETY: a SlabBlock is the unique owner of its payload.
unsafe impl Send for SlabBlock {}
unsafe impl Sync for SlabBlock {}

impl SlabBlock {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.payload.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.payload.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the payload spans `len` initialized-or-owned bytes.
        unsafe { std::slice::from_raw_parts(self.payload.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: unique access through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.payload.as_ptr(), self.len) }
    }

    /// Cache the block was allocated from.
    pub fn cache(&self) -> &Arc<SlabCache> {
        &self.cache
    }

    /// NUMA node backing the block.
    pub fn node(&self) -> usize {
        self.cache.node_of(self)
    }

    pub fn header(&self) -> &BlockHeader {
        // SAFETY: the block is alive while `self` exists.
        unsafe { BlockHeader::of(self.payload) }
    }

    /// Whether both guard words around the payload are untouched.
    pub fn canaries_intact(&self) -> bool {
        // SAFETY: header belongs to this payload.
        unsafe { self.header().canaries_intact(self.payload) }
    }
}

impl Drop for SlabBlock {
    fn drop(&mut self) {
        // SAFETY: the block is live and owned by `self.cache`.
        unsafe { self.cache.release(self.payload) };
    }
}

impl std::fmt::Debug for SlabBlock {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SlabBlock")
            .field("ptr", &self.payload)
            .field("len", &self.len)
            .field("context", &self.cache.id)
            .finish()
    }
}
