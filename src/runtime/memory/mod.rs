//! Memory management for frames and stream buffers.
//!
//! Every allocation goes through a per-context [`SlabCache`]; the
//! [`SlabAllocator`] owns one cache per NUMA node and hands workers the
//! cache of the node they run on.

use std::sync::Arc;

pub mod allocator;
pub mod header;
pub mod slab;

pub use allocator::AllocError;
pub use header::BlockHeader;
pub use slab::{
    FirstTouchPlacement, PlacementProbe, SlabBlock, SlabCache, SlabStats, SlabStatsSnapshot,
};

use crate::util::config::SlabConfig;

/// One slab cache per allocation context.
#[derive(Debug)]
pub struct SlabAllocator {
    caches: Vec<Arc<SlabCache>>,
}

impl SlabAllocator {
    /// Build `contexts` caches; cache `i` serves NUMA node `i`.
    pub fn new(
        contexts: usize,
        config: &SlabConfig,
        probe: Arc<dyn PlacementProbe>,
    ) -> Self {
        let caches = (0..contexts.max(1))
            .map(|node| Arc::new(SlabCache::new(node as u16, node, config.clone(), probe.clone())))
            .collect();
        Self { caches }
    }

    /// Allocator whose placement is assumed to follow the allocating node.
    pub fn first_touch(
        contexts: usize,
        config: &SlabConfig,
    ) -> Self {
        Self::new(contexts, config, Arc::new(FirstTouchPlacement))
    }

    /// Cache for context `id`. Out-of-range ids wrap around.
    pub fn cache(
        &self,
        id: usize,
    ) -> &Arc<SlabCache> {
        &self.caches[id % self.caches.len()]
    }

    pub fn contexts(&self) -> usize {
        self.caches.len()
    }

    /// Statistics summed over every cache.
    pub fn stats(&self) -> SlabStatsSnapshot {
        self.caches
            .iter()
            .map(|cache| cache.stats().snapshot())
            .fold(SlabStatsSnapshot::default(), |acc, s| acc + s)
    }
}

#[cfg(test)]
mod tests;
