//! Slab allocator tests

use std::sync::Arc;

use proptest::prelude::*;

use crate::runtime::memory::header::{FLAG_TOO_BIG, HEADER_SIZE, TAIL_SIZE};
use crate::runtime::memory::{PlacementProbe, SlabAllocator, SlabCache};
use crate::util::config::SlabConfig;

fn small_config() -> SlabConfig {
    SlabConfig {
        min_class_log2: 6,
        max_class_log2: 12,
        refill_log2: 14,
        region_chunk_log2: 16,
    }
}

fn cache() -> Arc<SlabCache> {
    SlabAllocator::first_touch(1, &small_config()).cache(0).clone()
}

#[cfg(test)]
mod free_list_tests {
    use super::*;

    #[test]
    fn test_free_then_reallocate_reuses_block() {
        let cache = cache();
        let first = cache.allocate(100);
        let address = first.as_ptr();
        let refills = cache.stats().snapshot().refills;
        drop(first);

        let second = cache.allocate(100);
        assert_eq!(second.as_ptr(), address);
        assert_eq!(cache.stats().snapshot().refills, refills);
    }

    #[test]
    fn test_refill_splits_one_slab() {
        let cache = cache();
        let block = cache.allocate(40);
        // 40 + header + tail = 80 bytes -> class 2^7; 2^14 / 2^7 = 128 blocks.
        assert_eq!(block.header().class_log2, 7);
        assert_eq!(cache.free_blocks(7), 127);
        assert_eq!(cache.stats().snapshot().refills, 1);
    }

    #[test]
    fn test_classes_do_not_share_lists() {
        let cache = cache();
        let small = cache.allocate(10);
        let large = cache.allocate(1000);
        assert_ne!(small.header().class_log2, large.header().class_log2);
        assert_eq!(cache.stats().snapshot().refills, 2);
    }

    #[test]
    fn test_region_grows_when_exhausted() {
        let cache = cache();
        // Each refill takes 2^14 bytes of a 2^16 chunk: the fifth refill grows.
        let blocks: Vec<_> = (0..5 * 4).map(|_| cache.allocate(3000)).collect();
        let stats = cache.stats().snapshot();
        assert_eq!(stats.refills, 5);
        assert_eq!(stats.region_growths, 2);
        drop(blocks);
        assert_eq!(cache.stats().snapshot().frees, 20);
    }

    #[test]
    fn test_zeroed_allocation() {
        let cache = cache();
        let mut dirty = cache.allocate(64);
        dirty.as_mut_slice().fill(0xAB);
        drop(dirty);
        let clean = cache.allocate_zeroed(64);
        assert!(clean.as_slice().iter().all(|&b| b == 0));
    }
}

#[cfg(test)]
mod too_big_tests {
    use super::*;

    #[test]
    fn test_too_big_bypasses_free_lists() {
        let cache = cache();
        let block = cache.allocate(1 << 13);
        assert!(block.header().has_flag(FLAG_TOO_BIG));
        assert_eq!(cache.total_free_blocks(), 0);
        drop(block);
        assert_eq!(cache.total_free_blocks(), 0);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.too_big, 1);
        assert_eq!(stats.refills, 0);
        assert_eq!(stats.frees, 1);
    }

    #[test]
    fn test_ceiling_includes_overhead() {
        let cache = cache();
        let fits = cache.allocate((1 << 12) - HEADER_SIZE - TAIL_SIZE);
        assert!(!fits.header().has_flag(FLAG_TOO_BIG));
        let spills = cache.allocate((1 << 12) - HEADER_SIZE - TAIL_SIZE + 1);
        assert!(spills.header().has_flag(FLAG_TOO_BIG));
    }
}

#[cfg(test)]
mod canary_tests {
    use super::*;

    #[test]
    fn test_canaries_survive_neighbour_churn() {
        let cache = cache();
        let mut live = Vec::new();
        for round in 0..200usize {
            let mut block = cache.allocate(16 + round % 200);
            block.as_mut_slice().fill(round as u8);
            live.push(block);
            if round % 3 == 0 {
                live.swap_remove(round % live.len());
            }
        }
        for block in &live {
            assert!(block.canaries_intact());
        }
    }

    #[test]
    #[should_panic(expected = "overran its bounds")]
    fn test_overrun_is_detected_on_free() {
        let cache = cache();
        let block = cache.allocate(8);
        // SAFETY: deliberately clobbers the tail canary inside the block.
        unsafe { *block.as_mut_ptr().add(8) = 0 };
        drop(block);
    }
}

#[cfg(test)]
mod placement_tests {
    use super::*;

    struct FixedNode(usize);

    impl PlacementProbe for FixedNode {
        fn node_of(
            &self,
            _addr: *const u8,
        ) -> Option<usize> {
            Some(self.0)
        }
    }

    #[test]
    fn test_placement_resolved_once() {
        let allocator = SlabAllocator::new(2, &small_config(), Arc::new(FixedNode(1)));
        let cache = allocator.cache(0);
        let block = cache.allocate(32);
        assert_eq!(block.node(), 1);
        assert_eq!(block.node(), 1);
        assert_eq!(cache.stats().snapshot().placement_checks, 1);
    }

    #[test]
    fn test_first_touch_defaults_to_cache_node() {
        let allocator = SlabAllocator::first_touch(3, &small_config());
        let block = allocator.cache(2).allocate(32);
        assert_eq!(block.node(), 2);
        assert_eq!(allocator.contexts(), 3);
        assert_eq!(allocator.stats().allocations, 1);
    }

    #[test]
    fn test_blocks_return_to_their_own_context() {
        let allocator = SlabAllocator::first_touch(2, &small_config());
        let block = allocator.cache(1).allocate(32);
        let moved = std::thread::spawn(move || drop(block));
        moved.join().unwrap();
        assert_eq!(allocator.cache(1).stats().snapshot().frees, 1);
        assert_eq!(allocator.cache(0).stats().snapshot().frees, 0);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_block_fits_request(size in 0usize..6000) {
            let cache = cache();
            let block = cache.allocate(size);
            prop_assert_eq!(block.len(), size);
            prop_assert_eq!(block.as_ptr() as usize % 32, 0);
            if !block.header().has_flag(FLAG_TOO_BIG) {
                let capacity = 1usize << block.header().class_log2;
                prop_assert!(size + HEADER_SIZE + TAIL_SIZE <= capacity);
                prop_assert!(capacity < 2 * (size + HEADER_SIZE + TAIL_SIZE).max(64));
            }
        }
    }
}
