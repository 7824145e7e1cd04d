//! Per-node grouping of workers and allocation context.

use std::sync::Arc;

use super::Topology;
use crate::runtime::memory::{SlabAllocator, SlabCache};

/// A NUMA node: its slab cache, its workers and their leader.
#[derive(Debug, Clone)]
pub struct NumaNode {
    pub id: usize,
    /// Lowest worker id on the node, if any worker runs there.
    pub leader: Option<usize>,
    pub workers: Vec<usize>,
    pub slab: Arc<SlabCache>,
}

impl NumaNode {
    /// One entry per node of `topology`, each bound to the matching cache.
    pub fn build_all(
        topology: &Topology,
        allocator: &SlabAllocator,
    ) -> Vec<NumaNode> {
        (0..topology.numa_nodes())
            .map(|id| {
                let workers = topology.workers_on_node(id);
                NumaNode {
                    id,
                    leader: workers.first().copied(),
                    workers,
                    slab: allocator.cache(id).clone(),
                }
            })
            .collect()
    }

    pub fn is_leader(
        &self,
        worker: usize,
    ) -> bool {
        self.leader == Some(worker)
    }
}
