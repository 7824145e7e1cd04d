//! Single-threaded execution context.
//!
//! `ManualContext` runs dataflow graphs on the calling thread without a
//! worker pool: readied frames queue up in FIFO order and run when the
//! caller drives them. It can pretend to move between NUMA nodes, which is
//! how node-sensitive behavior (buffer reuse, placement) is exercised
//! deterministically.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use super::stats::WorkerCounters;
use crate::runtime::dataflow::{Frame, TaskContext};
use crate::runtime::memory::{SlabAllocator, SlabCache};
use crate::util::config::{ReuseConfig, RuntimeConfig};

/// Number of memory levels reported by a manual context: self, node,
/// machine.
const MANUAL_LEVELS: usize = 3;

pub struct ManualContext {
    worker: usize,
    num_workers: usize,
    node: Cell<usize>,
    allocator: SlabAllocator,
    config: RuntimeConfig,
    ready: RefCell<VecDeque<Arc<Frame>>>,
    counters: WorkerCounters,
    created: Cell<usize>,
    executed: Cell<usize>,
}

impl ManualContext {
    /// Context on node 0 of a single-node machine with default settings.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let nodes = config.topology.numa_nodes.max(1);
        Self {
            worker: 0,
            num_workers: config.num_workers.max(1),
            node: Cell::new(0),
            allocator: SlabAllocator::first_touch(nodes, &config.slab),
            config,
            ready: RefCell::new(VecDeque::new()),
            counters: WorkerCounters::new(MANUAL_LEVELS),
            created: Cell::new(0),
            executed: Cell::new(0),
        }
    }

    /// Context spanning `nodes` NUMA nodes.
    pub fn with_nodes(nodes: usize) -> Self {
        let mut config = RuntimeConfig::default();
        config.topology.numa_nodes = nodes.max(1);
        Self::with_config(config)
    }

    /// Continue as if running on `node`. Later allocations use that node's
    /// slab cache.
    pub fn move_to_node(
        &self,
        node: usize,
    ) {
        self.node.set(node % self.allocator.contexts());
    }

    pub fn allocator(&self) -> &SlabAllocator {
        &self.allocator
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn ready_len(&self) -> usize {
        self.ready.borrow().len()
    }

    pub fn frames_created(&self) -> usize {
        self.created.get()
    }

    pub fn frames_executed(&self) -> usize {
        self.executed.get()
    }

    /// Execute the oldest ready frame. False when nothing is ready.
    pub fn run_one(&self) -> bool {
        let next = self.ready.borrow_mut().pop_front();
        match next {
            Some(frame) => {
                frame.execute(self);
                self.executed.set(self.executed.get() + 1);
                self.counters.record_executed();
                true
            },
            None => false,
        }
    }

    /// Execute frames until none is ready; returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Default for ManualContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskContext for ManualContext {
    fn worker_id(&self) -> usize {
        self.worker
    }

    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn numa_node(&self) -> usize {
        self.node.get()
    }

    fn slab(&self) -> &Arc<SlabCache> {
        self.allocator.cache(self.node.get())
    }

    fn deferred_alloc(&self) -> bool {
        self.config.deferred_alloc
    }

    fn reuse_config(&self) -> &ReuseConfig {
        &self.config.reuse
    }

    fn schedule(
        &self,
        frame: Arc<Frame>,
    ) {
        self.ready.borrow_mut().push_back(frame);
    }

    fn frame_created(&self) {
        self.created.set(self.created.get() + 1);
        self.counters.record_created();
    }

    fn counters(&self) -> &WorkerCounters {
        &self.counters
    }

    fn account_input(
        &self,
        writer: usize,
        bytes: u64,
    ) {
        let level = if writer == self.worker { 0 } else { MANUAL_LEVELS - 1 };
        self.counters.record_bytes(level, bytes);
    }
}

impl std::fmt::Debug for ManualContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ManualContext")
            .field("node", &self.node.get())
            .field("ready", &self.ready_len())
            .field("created", &self.created.get())
            .field("executed", &self.executed.get())
            .finish()
    }
}
