//! Worker threads and their per-thread scheduling context.

use std::cell::{Cell, RefCell, RefMut};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::distributor::WorkDistributor;
use super::stats::{TransferMatrix, WorkerCounters};
use super::termination::Termination;
use super::trace::{StateLog, WorkerState};
use crate::runtime::dataflow::{Frame, TaskContext};
use crate::runtime::deque;
use crate::runtime::memory::SlabCache;
use crate::runtime::topology::{NumaNode, Topology};
use crate::util::config::{ReuseConfig, RuntimeConfig};

/// State shared by every worker of one run.
pub(crate) struct Shared {
    pub config: RuntimeConfig,
    pub topology: Arc<Topology>,
    pub nodes: Vec<NumaNode>,
    pub distributor: WorkDistributor,
    pub termination: Termination,
    pub counters: Box<[WorkerCounters]>,
    pub logs: Box<[StateLog]>,
    pub transfers: TransferMatrix,
}

/// Everything a worker thread owns. Lives on the worker's stack and is
/// never shared: only the deque's stealer and the push inbox are visible
/// to other workers.
pub struct WorkerContext<'a> {
    id: usize,
    node: usize,
    shared: &'a Shared,
    deque: deque::Worker<Arc<Frame>>,
    /// Most recently readied frame, run before anything in the deque.
    cache: RefCell<Option<Arc<Frame>>>,
    rng: RefCell<StdRng>,
    last_victim: Cell<Option<usize>>,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(
        id: usize,
        shared: &'a Shared,
        deque: deque::Worker<Arc<Frame>>,
    ) -> Self {
        Self {
            id,
            node: shared.topology.node_of(id),
            shared,
            deque,
            cache: RefCell::new(None),
            rng: RefCell::new(StdRng::seed_from_u64(0x5eed_0000 + id as u64)),
            last_victim: Cell::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn deque(&self) -> &deque::Worker<Arc<Frame>> {
        &self.deque
    }

    pub(crate) fn counters_ref(&self) -> &WorkerCounters {
        &self.shared.counters[self.id]
    }

    pub(crate) fn rng(&self) -> RefMut<'_, StdRng> {
        self.rng.borrow_mut()
    }

    pub(crate) fn take_cached(&self) -> Option<Arc<Frame>> {
        self.cache.borrow_mut().take()
    }

    /// Store `frame` in the cache slot if it is free; otherwise hand it back.
    pub(crate) fn fill_cache_if_empty(
        &self,
        frame: Arc<Frame>,
    ) -> Option<Arc<Frame>> {
        let mut slot = self.cache.borrow_mut();
        if slot.is_some() {
            return Some(frame);
        }
        *slot = Some(frame);
        None
    }

    pub(crate) fn last_victim(&self) -> Option<usize> {
        self.last_victim.get()
    }

    pub(crate) fn set_last_victim(
        &self,
        victim: Option<usize>,
    ) {
        self.last_victim.set(victim);
    }

    /// Try to move `frame` to a better placed worker.
    fn try_push(
        &self,
        frame: Arc<Frame>,
    ) -> Option<Arc<Frame>> {
        let distributor = &self.shared.distributor;
        if !distributor.push_enabled() {
            return Some(frame);
        }
        let Some(target) = distributor.push_target(&frame, self.id) else {
            return Some(frame);
        };
        match distributor.try_push(frame, target) {
            Ok(()) => {
                let level = self.shared.topology.lowest_common_level(self.id, target);
                self.counters_ref().record_push(level);
                None
            },
            Err(frame) => {
                self.counters_ref().record_push_rejection();
                Some(frame)
            },
        }
    }
}

impl TaskContext for WorkerContext<'_> {
    fn worker_id(&self) -> usize {
        self.id
    }

    fn num_workers(&self) -> usize {
        self.shared.topology.num_workers()
    }

    fn numa_node(&self) -> usize {
        self.node
    }

    fn slab(&self) -> &Arc<SlabCache> {
        &self.shared.nodes[self.node].slab
    }

    fn deferred_alloc(&self) -> bool {
        self.shared.config.deferred_alloc
    }

    fn reuse_config(&self) -> &ReuseConfig {
        &self.shared.config.reuse
    }

    fn schedule(
        &self,
        frame: Arc<Frame>,
    ) {
        let Some(frame) = self.try_push(frame) else {
            return;
        };
        let previous = self.cache.borrow_mut().replace(frame);
        if let Some(previous) = previous {
            self.deque.push_bottom(previous);
        }
    }

    fn frame_created(&self) {
        self.shared.termination.record_created(self.id);
        self.counters_ref().record_created();
    }

    fn counters(&self) -> &WorkerCounters {
        self.counters_ref()
    }

    fn account_input(
        &self,
        writer: usize,
        bytes: u64,
    ) {
        let level = self.shared.topology.lowest_common_level(writer, self.id);
        self.counters_ref().record_bytes(level, bytes);
        self.shared.transfers.record(writer, self.id, bytes);
    }

    fn record_state(
        &self,
        state: WorkerState,
    ) -> Option<WorkerState> {
        self.shared.logs[self.id].record(state)
    }

    fn restore_state(
        &self,
        previous: Option<WorkerState>,
    ) {
        self.shared.logs[self.id].restore(previous);
    }
}

/// Marks the run as aborted if the worker unwinds.
struct AbortOnPanic<'a>(&'a Termination);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}

/// Main loop of one worker: execute frames until the pool is quiescent.
pub(crate) fn run_worker(ctx: &WorkerContext<'_>) {
    let shared = ctx.shared;
    let termination = &shared.termination;
    let _guard = AbortOnPanic(termination);

    while !termination.is_done() {
        ctx.record_state(WorkerState::Seeking);
        match shared.distributor.obtain_work(ctx) {
            Some(frame) => {
                termination.set_busy(ctx.id);
                frame.execute(ctx);
                termination.record_executed(ctx.id);
                ctx.counters_ref().record_executed();
            },
            None => {
                termination.set_idle(ctx.id);
                ctx.counters_ref().record_idle();
                if termination.check() {
                    break;
                }
                if shared.config.yield_when_idle {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            },
        }
    }
    tracing::debug!("worker {} leaving", ctx.id);
}
