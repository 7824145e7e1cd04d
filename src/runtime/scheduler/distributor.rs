//! Work distribution: finding the next frame for an idle worker.
//!
//! Search order for a worker: frames pushed into its inbox are imported
//! first, then its cache slot, its own deque, the last successful victim,
//! and finally a steal ladder walking the memory hierarchy outward. Each
//! ladder step makes a bounded number of random attempts among the
//! siblings sharing that level before moving one level further.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use rand::Rng;

use super::push::{push_beneficial, PushStrategy};
use super::worker::WorkerContext;
use crate::runtime::dataflow::Frame;
use crate::runtime::deque::{Steal, Stealer};
use crate::runtime::topology::Topology;
use crate::util::config::{PushConfig, StealConfig};

/// Shared view of every worker's deque and push inbox.
pub struct WorkDistributor {
    topology: Arc<Topology>,
    stealers: Vec<Stealer<Arc<Frame>>>,
    inboxes: Vec<ArrayQueue<Arc<Frame>>>,
    steal: StealConfig,
    push: PushConfig,
    strategy: Arc<RwLock<Arc<dyn PushStrategy>>>,
}

impl WorkDistributor {
    pub fn new(
        topology: Arc<Topology>,
        stealers: Vec<Stealer<Arc<Frame>>>,
        steal: StealConfig,
        push: PushConfig,
        strategy: Arc<RwLock<Arc<dyn PushStrategy>>>,
    ) -> Self {
        let inboxes = (0..stealers.len())
            .map(|_| ArrayQueue::new(push.inbox_slots))
            .collect();
        Self {
            topology,
            stealers,
            inboxes,
            steal,
            push,
            strategy,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Next frame for `worker`, or `None` once every source is exhausted.
    pub fn obtain_work(
        &self,
        worker: &WorkerContext<'_>,
    ) -> Option<Arc<Frame>> {
        self.import_pushes(worker);

        if let Some(frame) = worker.take_cached() {
            worker.counters_ref().record_cache_hit();
            return Some(frame);
        }
        if let Some(frame) = worker.deque().take_bottom() {
            worker.counters_ref().record_local_take();
            return Some(frame);
        }
        self.steal_work(worker)
    }

    /// Move frames pushed to `worker` into its cache slot (first one, when
    /// empty) and its deque.
    fn import_pushes(
        &self,
        worker: &WorkerContext<'_>,
    ) {
        let inbox = &self.inboxes[worker.id()];
        let mut imported = 0;
        while let Some(frame) = inbox.pop() {
            imported += 1;
            if let Some(frame) = worker.fill_cache_if_empty(frame) {
                worker.deque().push_bottom(frame);
            }
        }
        if imported > 0 {
            worker.counters_ref().record_imported(imported);
        }
    }

    fn try_steal_from(
        &self,
        worker: &WorkerContext<'_>,
        victim: usize,
    ) -> Option<Arc<Frame>> {
        worker.counters_ref().record_steal_attempt();
        match self.stealers[victim].steal() {
            Steal::Success(frame) => {
                let level = self.topology.lowest_common_level(worker.id(), victim);
                worker.counters_ref().record_steal(level);
                worker.set_last_victim(Some(victim));
                tracing::trace!("worker {} stole {:?} from {}", worker.id(), frame.id(), victim);
                Some(frame)
            },
            Steal::Retry | Steal::Empty => None,
        }
    }

    fn steal_work(
        &self,
        worker: &WorkerContext<'_>,
    ) -> Option<Arc<Frame>> {
        let id = worker.id();

        if self.steal.cache_last_victim {
            if let Some(victim) = worker.last_victim() {
                if let Some(frame) = self.try_steal_from(worker, victim) {
                    return Some(frame);
                }
                worker.set_last_victim(None);
            }
        }

        for level in 1..self.topology.num_levels() {
            let siblings = self.topology.siblings_at_level(id, level);
            if siblings.is_empty() {
                continue;
            }
            for _ in 0..self.steal.attempts_at(level - 1) {
                let victim = siblings[worker.rng().random_range(0..siblings.len())];
                if let Some(frame) = self.try_steal_from(worker, victim) {
                    return Some(frame);
                }
            }
        }
        None
    }

    pub fn push_enabled(&self) -> bool {
        self.push.enabled
    }

    /// Worker that `frame` should be pushed to from `current`, if any.
    pub fn push_target(
        &self,
        frame: &Frame,
        current: usize,
    ) -> Option<usize> {
        let strategy = self.strategy.read().clone();
        let target = push_beneficial(&*strategy, frame, current, &self.topology, &self.push)?;
        tracing::debug!(
            "{} push of {:?}: worker {} -> {}",
            strategy.name(),
            frame.id(),
            current,
            target
        );
        Some(target)
    }

    /// Place `frame` in `target`'s inbox; gives it back when the inbox is
    /// full.
    pub fn try_push(
        &self,
        frame: Arc<Frame>,
        target: usize,
    ) -> Result<(), Arc<Frame>> {
        self.inboxes[target].push(frame)
    }
}

impl std::fmt::Debug for WorkDistributor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkDistributor")
            .field("workers", &self.stealers.len())
            .field("push", &self.push.enabled)
            .finish()
    }
}
