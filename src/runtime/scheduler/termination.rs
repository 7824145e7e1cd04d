//! Quiescence detection for the worker pool.
//!
//! Every worker counts the task frames it created and executed. The run is
//! over once every worker is idle and the executed total matches the
//! created total. Executed counts are summed before created counts: both
//! only grow, so equal sums mean every frame created so far has finished.
//! Frames waiting on unsatisfied inputs keep the totals apart, so a graph
//! that can never complete never terminates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Debug)]
pub struct Termination {
    created: Box<[CachePadded<AtomicUsize>]>,
    executed: Box<[CachePadded<AtomicUsize>]>,
    idle: Box<[CachePadded<AtomicBool>]>,
    done: AtomicBool,
    aborted: AtomicBool,
}

impl Termination {
    pub fn new(num_workers: usize) -> Self {
        let padded = |_| CachePadded::new(AtomicUsize::new(0));
        Self {
            created: (0..num_workers).map(padded).collect(),
            executed: (0..num_workers).map(padded).collect(),
            idle: (0..num_workers)
                .map(|_| CachePadded::new(AtomicBool::new(false)))
                .collect(),
            done: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn record_created(
        &self,
        worker: usize,
    ) {
        self.created[worker].fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_executed(
        &self,
        worker: usize,
    ) {
        self.executed[worker].fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn set_busy(
        &self,
        worker: usize,
    ) {
        self.idle[worker].store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn set_idle(
        &self,
        worker: usize,
    ) {
        self.idle[worker].store(true, Ordering::SeqCst);
    }

    pub fn created_total(&self) -> usize {
        self.created.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn executed_total(&self) -> usize {
        self.executed.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Check for quiescence and latch `done` when reached.
    pub fn check(&self) -> bool {
        if self.is_done() {
            return true;
        }
        if !self.idle.iter().all(|idle| idle.load(Ordering::SeqCst)) {
            return false;
        }
        let executed = self.executed_total();
        let created = self.created_total();
        if executed == created {
            self.done.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Stop every worker, e.g. after a task panicked.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}
