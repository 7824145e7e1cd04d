//! Per-worker counters.
//!
//! Counters are observability only: they never steer scheduling. Each
//! worker updates its own block; the report reads them after the run.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Counters of one worker.
#[derive(Debug)]
pub struct WorkerCounters {
    /// Task frames created.
    pub frames_created: AtomicUsize,
    /// Task frames executed.
    pub frames_executed: AtomicUsize,
    /// Sink frames fabricated by ticks.
    pub sinks_created: AtomicUsize,
    /// Frames found in the cache slot.
    pub cache_hits: AtomicUsize,
    /// Frames taken from the local deque.
    pub local_takes: AtomicUsize,
    /// Steal attempts, successful or not.
    pub steal_attempts: AtomicUsize,
    /// Successful steals per memory level.
    pub steals_by_level: Box<[AtomicUsize]>,
    /// Frames pushed to other workers per memory level.
    pub pushes_by_level: Box<[AtomicUsize]>,
    /// Pushes abandoned because the target inbox was full.
    pub push_rejections: AtomicUsize,
    /// Frames imported from the push inbox.
    pub imported: AtomicUsize,
    /// Producer/consumer matches.
    pub matches: AtomicUsize,
    /// Explicit stream ticks.
    pub ticks: AtomicUsize,
    /// Broadcast copies to peeking views.
    pub broadcasts: AtomicUsize,
    /// Buffers handed off without copying.
    pub reuse_hits: AtomicUsize,
    /// Reused buffers that had to be copied.
    pub reuse_copies: AtomicUsize,
    /// Rounds that found no work.
    pub idle_rounds: AtomicUsize,
    /// Input bytes consumed per memory level between writer and reader.
    pub bytes_by_level: Box<[AtomicU64]>,
}

fn zeroed<T: Default>(len: usize) -> Box<[T]> {
    (0..len).map(|_| T::default()).collect()
}

impl WorkerCounters {
    /// Counters for a machine with `levels` memory levels.
    pub fn new(levels: usize) -> Self {
        Self {
            frames_created: AtomicUsize::new(0),
            frames_executed: AtomicUsize::new(0),
            sinks_created: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            local_takes: AtomicUsize::new(0),
            steal_attempts: AtomicUsize::new(0),
            steals_by_level: zeroed(levels),
            pushes_by_level: zeroed(levels),
            push_rejections: AtomicUsize::new(0),
            imported: AtomicUsize::new(0),
            matches: AtomicUsize::new(0),
            ticks: AtomicUsize::new(0),
            broadcasts: AtomicUsize::new(0),
            reuse_hits: AtomicUsize::new(0),
            reuse_copies: AtomicUsize::new(0),
            idle_rounds: AtomicUsize::new(0),
            bytes_by_level: zeroed(levels),
        }
    }

    #[inline]
    pub fn record_created(&self) {
        self.frames_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_executed(&self) {
        self.frames_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink(&self) {
        self.sinks_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_local_take(&self) {
        self.local_takes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_steal_attempt(&self) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_steal(
        &self,
        level: usize,
    ) {
        if let Some(slot) = self.steals_by_level.get(level) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_push(
        &self,
        level: usize,
    ) {
        if let Some(slot) = self.pushes_by_level.get(level) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_push_rejection(&self) {
        self.push_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_imported(
        &self,
        count: usize,
    ) {
        self.imported.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_matches(
        &self,
        count: usize,
    ) {
        if count > 0 {
            self.matches.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_broadcast(
        &self,
        copies: usize,
    ) {
        self.broadcasts.fetch_add(copies, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reuse_hit(&self) {
        self.reuse_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reuse_copy(&self) {
        self.reuse_copies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_idle(&self) {
        self.idle_rounds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bytes(
        &self,
        level: usize,
        bytes: u64,
    ) {
        if let Some(slot) = self.bytes_by_level.get(level) {
            slot.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Share of steal attempts that succeeded.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steal_attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 1.0;
        }
        let steals: usize = self
            .steals_by_level
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum();
        steals as f64 / attempts as f64
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |a: &AtomicUsize| a.load(Ordering::Relaxed);
        CountersSnapshot {
            frames_created: load(&self.frames_created),
            frames_executed: load(&self.frames_executed),
            sinks_created: load(&self.sinks_created),
            cache_hits: load(&self.cache_hits),
            local_takes: load(&self.local_takes),
            steal_attempts: load(&self.steal_attempts),
            steals_by_level: self.steals_by_level.iter().map(load).collect(),
            pushes_by_level: self.pushes_by_level.iter().map(load).collect(),
            push_rejections: load(&self.push_rejections),
            imported: load(&self.imported),
            matches: load(&self.matches),
            ticks: load(&self.ticks),
            broadcasts: load(&self.broadcasts),
            reuse_hits: load(&self.reuse_hits),
            reuse_copies: load(&self.reuse_copies),
            idle_rounds: load(&self.idle_rounds),
            bytes_by_level: self
                .bytes_by_level
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Plain copy of [`WorkerCounters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub frames_created: usize,
    pub frames_executed: usize,
    pub sinks_created: usize,
    pub cache_hits: usize,
    pub local_takes: usize,
    pub steal_attempts: usize,
    pub steals_by_level: Vec<usize>,
    pub pushes_by_level: Vec<usize>,
    pub push_rejections: usize,
    pub imported: usize,
    pub matches: usize,
    pub ticks: usize,
    pub broadcasts: usize,
    pub reuse_hits: usize,
    pub reuse_copies: usize,
    pub idle_rounds: usize,
    pub bytes_by_level: Vec<u64>,
}

impl CountersSnapshot {
    pub fn steals(&self) -> usize {
        self.steals_by_level.iter().sum()
    }

    pub fn pushes(&self) -> usize {
        self.pushes_by_level.iter().sum()
    }

    /// Element-wise sum, used for run totals.
    pub fn merge(
        &mut self,
        other: &CountersSnapshot,
    ) {
        fn add_vec<T: Copy + std::ops::AddAssign + Default>(
            into: &mut Vec<T>,
            from: &[T],
        ) {
            if into.len() < from.len() {
                into.resize(from.len(), T::default());
            }
            for (a, b) in into.iter_mut().zip(from) {
                *a += *b;
            }
        }
        self.frames_created += other.frames_created;
        self.frames_executed += other.frames_executed;
        self.sinks_created += other.sinks_created;
        self.cache_hits += other.cache_hits;
        self.local_takes += other.local_takes;
        self.steal_attempts += other.steal_attempts;
        add_vec(&mut self.steals_by_level, &other.steals_by_level);
        add_vec(&mut self.pushes_by_level, &other.pushes_by_level);
        self.push_rejections += other.push_rejections;
        self.imported += other.imported;
        self.matches += other.matches;
        self.ticks += other.ticks;
        self.broadcasts += other.broadcasts;
        self.reuse_hits += other.reuse_hits;
        self.reuse_copies += other.reuse_copies;
        self.idle_rounds += other.idle_rounds;
        add_vec(&mut self.bytes_by_level, &other.bytes_by_level);
    }
}

/// Bytes moved from writer to reader, `workers × workers`.
#[derive(Debug)]
pub struct TransferMatrix {
    workers: usize,
    cells: Box<[AtomicU64]>,
}

impl TransferMatrix {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            cells: zeroed(workers * workers),
        }
    }

    #[inline]
    pub fn record(
        &self,
        writer: usize,
        reader: usize,
        bytes: u64,
    ) {
        if writer < self.workers && reader < self.workers {
            self.cells[writer * self.workers + reader].fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Rows are writers, columns readers.
    pub fn snapshot(&self) -> Vec<Vec<u64>> {
        (0..self.workers)
            .map(|w| {
                (0..self.workers)
                    .map(|r| self.cells[w * self.workers + r].load(Ordering::Relaxed))
                    .collect()
            })
            .collect()
    }
}
