//! Worker pool executing dataflow frames.
//!
//! [`Runtime::run`] starts one thread per worker, seeds worker 0 with the
//! root task and returns once the pool is quiescent: every worker is idle
//! and every frame created has been executed. Ready frames go to the
//! readying worker's cache slot (displacing the previous occupant into the
//! deque) unless a push strategy places them elsewhere.

pub mod distributor;
pub mod manual;
pub mod push;
pub mod stats;
pub mod termination;
pub mod trace;
pub mod worker;

pub use distributor::WorkDistributor;
pub use manual::ManualContext;
pub use push::{push_beneficial, strategy_for, DataOwner, DominantWriter, NumaScore, PushStrategy};
pub use stats::{CountersSnapshot, TransferMatrix, WorkerCounters};
pub use termination::Termination;
pub use trace::{StateEvent, StateLog, WorkerState};
pub use worker::WorkerContext;

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::runtime::dataflow::{FrameBuilder, TaskContext, TaskScope};
use crate::runtime::deque;
use crate::runtime::error::RuntimeError;
use crate::runtime::memory::{
    FirstTouchPlacement, PlacementProbe, SlabAllocator, SlabStatsSnapshot,
};
use crate::runtime::topology::{NumaNode, Topology};
use crate::util::config::RuntimeConfig;
use worker::Shared;

/// A configured worker pool. Threads exist only for the duration of
/// [`run`](Runtime::run); a runtime can run any number of graphs in turn.
pub struct Runtime {
    config: RuntimeConfig,
    topology: Arc<Topology>,
    allocator: SlabAllocator,
    strategy: Arc<RwLock<Arc<dyn PushStrategy>>>,
}

impl Runtime {
    /// Runtime whose topology is derived from `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let topology = Topology::from_config(&config)?;
        Self::with_topology(config, topology)
    }

    /// Runtime over an explicit topology.
    pub fn with_topology(
        config: RuntimeConfig,
        topology: Topology,
    ) -> Result<Self, RuntimeError> {
        Self::with_placement(config, topology, Arc::new(FirstTouchPlacement))
    }

    /// Runtime whose slab caches verify page placement with `probe`.
    pub fn with_placement(
        config: RuntimeConfig,
        topology: Topology,
        probe: Arc<dyn PlacementProbe>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        if topology.num_workers() != config.num_workers {
            return Err(RuntimeError::TopologyMismatch {
                expected: config.num_workers,
                found: topology.num_workers(),
            });
        }
        let allocator = SlabAllocator::new(topology.numa_nodes(), &config.slab, probe);
        let strategy = Arc::new(RwLock::new(strategy_for(config.push.strategy)));
        Ok(Self {
            config,
            topology: Arc::new(topology),
            allocator,
            strategy,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn allocator(&self) -> &SlabAllocator {
        &self.allocator
    }

    /// Replace the push strategy used by subsequent runs.
    pub fn set_push_strategy(
        &self,
        strategy: Arc<dyn PushStrategy>,
    ) {
        *self.strategy.write() = strategy;
    }

    pub fn push_strategy(&self) -> Arc<dyn PushStrategy> {
        self.strategy.read().clone()
    }

    /// Execute `root` and everything it spawns, transitively.
    pub fn run<F>(
        &self,
        root: F,
    ) -> Result<RunReport, RuntimeError>
    where
        F: FnOnce(&mut TaskScope<'_>) + Send + 'static,
    {
        let num_workers = self.topology.num_workers();
        let started = Instant::now();

        let (workers, stealers): (Vec<_>, Vec<_>) = (0..num_workers)
            .map(|_| deque::deque(self.config.deque_log_size))
            .unzip();
        let levels = self.topology.num_levels();
        let shared = Shared {
            config: self.config.clone(),
            topology: self.topology.clone(),
            nodes: NumaNode::build_all(&self.topology, &self.allocator),
            distributor: WorkDistributor::new(
                self.topology.clone(),
                stealers,
                self.config.steal.clone(),
                self.config.push.clone(),
                self.strategy.clone(),
            ),
            termination: Termination::new(num_workers),
            counters: (0..num_workers).map(|_| WorkerCounters::new(levels)).collect(),
            logs: (0..num_workers)
                .map(|_| StateLog::new(started, self.config.max_trace_events))
                .collect(),
            transfers: TransferMatrix::new(num_workers),
        };

        tracing::info!(
            "starting {} workers on {} NUMA nodes",
            num_workers,
            self.topology.numa_nodes()
        );

        let mut root = Some(root);
        let outcome = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(num_workers);
            for (id, deque) in workers.into_iter().enumerate() {
                let shared = &shared;
                let root = if id == 0 { root.take() } else { None };
                let handle = thread::Builder::new()
                    .name(format!("streamdf-worker-{}", id))
                    .spawn_scoped(scope, move || {
                        let span = tracing::debug_span!("worker", id);
                        let _enter = span.enter();
                        if shared.config.pin_workers {
                            pin_to_cpu(id, shared.topology.cpu_of(id));
                        }
                        let ctx = WorkerContext::new(id, shared, deque);
                        if let Some(root) = root {
                            ctx.record_state(WorkerState::Seeking);
                            FrameBuilder::new().spawn(&ctx, root);
                        }
                        worker::run_worker(&ctx);
                    });
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        shared.termination.abort();
                        return Err(RuntimeError::Spawn { worker: id, source });
                    },
                }
            }
            let mut panicked = None;
            for (id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() && panicked.is_none() {
                    panicked = Some(id);
                }
            }
            match panicked {
                Some(id) => Err(RuntimeError::WorkerPanicked(id)),
                None => Ok(()),
            }
        });
        outcome?;

        let report = RunReport::collect(&shared, &self.allocator, started, &*self.push_strategy());
        tracing::info!(
            "run finished: {} frames in {:.3} ms",
            report.frames_executed,
            report.wall_time_ms
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.topology.num_workers())
            .field("numa_nodes", &self.topology.numa_nodes())
            .field("push", &self.config.push.enabled)
            .finish()
    }
}

fn pin_to_cpu(
    worker: usize,
    cpu: usize,
) {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        tracing::warn!("worker {}: core ids unavailable, not pinning", worker);
        return;
    };
    match core_ids.into_iter().find(|core| core.id == cpu) {
        Some(core) if core_affinity::set_for_current(core) => {
            tracing::debug!("worker {} pinned to cpu {}", worker, cpu);
        },
        _ => tracing::warn!("worker {}: failed to pin to cpu {}", worker, cpu),
    }
}

/// Summary of one [`Runtime::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workers: usize,
    pub numa_nodes: usize,
    pub wall_time_ms: f64,
    pub frames_created: usize,
    pub frames_executed: usize,
    pub push_strategy: Option<String>,
    pub totals: CountersSnapshot,
    pub per_worker: Vec<CountersSnapshot>,
    pub slab: SlabStatsSnapshot,
    /// Input bytes per (writer, reader) worker pair.
    pub transfers: Vec<Vec<u64>>,
    /// Per-worker state logs; empty unless tracing was enabled.
    pub state_logs: Vec<Vec<StateEvent>>,
}

impl RunReport {
    fn collect(
        shared: &Shared,
        allocator: &SlabAllocator,
        started: Instant,
        strategy: &dyn PushStrategy,
    ) -> Self {
        let per_worker: Vec<CountersSnapshot> =
            shared.counters.iter().map(WorkerCounters::snapshot).collect();
        let mut totals = CountersSnapshot::default();
        for snapshot in &per_worker {
            totals.merge(snapshot);
        }
        let state_logs = if shared.config.max_trace_events > 0 {
            shared.logs.iter().map(StateLog::events).collect()
        } else {
            Vec::new()
        };
        Self {
            workers: shared.topology.num_workers(),
            numa_nodes: shared.topology.numa_nodes(),
            wall_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            frames_created: shared.termination.created_total(),
            frames_executed: shared.termination.executed_total(),
            push_strategy: shared
                .config
                .push
                .enabled
                .then(|| strategy.name().to_string()),
            totals,
            per_worker,
            slab: allocator.stats(),
            transfers: shared.transfers.snapshot(),
            state_logs,
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(
            f,
            "workers: {} ({} NUMA nodes), wall time {:.3} ms",
            self.workers, self.numa_nodes, self.wall_time_ms
        )?;
        writeln!(
            f,
            "frames: {} created, {} executed, {} sinks",
            self.frames_created, self.frames_executed, self.totals.sinks_created
        )?;
        writeln!(
            f,
            "scheduling: {} cache hits, {} local takes, {} steals / {} attempts",
            self.totals.cache_hits,
            self.totals.local_takes,
            self.totals.steals(),
            self.totals.steal_attempts
        )?;
        writeln!(f, "steals by level: {:?}", self.totals.steals_by_level)?;
        if let Some(strategy) = &self.push_strategy {
            writeln!(
                f,
                "pushes ({}): {:?}, {} rejected",
                strategy, self.totals.pushes_by_level, self.totals.push_rejections
            )?;
        }
        writeln!(
            f,
            "streams: {} matches, {} ticks, {} broadcast copies",
            self.totals.matches, self.totals.ticks, self.totals.broadcasts
        )?;
        writeln!(
            f,
            "reuse: {} hand-offs, {} copies",
            self.totals.reuse_hits, self.totals.reuse_copies
        )?;
        writeln!(f, "input bytes by level: {:?}", self.totals.bytes_by_level)?;
        write!(
            f,
            "slab: {} allocations, {} frees, {} refills",
            self.slab.allocations, self.slab.frees, self.slab.refills
        )
    }
}
