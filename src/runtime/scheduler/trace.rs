//! Timestamped worker state log.

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// What a worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Seeking,
    TaskExec,
    Create,
    Resolve,
    Decrement,
    Broadcast,
    Reuse,
}

/// One state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateEvent {
    /// Nanoseconds since the log was created.
    pub at_ns: u64,
    pub state: WorkerState,
}

/// Bounded per-worker log. Consecutive duplicates are collapsed; once full
/// further events are dropped.
#[derive(Debug)]
pub struct StateLog {
    origin: Instant,
    capacity: usize,
    inner: Mutex<LogInner>,
}

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<StateEvent>,
    current: Option<WorkerState>,
}

impl StateLog {
    pub fn new(
        origin: Instant,
        capacity: usize,
    ) -> Self {
        Self {
            origin,
            capacity,
            inner: Mutex::new(LogInner::default()),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Enter `state`, returning the state it interrupts.
    pub fn record(
        &self,
        state: WorkerState,
    ) -> Option<WorkerState> {
        if !self.enabled() {
            return None;
        }
        let mut inner = self.inner.lock();
        let previous = inner.current.replace(state);
        if inner.events.len() < self.capacity && inner.events.last().map(|e| e.state) != Some(state) {
            let at_ns = self.origin.elapsed().as_nanos() as u64;
            inner.events.push(StateEvent { at_ns, state });
        }
        previous
    }

    /// Return to the state saved by [`record`](StateLog::record).
    pub fn restore(
        &self,
        previous: Option<WorkerState>,
    ) {
        if let Some(state) = previous {
            self.record(state);
        }
    }

    pub fn current(&self) -> Option<WorkerState> {
        self.inner.lock().current
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.inner.lock().events.clone()
    }
}
