//! Runtime errors and fatal contract checks.
//!
//! Recoverable failures (bad configuration, thread spawn problems) are
//! reported through [`RuntimeError`]. Misuse of the dataflow interface by
//! generated code is not recoverable: [`contract_violation`] logs the
//! problem and panics.

use crate::util::config::ConfigError;

/// Errors surfaced by [`Runtime`](crate::runtime::scheduler::Runtime).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("topology describes {found} workers, configuration asks for {expected}")]
    TopologyMismatch { expected: usize, found: usize },
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

/// Report a violated usage contract and abort the current task.
#[cold]
#[track_caller]
pub fn contract_violation(message: std::fmt::Arguments<'_>) -> ! {
    tracing::error!("contract violation: {}", message);
    panic!("libstreamdf: {}", message);
}

/// `contract_violation` with `format!` syntax.
#[macro_export]
macro_rules! violation {
    ($($arg:tt)*) => {
        $crate::runtime::error::contract_violation(format_args!($($arg)*))
    };
}
