//! Runtime system
//!
//! Work-stealing deques, slab memory, machine topology, the dataflow layer
//! and the worker pool that executes it.

pub mod dataflow;
pub mod deque;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod topology;
