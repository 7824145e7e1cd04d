//! Lock-free work-stealing deque.
//!
//! [`deque`] returns a [`Worker`] (owner end: `push_bottom` / `take_bottom`)
//! and a [`Stealer`] (any thread: `steal`). The backing [`RingBuffer`]
//! doubles when full.

pub mod buffer;
pub mod chase_lev;

pub use buffer::RingBuffer;
pub use chase_lev::{deque, Steal, Stealer, TaskPointer, Worker};

#[cfg(test)]
mod tests;
