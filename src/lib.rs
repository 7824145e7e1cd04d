//! streamdf: a data-flow task-parallel runtime.
//!
//! Programs are graphs of task frames connected by streams. A frame
//! declares how many elements it consumes from, peeks at or produces on
//! each stream; it runs once every input window is filled. Frames execute
//! on a pool of work-stealing workers that prefer memory close to the
//! data they read.
//!
//! # Example
//!
//! ```no_run
//! use streamdf::{FrameBuilder, Runtime, RuntimeConfig, Stream};
//! use streamdf::runtime::dataflow::DataflowExt;
//!
//! fn main() -> streamdf::Result<()> {
//!     let runtime = Runtime::new(RuntimeConfig::default())?;
//!     let report = runtime.run(|scope| {
//!         let ctx = scope.ctx();
//!         let numbers = Stream::of::<u64>();
//!         FrameBuilder::new()
//!             .input(&numbers, 4)
//!             .spawn(ctx, |scope| {
//!                 let sum: u64 = scope.input::<u64>(0).iter().sum();
//!                 tracing::info!("sum = {}", sum);
//!             });
//!         for value in 0..4u64 {
//!             FrameBuilder::new()
//!                 .output(&numbers, 1)
//!                 .spawn(ctx, move |scope| scope.write(0, &[value]));
//!         }
//!         ctx.stream_release(&numbers);
//!     })?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod demos;
pub mod runtime;
pub mod util;

pub use anyhow::{Context, Result};

pub use runtime::dataflow::{DataflowExt, FrameBuilder, Stream, StreamArray, TaskContext, TaskScope};
pub use runtime::error::RuntimeError;
pub use runtime::scheduler::{ManualContext, RunReport, Runtime};
pub use util::config::RuntimeConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
