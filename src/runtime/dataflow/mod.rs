//! The dataflow layer: frames, views, streams and dependence resolution.
//!
//! A [`Frame`] declares [`View`]s on [`Stream`]s. Resolving a view matches
//! it against the views queued on the other side of the stream; every
//! match decrements the counter of the frame that was waiting, and a frame
//! whose counter reaches zero is handed to the scheduler through its
//! [`TaskContext`].
//!
//! ```rust
//! use streamdf::runtime::dataflow::{DataflowExt, FrameBuilder, Stream};
//! use streamdf::runtime::scheduler::ManualContext;
//!
//! let ctx = ManualContext::new();
//! let numbers = Stream::of::<u64>();
//!
//! FrameBuilder::new()
//!     .input(&numbers, 2)
//!     .spawn(&ctx, |scope| {
//!         assert_eq!(scope.input::<u64>(0), &[1, 2]);
//!     });
//! for value in [1u64, 2] {
//!     FrameBuilder::new()
//!         .output(&numbers, 1)
//!         .spawn(&ctx, move |scope| scope.write(0, &[value]));
//! }
//! ctx.run_until_idle();
//! ctx.stream_release(&numbers);
//! ```

use std::sync::Arc;

pub mod buffer;
pub mod element;
pub mod frame;
pub mod resolve;
pub mod reuse;
pub mod stream;
pub mod view;

pub use buffer::StreamBuffer;
pub use element::Element;
pub use frame::{Frame, FrameBuilder, FrameId, FrameKind, TaskBody, TaskScope};
pub use reuse::ReuseOutcome;
pub use stream::{Stream, StreamArray};
pub use view::{Target, View, ViewHandle, ViewKind, ViewSpec};

use crate::runtime::memory::SlabCache;
use crate::runtime::scheduler::{WorkerCounters, WorkerState};
use crate::util::config::ReuseConfig;

/// Everything dataflow operations need from the worker executing them.
///
/// Implemented by the scheduler's worker context and by
/// [`ManualContext`](crate::runtime::scheduler::ManualContext).
pub trait TaskContext {
    fn worker_id(&self) -> usize;

    fn num_workers(&self) -> usize;

    /// NUMA node of the executing worker.
    fn numa_node(&self) -> usize;

    /// Slab cache of the executing worker's node.
    fn slab(&self) -> &Arc<SlabCache>;

    /// Allocate consumer buffers at first write instead of at resolution.
    fn deferred_alloc(&self) -> bool {
        true
    }

    fn reuse_config(&self) -> &ReuseConfig;

    /// Take a frame whose counter reached zero.
    fn schedule(
        &self,
        frame: Arc<Frame>,
    );

    /// A task frame was created.
    fn frame_created(&self);

    fn counters(&self) -> &WorkerCounters;

    /// `bytes` of a frame about to run were written by worker `writer`.
    fn account_input(
        &self,
        _writer: usize,
        _bytes: u64,
    ) {
    }

    /// Enter `state`, returning the state to restore afterwards.
    fn record_state(
        &self,
        _state: WorkerState,
    ) -> Option<WorkerState> {
        None
    }

    fn restore_state(
        &self,
        _previous: Option<WorkerState>,
    ) {
    }
}

/// Dataflow operations available on every [`TaskContext`].
pub trait DataflowExt: TaskContext {
    /// Create a frame with an explicit counter. Its views still have to be
    /// resolved with [`resolve`](DataflowExt::resolve).
    fn create_frame(
        &self,
        sync_count: isize,
        size: usize,
        views: Vec<ViewSpec>,
        body: TaskBody,
    ) -> Arc<Frame> {
        Frame::create(self, sync_count, size, views, body)
    }

    fn decrement_by(
        &self,
        frame: &Arc<Frame>,
        n: isize,
    ) {
        resolve::decrement_by(self, frame, n)
    }

    fn resolve(
        &self,
        view: &ViewHandle,
        stream: &Arc<Stream>,
        is_consumer: bool,
    ) {
        resolve::resolve_dependence(self, view, stream, is_consumer)
    }

    fn resolve_array(
        &self,
        views: &[ViewHandle],
        streams: &StreamArray,
        is_consumer: bool,
    ) {
        resolve::resolve_array(self, views, streams, is_consumer)
    }

    fn tick(
        &self,
        stream: &Arc<Stream>,
        count: usize,
    ) {
        resolve::tick(self, stream, count)
    }

    /// Publish output `index` of `frame` outside its body.
    fn produce(
        &self,
        frame: &Arc<Frame>,
        index: usize,
    ) {
        resolve::produce(self, frame, index)
    }

    fn stream_reference(
        &self,
        stream: &Arc<Stream>,
    ) {
        resolve::stream_reference(stream)
    }

    fn stream_release(
        &self,
        stream: &Arc<Stream>,
    ) {
        resolve::stream_release(self, stream)
    }

    /// Release every stream of `array`.
    fn stream_array_release(
        &self,
        streams: &StreamArray,
    ) {
        for stream in streams.iter() {
            resolve::stream_release(self, stream);
        }
    }
}

impl<C: TaskContext + ?Sized> DataflowExt for C {}
