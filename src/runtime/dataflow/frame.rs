//! Frames: schedulable task activations.
//!
//! A frame is created with a synchronization counter, wired into its
//! streams, and becomes ready when the counter reaches zero. It is then
//! executed exactly once and releases everything it holds.

use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::buffer::StreamBuffer;
use super::element::{cast_slice, cast_slice_mut, Element};
use super::resolve;
use super::reuse;
use super::stream::{Stream, StreamArray};
use super::view::{View, ViewHandle, ViewKind, ViewSpec};
use super::TaskContext;
use crate::runtime::memory::SlabBlock;
use crate::runtime::scheduler::WorkerState;
use crate::violation;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(0);

/// Frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

/// What happens when a frame's counter reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Scheduled and executed.
    Task,
    /// Discarded: absorbs data nobody else consumes.
    Sink,
}

/// Body of a task frame.
pub type TaskBody = Box<dyn FnOnce(&mut TaskScope<'_>) + Send>;

/// A schedulable unit.
pub struct Frame {
    id: FrameId,
    kind: FrameKind,
    sync: AtomicIsize,
    size: usize,
    locals: Mutex<Option<SlabBlock>>,
    body: Mutex<Option<TaskBody>>,
    views: Box<[View]>,
    /// Input bytes written per producing worker.
    input_bytes: Box<[AtomicU64]>,
}

impl Frame {
    /// Allocate a task frame with `size` zeroed local bytes.
    ///
    /// The frame is not scheduled: it becomes ready once `sync_count` has
    /// been decremented to zero.
    pub fn create<C: TaskContext + ?Sized>(
        ctx: &C,
        sync_count: isize,
        size: usize,
        views: Vec<ViewSpec>,
        body: TaskBody,
    ) -> Arc<Frame> {
        if sync_count <= 0 {
            violation!("frame created with non-positive counter {}", sync_count);
        }
        let previous = ctx.record_state(WorkerState::Create);
        let locals = (size > 0).then(|| ctx.slab().allocate_zeroed(size));
        let frame = Self::build(ctx, FrameKind::Task, sync_count, size, locals, views, Some(body));
        ctx.frame_created();
        ctx.restore_state(previous);
        tracing::trace!("created {:?} with counter {}", frame.id, sync_count);
        frame
    }

    /// Throwaway consumer of `count` elements.
    pub(crate) fn sink<C: TaskContext + ?Sized>(
        ctx: &C,
        elem_size: usize,
        count: usize,
    ) -> Arc<Frame> {
        let spec = ViewSpec::input(elem_size, count);
        let frame = Self::build(
            ctx,
            FrameKind::Sink,
            spec.sync_contribution(),
            0,
            None,
            vec![spec],
            None,
        );
        ctx.counters().record_sink();
        frame
    }

    fn build<C: TaskContext + ?Sized>(
        ctx: &C,
        kind: FrameKind,
        sync_count: isize,
        size: usize,
        locals: Option<SlabBlock>,
        views: Vec<ViewSpec>,
        body: Option<TaskBody>,
    ) -> Arc<Frame> {
        Arc::new(Frame {
            id: FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            sync: AtomicIsize::new(sync_count),
            size,
            locals: Mutex::new(locals),
            body: Mutex::new(body),
            views: views.into_iter().map(View::new).collect(),
            input_bytes: (0..ctx.num_workers()).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Bytes of frame-local storage.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current synchronization counter.
    pub fn sync_count(&self) -> isize {
        self.sync.load(Ordering::Acquire)
    }

    #[inline]
    pub fn view(
        &self,
        index: usize,
    ) -> &View {
        match self.views.get(index) {
            Some(view) => view,
            None => violation!("{:?} has no view {}", self.id, index),
        }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Handle to view `index`.
    pub fn handle(
        self: &Arc<Self>,
        index: usize,
    ) -> ViewHandle {
        self.view(index);
        ViewHandle::new(self.clone(), index)
    }

    /// Input bytes written by each worker so far.
    pub fn input_bytes(&self) -> Vec<u64> {
        self.input_bytes
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    /// Total input bytes written so far.
    pub fn total_input_bytes(&self) -> u64 {
        self.input_bytes.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    pub(crate) fn add_input_bytes(
        &self,
        writer: usize,
        bytes: u64,
    ) {
        if let Some(slot) = self.input_bytes.get(writer) {
            slot.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Subtract `n`; true when the counter reached zero.
    pub(crate) fn decrement(
        &self,
        n: isize,
    ) -> bool {
        let previous = self.sync.fetch_sub(n, Ordering::AcqRel);
        let now = previous - n;
        if now < 0 {
            violation!("{:?} counter dropped below zero ({})", self.id, now);
        }
        now == 0
    }

    /// Drop all view references once the frame is done.
    pub(crate) fn retire(&self) {
        for view in self.views.iter() {
            view.clear();
        }
        self.locals.lock().take();
    }

    /// Run the frame body to completion on the calling worker.
    pub fn execute(
        self: Arc<Self>,
        ctx: &dyn TaskContext,
    ) {
        let body = match self.body.lock().take() {
            Some(body) => body,
            None => violation!("{:?} executed twice or has no body", self.id),
        };
        ctx.record_state(WorkerState::TaskExec);

        for (writer, bytes) in self.input_bytes().into_iter().enumerate() {
            if bytes > 0 {
                ctx.account_input(writer, bytes);
            }
        }

        reuse::prepare(ctx, &self);

        let mut inputs = Vec::with_capacity(self.views.len());
        let mut outputs = Vec::with_capacity(self.views.len());
        for (index, view) in self.views.iter().enumerate() {
            let spec = *view.spec();
            match spec.kind {
                ViewKind::Input | ViewKind::Peek => {
                    let handle = ViewHandle::new(self.clone(), index);
                    inputs.push(Some(resolve::ensure_buffer(ctx, &handle)));
                    outputs.push(None);
                },
                ViewKind::Output => {
                    let target = view.state().target.clone();
                    let window = target.map(|target| {
                        let buffer = resolve::ensure_buffer(ctx, &target.consumer);
                        OutputWindow {
                            buffer,
                            offset: target.offset * spec.elem_size,
                            len: spec.burst * spec.elem_size,
                        }
                    });
                    inputs.push(None);
                    outputs.push(window);
                },
            }
        }

        let mut scope = TaskScope {
            ctx,
            frame: &self,
            inputs,
            outputs,
            locals: self.locals.lock().take(),
        };
        body(&mut scope);
        drop(scope);

        for (index, view) in self.views.iter().enumerate() {
            if view.spec().kind == ViewKind::Output && !view.state().produced {
                resolve::produce(ctx, &self, index);
            }
        }
        self.retire();
        tracing::trace!("executed {:?}", self.id);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("sync", &self.sync_count())
            .field("views", &self.views.len())
            .finish()
    }
}

struct OutputWindow {
    buffer: StreamBuffer,
    offset: usize,
    len: usize,
}

/// What a running task body sees.
pub struct TaskScope<'a> {
    ctx: &'a dyn TaskContext,
    frame: &'a Arc<Frame>,
    inputs: Vec<Option<StreamBuffer>>,
    outputs: Vec<Option<OutputWindow>>,
    locals: Option<SlabBlock>,
}

impl<'a> TaskScope<'a> {
    /// Context of the executing worker.
    #[inline]
    pub fn ctx(&self) -> &'a dyn TaskContext {
        self.ctx
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame.id
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.ctx.worker_id()
    }

    /// Zero-initialized frame-local bytes.
    pub fn locals(&mut self) -> &mut [u8] {
        match &mut self.locals {
            Some(block) => block.as_mut_slice(),
            None => &mut [],
        }
    }

    fn check_elem<T: Element>(
        &self,
        view: usize,
    ) {
        let elem = self.frame.view(view).spec().elem_size;
        if elem != std::mem::size_of::<T>() {
            violation!(
                "{:?} view {} holds {}-byte elements, accessed as {}",
                self.frame.id,
                view,
                elem,
                std::any::type_name::<T>()
            );
        }
    }

    /// Data visible through input or peek view `view`.
    pub fn input<T: Element>(
        &self,
        view: usize,
    ) -> &[T] {
        self.check_elem::<T>(view);
        match self.inputs.get(view) {
            // SAFETY: every producer finished writing before the frame became
            // ready and nothing writes the window while the task runs except
            // through `output`, which needs `&mut self`.
            Some(Some(buffer)) => unsafe { cast_slice(buffer.slice(0, buffer.len())) },
            _ => violation!("{:?} view {} is not readable", self.frame.id, view),
        }
    }

    /// Window written by output view `view`.
    pub fn output<T: Element>(
        &mut self,
        view: usize,
    ) -> &mut [T] {
        self.check_elem::<T>(view);
        if self.frame.view(view).state().produced {
            violation!("{:?} view {} written after it was produced", self.frame.id, view);
        }
        match self.outputs.get(view) {
            // SAFETY: the window at `offset` was assigned to this view alone
            // when it was matched; the borrow of `self` keeps it unique.
            Some(Some(w)) => unsafe { cast_slice_mut(w.buffer.slice_mut(w.offset, w.len)) },
            Some(None) if self.frame.view(view).spec().kind == ViewKind::Output => {
                violation!("{:?} output {} was never matched", self.frame.id, view)
            },
            _ => violation!("{:?} view {} is not writable", self.frame.id, view),
        }
    }

    /// Copy `values` into output view `view`.
    pub fn write<T: Element>(
        &mut self,
        view: usize,
        values: &[T],
    ) {
        let window = self.output::<T>(view);
        if window.len() != values.len() {
            violation!(
                "writing {} elements into a burst of {}",
                values.len(),
                window.len()
            );
        }
        window.copy_from_slice(values);
    }

    /// Publish output view `view` now: broadcast to peekers and release the
    /// consumer. Outputs not produced explicitly are produced when the body
    /// returns.
    pub fn produce(
        &mut self,
        view: usize,
    ) {
        resolve::produce(self.ctx, self.frame, view);
    }

    /// Write `values` and produce in one step.
    pub fn emit<T: Element>(
        &mut self,
        view: usize,
        values: &[T],
    ) {
        self.write(view, values);
        self.produce(view);
    }

    /// Raw bytes of input view `view`.
    pub fn input_bytes(
        &self,
        view: usize,
    ) -> &[u8] {
        self.input::<u8>(view)
    }

    /// Write raw bytes into output view `view`.
    pub fn write_bytes(
        &mut self,
        view: usize,
        bytes: &[u8],
    ) {
        let window = match self.outputs.get(view) {
            Some(Some(w)) => w,
            _ => violation!("{:?} view {} is not writable", self.frame.id, view),
        };
        if bytes.len() != window.len {
            violation!("writing {} bytes into a burst of {}", bytes.len(), window.len);
        }
        // SAFETY: see `output`.
        unsafe { window.buffer.slice_mut(window.offset, window.len) }.copy_from_slice(bytes);
    }
}

/// Declarative frame construction: views are listed, the counter is
/// derived from them, and `spawn` wires the frame into its streams.
#[derive(Default)]
pub struct FrameBuilder {
    views: Vec<(ViewSpec, Arc<Stream>)>,
    locals: usize,
    sync_count: Option<isize>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `horizon` elements of `stream`.
    pub fn input(
        mut self,
        stream: &Arc<Stream>,
        horizon: usize,
    ) -> Self {
        self.views
            .push((ViewSpec::input(stream.elem_size(), horizon), stream.clone()));
        self
    }

    /// Observe `horizon` elements of `stream` without consuming them.
    pub fn peek(
        mut self,
        stream: &Arc<Stream>,
        horizon: usize,
    ) -> Self {
        self.views
            .push((ViewSpec::peek(stream.elem_size(), horizon), stream.clone()));
        self
    }

    /// Produce `burst` elements on `stream`.
    pub fn output(
        mut self,
        stream: &Arc<Stream>,
        burst: usize,
    ) -> Self {
        self.views
            .push((ViewSpec::output(stream.elem_size(), burst), stream.clone()));
        self
    }

    /// Produce on `stream` in place, reusing the buffer of input view
    /// `input` (its horizon must equal `burst`).
    pub fn reuse_output(
        mut self,
        stream: &Arc<Stream>,
        burst: usize,
        input: usize,
    ) -> Self {
        match self.views.get(input) {
            Some((spec, _)) if spec.kind == ViewKind::Input => {},
            _ => violation!("view {} is not an input that can be reused", input),
        }
        self.views.push((
            ViewSpec::output(stream.elem_size(), burst).reusing(input),
            stream.clone(),
        ));
        self
    }

    /// One input view per stream of `array`.
    pub fn inputs(
        mut self,
        array: &StreamArray,
        horizon: usize,
    ) -> Self {
        for stream in array.iter() {
            self = self.input(stream, horizon);
        }
        self
    }

    /// One output view per stream of `array`.
    pub fn outputs(
        mut self,
        array: &StreamArray,
        burst: usize,
    ) -> Self {
        for stream in array.iter() {
            self = self.output(stream, burst);
        }
        self
    }

    /// Bytes of zeroed frame-local storage.
    pub fn locals(
        mut self,
        bytes: usize,
    ) -> Self {
        self.locals = bytes;
        self
    }

    /// Override the derived counter. The caller then owns every decrement
    /// beyond those performed by stream matching.
    pub fn sync_count(
        mut self,
        count: isize,
    ) -> Self {
        self.sync_count = Some(count);
        self
    }

    /// Counter derived from the views: input bytes, one per output, plus
    /// one released when wiring completes.
    pub fn derived_sync_count(&self) -> isize {
        self.views
            .iter()
            .map(|(spec, _)| spec.sync_contribution())
            .sum::<isize>()
            + 1
    }

    /// Create the frame, resolve every view and release the wiring guard.
    pub fn spawn<C, F>(
        self,
        ctx: &C,
        body: F,
    ) -> FrameId
    where
        C: TaskContext + ?Sized,
        F: FnOnce(&mut TaskScope<'_>) + Send + 'static,
    {
        let derived = self.derived_sync_count();
        let explicit = self.sync_count.is_some();
        let count = self.sync_count.unwrap_or(derived);
        let specs = self.views.iter().map(|(spec, _)| *spec).collect();
        let frame = Frame::create(ctx, count, self.locals, specs, Box::new(body));
        let id = frame.id();

        for (index, (spec, stream)) in self.views.iter().enumerate() {
            resolve::resolve_dependence(ctx, &frame.handle(index), stream, spec.is_consumer());
        }
        if !explicit {
            resolve::decrement_by(ctx, &frame, 1);
        }
        id
    }
}
