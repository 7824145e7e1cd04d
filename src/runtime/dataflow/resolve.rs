//! Dependence resolution: matching producer and consumer views.
//!
//! All queue manipulation for a stream happens under that stream's lock.
//! Counter decrements discovered while matching are collected and applied
//! after the lock is released, so a frame that becomes ready never runs
//! while the stream is held.

use std::sync::Arc;

use smallvec::SmallVec;

use super::buffer::StreamBuffer;
use super::frame::{Frame, FrameKind};
use super::stream::{Stream, StreamArray, StreamState};
use super::view::{Target, ViewHandle, ViewKind};
use super::TaskContext;
use crate::runtime::scheduler::WorkerState;
use crate::violation;

type Decrements = SmallVec<[(Arc<Frame>, isize); 4]>;

/// Subtract `n` from `frame`'s counter, handing it to the scheduler when it
/// reaches zero. Sinks reaching zero are discarded.
pub fn decrement_by<C: TaskContext + ?Sized>(
    ctx: &C,
    frame: &Arc<Frame>,
    n: isize,
) {
    let previous = ctx.record_state(WorkerState::Decrement);
    if frame.decrement(n) {
        match frame.kind() {
            FrameKind::Task => ctx.schedule(frame.clone()),
            FrameKind::Sink => frame.retire(),
        }
    }
    ctx.restore_state(previous);
}

/// `decrement_by` for data arrival: attributes the bytes to the calling
/// worker for push decisions.
pub(crate) fn decrement_written<C: TaskContext + ?Sized>(
    ctx: &C,
    frame: &Arc<Frame>,
    bytes: usize,
) {
    frame.add_input_bytes(ctx.worker_id(), bytes as u64);
    decrement_by(ctx, frame, bytes as isize);
}

fn apply<C: TaskContext + ?Sized>(
    ctx: &C,
    decrements: Decrements,
) {
    for (frame, n) in decrements {
        decrement_by(ctx, &frame, n);
    }
}

/// Buffer of a consumer or peek view, allocated from the calling worker's
/// slab on first use.
pub(crate) fn ensure_buffer<C: TaskContext + ?Sized>(
    ctx: &C,
    view: &ViewHandle,
) -> StreamBuffer {
    let spec = *view.spec();
    let mut state = view.view().state();
    match &state.buffer {
        Some(buffer) => buffer.clone(),
        None => {
            let buffer = StreamBuffer::allocate(ctx.slab(), spec.horizon * spec.elem_size);
            state.buffer = Some(buffer.clone());
            buffer
        },
    }
}

/// Wire `view` into `stream`.
///
/// Consumers drain queued producers (splicing each producer's output
/// window into the consumer's buffer) and queue themselves if still short.
/// Peeks join the stream's active peek chain. Producers fill the oldest
/// waiting consumer or queue themselves.
pub fn resolve_dependence<C: TaskContext + ?Sized>(
    ctx: &C,
    view: &ViewHandle,
    stream: &Arc<Stream>,
    is_consumer: bool,
) {
    let spec = *view.spec();
    if spec.is_consumer() != is_consumer {
        violation!(
            "{:?} resolved as {} but declared {:?}",
            view,
            if is_consumer { "consumer" } else { "producer" },
            spec.kind
        );
    }
    if stream.ref_count() == 0 {
        violation!("{:?} resolved on released stream {}", view, stream.id());
    }
    if spec.elem_size != stream.elem_size() {
        violation!(
            "{:?} has {}-byte elements, stream {} carries {}",
            view,
            spec.elem_size,
            stream.id(),
            stream.elem_size()
        );
    }
    let previous = ctx.record_state(WorkerState::Resolve);

    {
        let mut state = view.view().state();
        if state.stream.is_some() {
            violation!("{:?} resolved twice", view);
        }
        state.stream = Some(stream.clone());
    }
    if is_consumer && !ctx.deferred_alloc() {
        ensure_buffer(ctx, view);
    }

    let mut decrements = Decrements::new();
    {
        let mut st = stream.lock();
        st.admit(stream.id(), spec.kind, spec.burst, spec.horizon);
        match spec.kind {
            ViewKind::Peek => st.peek_chain.push(view.clone()),
            ViewKind::Input => {
                let siblings = std::mem::take(&mut st.peek_chain);
                resolve_consumer(&mut st, view, siblings, &mut decrements);
            },
            ViewKind::Output => resolve_producer(&mut st, view, &mut decrements),
        }
        st.check_exclusive();
    }
    ctx.counters().record_matches(decrements.len());
    apply(ctx, decrements);
    ctx.restore_state(previous);
}

/// Resolve `views[i]` against stream `i` of `streams`.
pub fn resolve_array<C: TaskContext + ?Sized>(
    ctx: &C,
    views: &[ViewHandle],
    streams: &StreamArray,
    is_consumer: bool,
) {
    if views.len() > streams.len() {
        violation!(
            "resolving {} views against an array of {} streams",
            views.len(),
            streams.len()
        );
    }
    for (index, view) in views.iter().enumerate() {
        resolve_dependence(ctx, view, streams.get(index), is_consumer);
    }
}

fn splice(
    consumer: &ViewHandle,
    producer: &ViewHandle,
    decrements: &mut Decrements,
) {
    let burst = producer.view().state().burst;
    let (offset, siblings) = {
        let mut cs = consumer.view().state();
        let offset = cs.reached;
        if offset + burst > consumer.spec().horizon {
            violation!(
                "burst of {} overruns {:?} at {} of {}",
                burst,
                consumer,
                offset,
                consumer.spec().horizon
            );
        }
        cs.reached += burst;
        (offset, cs.siblings.clone())
    };
    {
        let mut ps = producer.view().state();
        ps.target = Some(Target {
            consumer: consumer.clone(),
            offset,
        });
        ps.siblings = siblings;
    }
    tracing::trace!("matched {:?} -> {:?} at {}", producer, consumer, offset);
    decrements.push((producer.frame().clone(), 1));
}

fn resolve_consumer(
    st: &mut StreamState,
    consumer: &ViewHandle,
    siblings: Vec<ViewHandle>,
    decrements: &mut Decrements,
) {
    let horizon = consumer.spec().horizon;
    consumer.view().state().siblings = siblings;
    let mut reached = consumer.view().state().reached;
    while reached < horizon {
        let Some(producer) = st.producers.pop_front() else {
            break;
        };
        splice(consumer, &producer, decrements);
        reached = consumer.view().state().reached;
    }
    if reached < horizon {
        st.consumers.push_back(consumer.clone());
    }
}

fn resolve_producer(
    st: &mut StreamState,
    producer: &ViewHandle,
    decrements: &mut Decrements,
) {
    match st.consumers.front().cloned() {
        Some(consumer) => {
            splice(&consumer, producer, decrements);
            if consumer.view().state().reached >= consumer.spec().horizon {
                st.consumers.pop_front();
            }
        },
        None => st.producers.push_back(producer.clone()),
    }
}

/// Advance `stream` by `count` elements without a consuming task.
///
/// An active peek chain is finalized: its head becomes a consuming view
/// with the rest of the chain as broadcast siblings. Without a chain a
/// sink frame absorbs the elements.
pub fn tick<C: TaskContext + ?Sized>(
    ctx: &C,
    stream: &Arc<Stream>,
    count: usize,
) {
    let mut decrements = Decrements::new();
    {
        let mut st = stream.lock();
        tick_locked(ctx, stream, &mut st, count, &mut decrements);
        st.check_exclusive();
    }
    ctx.counters().record_tick();
    ctx.counters().record_matches(decrements.len());
    apply(ctx, decrements);
}

fn tick_locked<C: TaskContext + ?Sized>(
    ctx: &C,
    stream: &Stream,
    st: &mut StreamState,
    count: usize,
    decrements: &mut Decrements,
) {
    if let Some(burst) = st.burst {
        if count == 0 || count % burst != 0 {
            violation!(
                "stream {}: tick of {} is not a multiple of burst {}",
                stream.id(),
                count,
                burst
            );
        }
    }

    if st.peek_chain.is_empty() {
        let sink = Frame::sink(ctx, stream.elem_size(), count);
        resolve_consumer(st, &sink.handle(0), Vec::new(), decrements);
        return;
    }

    let mut chain = std::mem::take(&mut st.peek_chain);
    let head = chain.remove(0);
    let horizon = head.spec().horizon;
    if count != horizon {
        violation!(
            "stream {}: tick of {} does not match peek horizon {}",
            stream.id(),
            count,
            horizon
        );
    }
    head.view().state().burst = horizon;
    resolve_consumer(st, &head, chain, decrements);
}

/// Publish output view `index` of `frame`: copy the burst to every peeking
/// sibling, then release the consumer it was written into.
pub(crate) fn produce<C: TaskContext + ?Sized>(
    ctx: &C,
    frame: &Arc<Frame>,
    index: usize,
) {
    let view = frame.view(index);
    let spec = *view.spec();
    if spec.kind != ViewKind::Output {
        violation!("{:?} view {} is not an output", frame.id(), index);
    }
    let (target, siblings) = {
        let mut state = view.state();
        if state.produced {
            violation!("{:?} output {} produced twice", frame.id(), index);
        }
        state.produced = true;
        (state.target.take(), std::mem::take(&mut state.siblings))
    };
    let Some(target) = target else {
        violation!("{:?} output {} produced before it was matched", frame.id(), index);
    };

    let bytes = spec.burst * spec.elem_size;
    let offset = target.offset * spec.elem_size;
    if !siblings.is_empty() {
        let previous = ctx.record_state(WorkerState::Broadcast);
        let source = ensure_buffer(ctx, &target.consumer);
        for sibling in &siblings {
            let destination = ensure_buffer(ctx, sibling);
            // SAFETY: this producer owns `[offset, offset + bytes)` in the
            // consumer window and in every sibling window.
            unsafe { destination.copy_range_from(&source, offset, bytes) };
            decrement_written(ctx, sibling.frame(), bytes);
        }
        ctx.counters().record_broadcast(siblings.len());
        ctx.restore_state(previous);
    }
    decrement_written(ctx, target.consumer.frame(), bytes);
}

/// Take one more reference on `stream`.
pub fn stream_reference(stream: &Stream) {
    stream.add_ref();
}

/// Drop one reference on `stream`. The last release drains it: leftover
/// producers are absorbed by ticks, leftover consumers or peeks are a
/// contract violation since nothing can ever satisfy them.
pub fn stream_release<C: TaskContext + ?Sized>(
    ctx: &C,
    stream: &Arc<Stream>,
) {
    if !stream.drop_ref() {
        return;
    }

    let mut decrements = Decrements::new();
    let (starved, peeks) = {
        let mut st = stream.lock();

        let waiting = std::mem::take(&mut st.consumers);
        for consumer in waiting {
            let siblings = std::mem::take(&mut consumer.view().state().siblings);
            resolve_consumer(&mut st, &consumer, siblings, &mut decrements);
        }

        loop {
            let burst = match st.producers.front() {
                Some(producer) => producer.view().state().burst,
                None => break,
            };
            let count = match st.peek_chain.first() {
                Some(head) => head.spec().horizon,
                None => burst,
            };
            tick_locked(ctx, stream, &mut st, count, &mut decrements);
        }

        let starved = st.consumers.len();
        for consumer in st.consumers.drain(..) {
            let state = consumer.view().state();
            tracing::error!(
                "stream {}: {:?} left with {} of {} elements",
                stream.id(),
                consumer,
                state.reached,
                consumer.spec().horizon
            );
        }
        let peeks = std::mem::take(&mut st.peek_chain).len();
        st.check_exclusive();
        (starved, peeks)
    };
    apply(ctx, decrements);

    if starved > 0 || peeks > 0 {
        violation!(
            "stream {} destroyed with {} unmatched consumers and {} pending peeks",
            stream.id(),
            starved,
            peeks
        );
    }
    tracing::trace!("stream {} drained", stream.id());
}
