//! In-place buffer reuse between an input and an output of one frame.
//!
//! When a frame declares that output `o` reuses input `i`, the consumer
//! matched to `o` takes over `i`'s buffer instead of receiving a copy of
//! the produced data. If the buffer lives on another NUMA node than the
//! executing worker (and policy asks for locality) it is first copied into
//! local memory.

use std::sync::Arc;

use super::buffer::StreamBuffer;
use super::frame::Frame;
use super::resolve::ensure_buffer;
use super::view::ViewKind;
use super::TaskContext;
use crate::runtime::scheduler::WorkerState;
use crate::violation;

/// Outcome of preparing one reuse pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseOutcome {
    /// Ownership moved, no bytes copied.
    HandedOff,
    /// Data copied into a fresh local buffer.
    Copied,
    /// The consumer already had storage; data copied into it.
    CopiedIntoExisting,
}

/// Set up every reuse pair of `frame` before its body runs.
pub(crate) fn prepare<C: TaskContext + ?Sized>(
    ctx: &C,
    frame: &Arc<Frame>,
) {
    for index in 0..frame.num_views() {
        let spec = *frame.view(index).spec();
        if let Some(input) = spec.reuse_of {
            let previous = ctx.record_state(WorkerState::Reuse);
            let outcome = prepare_pair(ctx, frame, input, index);
            ctx.restore_state(previous);
            match outcome {
                ReuseOutcome::HandedOff => ctx.counters().record_reuse_hit(),
                ReuseOutcome::Copied | ReuseOutcome::CopiedIntoExisting => {
                    ctx.counters().record_reuse_copy()
                },
            }
            tracing::debug!("{:?} reuse {} -> {}: {:?}", frame.id(), input, index, outcome);
        }
    }
}

fn prepare_pair<C: TaskContext + ?Sized>(
    ctx: &C,
    frame: &Arc<Frame>,
    input: usize,
    output: usize,
) -> ReuseOutcome {
    let in_spec = *frame.view(input).spec();
    let out_spec = *frame.view(output).spec();
    if in_spec.kind != ViewKind::Input
        || in_spec.elem_size != out_spec.elem_size
        || out_spec.burst != in_spec.horizon
    {
        violation!(
            "{:?}: output {} cannot reuse view {} (burst {} vs horizon {})",
            frame.id(),
            output,
            input,
            out_spec.burst,
            in_spec.horizon
        );
    }

    let target = match frame.view(output).state().target.clone() {
        Some(target) => target,
        None => violation!("{:?}: reused output {} was never matched", frame.id(), output),
    };
    if target.offset != 0 || target.consumer.spec().horizon != out_spec.burst {
        violation!(
            "{:?}: reused output {} must fill a whole consumer window",
            frame.id(),
            output
        );
    }

    let source = ensure_buffer(ctx, &frame.handle(input));
    let mut consumer = target.consumer.view().state();

    if let Some(existing) = &consumer.buffer {
        // SAFETY: the consumer window is owned by this output alone and the
        // input data is complete.
        unsafe { existing.copy_range_from(&source, 0, source.len()) };
        return ReuseOutcome::CopiedIntoExisting;
    }

    let policy = ctx.reuse_config();
    let local = source.node() == ctx.numa_node();
    let chain_exhausted = policy
        .max_chain_length
        .is_some_and(|max| source.chain_copies() >= max);

    if local || !policy.copy_on_node_change || chain_exhausted {
        source.record_hand_off();
        consumer.buffer = Some(source);
        ReuseOutcome::HandedOff
    } else {
        consumer.buffer = Some(StreamBuffer::copy_of(ctx.slab(), &source));
        ReuseOutcome::Copied
    }
}
