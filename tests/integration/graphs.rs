//! Random task graphs: every frame runs exactly once and the pool stops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use streamdf::runtime::dataflow::{DataflowExt, FrameBuilder, Stream, TaskContext};
use streamdf::{Runtime, RuntimeConfig};

fn runtime(workers: usize) -> Runtime {
    Runtime::new(RuntimeConfig {
        num_workers: workers,
        ..RuntimeConfig::default()
    })
    .expect("valid configuration")
}

/// Recursive fan-out: every task spawns `width` children until `depth`.
fn spawn_tree(
    ctx: &dyn TaskContext,
    depth: u32,
    width: usize,
    ran: Arc<AtomicUsize>,
) {
    ran.fetch_add(1, Ordering::Relaxed);
    if depth == 0 {
        return;
    }
    for _ in 0..width {
        let ran = ran.clone();
        FrameBuilder::new().spawn(ctx, move |scope| spawn_tree(scope.ctx(), depth - 1, width, ran));
    }
}

#[test]
fn test_recursive_fan_out() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let report = runtime(4)
        .run(move |scope| spawn_tree(scope.ctx(), 6, 3, counter))
        .expect("run completes");
    // The root task is the top of the tree: 1 + 3 + ... + 3^6 frames.
    let tree: usize = (0..=6).map(|d| 3usize.pow(d)).sum();
    assert_eq!(ran.load(Ordering::Relaxed), tree);
    assert_eq!(report.frames_executed, tree);
    assert_eq!(report.totals.frames_executed, tree);
}

/// Layered graph: layer `k` has `widths[k]` tasks, each consuming one value
/// from every task of layer `k - 1` through a dedicated stream.
fn layered(
    ctx: &dyn TaskContext,
    widths: &[usize],
    total: Arc<AtomicUsize>,
) {
    let mut previous: Vec<Arc<Stream>> = Vec::new();
    for (layer, &width) in widths.iter().enumerate() {
        let last = layer + 1 == widths.len();
        let outputs: Vec<Arc<Stream>> = if last {
            Vec::new()
        } else {
            (0..width).map(|_| Stream::of::<u64>()).collect()
        };
        for task in 0..width {
            let mut builder = FrameBuilder::new();
            for stream in &previous {
                builder = builder.peek(stream, 1);
            }
            for (index, stream) in outputs.iter().enumerate() {
                if index == task {
                    builder = builder.output(stream, 1);
                }
            }
            let inputs = previous.len();
            let total = total.clone();
            builder.spawn(ctx, move |scope| {
                let sum: u64 = (0..inputs).map(|i| scope.input::<u64>(i)[0]).sum::<u64>() + 1;
                if !last {
                    scope.write(inputs, &[sum]);
                }
                total.fetch_add(1, Ordering::Relaxed);
            });
        }
        for stream in previous.drain(..) {
            ctx.tick(&stream, 1);
            ctx.stream_release(&stream);
        }
        previous = outputs;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_layered_graphs_terminate(
        widths in prop::collection::vec(1usize..5, 1..5),
        workers in 1usize..5,
    ) {
        let total = Arc::new(AtomicUsize::new(0));
        let counter = total.clone();
        let layers = widths.clone();
        let report = runtime(workers)
            .run(move |scope| layered(scope.ctx(), &layers, counter))
            .expect("run completes");
        let tasks: usize = widths.iter().sum();
        prop_assert_eq!(total.load(Ordering::Relaxed), tasks);
        prop_assert_eq!(report.frames_executed, tasks + 1);
        prop_assert_eq!(report.frames_created, report.frames_executed);
    }
}

#[test]
fn test_long_chain_through_streams() {
    let result = Arc::new(AtomicUsize::new(0));
    let out = result.clone();
    runtime(3)
        .run(move |scope| {
            let ctx = scope.ctx();
            let streams: Vec<_> = (0..200).map(|_| Stream::of::<u64>()).collect();
            FrameBuilder::new()
                .output(&streams[0], 1)
                .spawn(ctx, |scope| scope.write(0, &[0u64]));
            for pair in streams.windows(2) {
                FrameBuilder::new()
                    .input(&pair[0], 1)
                    .output(&pair[1], 1)
                    .spawn(ctx, |scope| {
                        let next = scope.input::<u64>(0)[0] + 1;
                        scope.write(1, &[next]);
                    });
            }
            let out = out.clone();
            FrameBuilder::new()
                .input(&streams[199], 1)
                .spawn(ctx, move |scope| {
                    out.store(scope.input::<u64>(0)[0] as usize, Ordering::Relaxed);
                });
            for stream in &streams {
                ctx.stream_release(stream);
            }
        })
        .expect("run completes");
    assert_eq!(result.load(Ordering::Relaxed), 199);
}

/// Sibling tasks on different workers resolve producers and consumers on
/// one shared stream concurrently. Each holds its own reference, taken by
/// the parent before spawning so the stream cannot drain early.
fn shared_stream_fan_in(
    ctx: &dyn TaskContext,
    pairs: u64,
    sum: Arc<AtomicUsize>,
    consumed: Arc<AtomicUsize>,
) {
    let stream = Stream::of::<u64>();
    for pair in 0..pairs {
        let producers = stream.clone();
        ctx.stream_reference(&producers);
        FrameBuilder::new().spawn(ctx, move |scope| {
            let ctx = scope.ctx();
            for value in [2 * pair, 2 * pair + 1] {
                FrameBuilder::new()
                    .output(&producers, 1)
                    .spawn(ctx, move |scope| scope.write(0, &[value]));
            }
            ctx.stream_release(&producers);
        });

        let consumers = stream.clone();
        let sum = sum.clone();
        let consumed = consumed.clone();
        ctx.stream_reference(&consumers);
        FrameBuilder::new().spawn(ctx, move |scope| {
            let ctx = scope.ctx();
            FrameBuilder::new()
                .input(&consumers, 2)
                .spawn(ctx, move |scope| {
                    let window = scope.input::<u64>(0);
                    sum.fetch_add(window.iter().sum::<u64>() as usize, Ordering::Relaxed);
                    consumed.fetch_add(1, Ordering::Relaxed);
                });
            ctx.stream_release(&consumers);
        });
    }
    ctx.stream_release(&stream);
}

#[test]
fn test_concurrent_resolution_on_shared_stream() {
    const PAIRS: u64 = 32;
    let runtime = runtime(4);
    for _ in 0..20 {
        let sum = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));
        let (s, c) = (sum.clone(), consumed.clone());
        let report = runtime
            .run(move |scope| shared_stream_fan_in(scope.ctx(), PAIRS, s, c))
            .expect("run completes");
        assert_eq!(consumed.load(Ordering::Relaxed), PAIRS as usize);
        let produced: u64 = (0..2 * PAIRS).sum();
        assert_eq!(sum.load(Ordering::Relaxed), produced as usize);
        // Root, 2 * PAIRS siblings, 2 * PAIRS producers, PAIRS consumers.
        assert_eq!(report.frames_executed, 1 + 5 * PAIRS as usize);
        assert_eq!(report.frames_created, report.frames_executed);
    }
}
