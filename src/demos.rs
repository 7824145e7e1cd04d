//! Built-in workloads used by the CLI and the integration tests.
//!
//! Each demo builds its whole graph from the root task and folds its output
//! into a single checksum that can be compared with the expected value.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::runtime::dataflow::{DataflowExt, FrameBuilder, Stream, TaskContext};
use crate::runtime::error::RuntimeError;
use crate::runtime::scheduler::{RunReport, Runtime};

/// Elements per burst in the streaming demos.
pub const CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Demo {
    /// Source, in-place increment, summing sink.
    Pipeline,
    /// One producer observed by a peeking task and a consuming task.
    Broadcast,
    /// Binary reduction tree over the leaves.
    Reduction,
}

impl Demo {
    pub const ALL: [Demo; 3] = [Demo::Pipeline, Demo::Broadcast, Demo::Reduction];

    pub fn name(self) -> &'static str {
        match self {
            Demo::Pipeline => "pipeline",
            Demo::Broadcast => "broadcast",
            Demo::Reduction => "reduction",
        }
    }

    /// Checksum a correct run of `frames` rounds must produce.
    pub fn expected(
        self,
        frames: usize,
    ) -> u64 {
        let triangle = |n: u64| n * n.saturating_sub(1) / 2;
        match self {
            Demo::Pipeline => {
                let n = (frames * CHUNK) as u64;
                triangle(n) + n
            },
            Demo::Broadcast => 2 * triangle((frames * CHUNK) as u64),
            Demo::Reduction => {
                let n = frames.max(1) as u64;
                n * (n + 1) / 2
            },
        }
    }

    /// Execute on `runtime` and compare the checksum.
    pub fn run(
        self,
        runtime: &Runtime,
        frames: usize,
    ) -> Result<DemoRun, RuntimeError> {
        let checksum = Arc::new(AtomicU64::new(0));
        let sum = checksum.clone();
        tracing::info!("running {} demo with {} frames", self.name(), frames);
        let report = match self {
            Demo::Pipeline => runtime.run(move |scope| pipeline(scope.ctx(), frames, sum)),
            Demo::Broadcast => runtime.run(move |scope| broadcast(scope.ctx(), frames, sum)),
            Demo::Reduction => runtime.run(move |scope| reduction(scope.ctx(), frames, sum)),
        }?;
        Ok(DemoRun {
            demo: self,
            frames,
            checksum: checksum.load(Ordering::Acquire),
            expected: self.expected(frames),
            report,
        })
    }
}

impl fmt::Display for Demo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Demo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Demo::ALL
            .into_iter()
            .find(|demo| demo.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown demo '{}', expected pipeline, broadcast or reduction", s))
    }
}

/// Result of one demo run.
#[derive(Debug, Clone, Serialize)]
pub struct DemoRun {
    pub demo: Demo,
    pub frames: usize,
    pub checksum: u64,
    pub expected: u64,
    pub report: RunReport,
}

impl DemoRun {
    pub fn is_correct(&self) -> bool {
        self.checksum == self.expected
    }
}

fn chunk_values(round: usize) -> Vec<u64> {
    let start = (round * CHUNK) as u64;
    (start..start + CHUNK as u64).collect()
}

fn source(
    ctx: &dyn TaskContext,
    stream: &Arc<Stream>,
    values: Vec<u64>,
) {
    FrameBuilder::new()
        .output(stream, values.len())
        .spawn(ctx, move |scope| scope.write(0, &values));
}

fn summing_sink(
    ctx: &dyn TaskContext,
    builder: FrameBuilder,
    sum: &Arc<AtomicU64>,
) {
    let sum = sum.clone();
    builder.spawn(ctx, move |scope| {
        let total: u64 = scope.input::<u64>(0).iter().sum();
        sum.fetch_add(total, Ordering::AcqRel);
    });
}

fn pipeline(
    ctx: &dyn TaskContext,
    frames: usize,
    sum: Arc<AtomicU64>,
) {
    let raw = Stream::of::<u64>();
    let incremented = Stream::of::<u64>();
    for round in 0..frames {
        summing_sink(ctx, FrameBuilder::new().input(&incremented, CHUNK), &sum);
        FrameBuilder::new()
            .input(&raw, CHUNK)
            .reuse_output(&incremented, CHUNK, 0)
            .spawn(ctx, |scope| {
                for value in scope.output::<u64>(1) {
                    *value += 1;
                }
            });
        source(ctx, &raw, chunk_values(round));
    }
    ctx.stream_release(&raw);
    ctx.stream_release(&incremented);
}

fn broadcast(
    ctx: &dyn TaskContext,
    frames: usize,
    sum: Arc<AtomicU64>,
) {
    let stream = Stream::of::<u64>();
    for round in 0..frames {
        summing_sink(ctx, FrameBuilder::new().peek(&stream, CHUNK), &sum);
        summing_sink(ctx, FrameBuilder::new().input(&stream, CHUNK), &sum);
        source(ctx, &stream, chunk_values(round));
    }
    ctx.stream_release(&stream);
}

fn reduction(
    ctx: &dyn TaskContext,
    frames: usize,
    sum: Arc<AtomicU64>,
) {
    let mut width = frames.max(1);
    let mut level = Stream::of::<u64>();
    for leaf in 0..width {
        source(ctx, &level, vec![leaf as u64 + 1]);
    }
    while width > 1 {
        if width % 2 == 1 {
            source(ctx, &level, vec![0]);
            width += 1;
        }
        let next = Stream::of::<u64>();
        for _ in 0..width / 2 {
            FrameBuilder::new()
                .input(&level, 2)
                .output(&next, 1)
                .spawn(ctx, |scope| {
                    let pair = scope.input::<u64>(0);
                    let total = pair[0] + pair[1];
                    scope.write(1, &[total]);
                });
        }
        ctx.stream_release(&level);
        level = next;
        width /= 2;
    }
    summing_sink(ctx, FrameBuilder::new().input(&level, 1), &sum);
    ctx.stream_release(&level);
}
