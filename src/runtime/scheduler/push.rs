//! Proactive push heuristics.
//!
//! When a frame becomes ready, the worker that released it may hand it to
//! another worker closer to the frame's input data instead of leaving it
//! for a thief. A [`PushStrategy`] picks the candidate;
//! [`push_beneficial`] applies the checks shared by every strategy.

use std::sync::Arc;

use crate::runtime::dataflow::{Frame, ViewKind};
use crate::runtime::topology::Topology;
use crate::util::config::{PushConfig, PushStrategyKind};

/// Chooses where a ready frame should run.
pub trait PushStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Worker that should execute `frame`, if it beats `current` by the
    /// configured margin.
    fn target(
        &self,
        frame: &Frame,
        current: usize,
        topology: &Topology,
        params: &PushConfig,
    ) -> Option<usize>;
}

/// Build the strategy named in the configuration.
pub fn strategy_for(kind: PushStrategyKind) -> Arc<dyn PushStrategy> {
    match kind {
        PushStrategyKind::DominantWriter => Arc::new(DominantWriter),
        PushStrategyKind::DataOwner => Arc::new(DataOwner),
        PushStrategyKind::NumaScore => Arc::new(NumaScore),
    }
}

/// Target chosen by `strategy`, if pushing `frame` away from `current` is
/// worth it: the frame carries enough input, the target differs and is at
/// least `min_mem_level` away.
pub fn push_beneficial(
    strategy: &dyn PushStrategy,
    frame: &Frame,
    current: usize,
    topology: &Topology,
    params: &PushConfig,
) -> Option<usize> {
    if frame.total_input_bytes() < params.min_frame_bytes {
        return None;
    }
    let target = strategy.target(frame, current, topology, params)?;
    if target == current || target >= topology.num_workers() {
        return None;
    }
    let level = topology.lowest_common_level(current, target);
    let min_level = params.min_mem_level.unwrap_or_else(|| topology.node_level());
    if level < min_level {
        return None;
    }
    Some(target)
}

fn argmax<I: IntoIterator<Item = (usize, u64)>>(items: I) -> Option<(usize, u64)> {
    items
        .into_iter()
        .fold(None, |best: Option<(usize, u64)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// The worker on `node` that wrote most of the frame's input.
fn best_worker_on_node(
    bytes: &[u64],
    node: usize,
    topology: &Topology,
) -> Option<usize> {
    argmax(
        topology
            .workers_on_node(node)
            .into_iter()
            .map(|w| (w, bytes.get(w).copied().unwrap_or(0))),
    )
    .map(|(w, _)| w)
}

/// Push to the single worker that wrote the most input bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DominantWriter;

impl PushStrategy for DominantWriter {
    fn name(&self) -> &'static str {
        "dominant_writer"
    }

    fn target(
        &self,
        frame: &Frame,
        current: usize,
        _topology: &Topology,
        params: &PushConfig,
    ) -> Option<usize> {
        let bytes = frame.input_bytes();
        let (target, max) = argmax(bytes.iter().copied().enumerate())?;
        let here = bytes.get(current).copied().unwrap_or(0);
        (max as f64 > params.min_relative_size * here as f64).then_some(target)
    }
}

/// Push to the node whose memory currently holds most input buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataOwner;

impl PushStrategy for DataOwner {
    fn name(&self) -> &'static str {
        "data_owner"
    }

    fn target(
        &self,
        frame: &Frame,
        current: usize,
        topology: &Topology,
        params: &PushConfig,
    ) -> Option<usize> {
        let mut per_node = vec![0u64; topology.numa_nodes()];
        for index in 0..frame.num_views() {
            let view = frame.view(index);
            if view.spec().kind == ViewKind::Output {
                continue;
            }
            if let Some(buffer) = &view.state().buffer {
                let node = buffer.node().min(per_node.len() - 1);
                per_node[node] += buffer.len() as u64;
            }
        }
        let (node, owned) = argmax(per_node.iter().copied().enumerate())?;
        let here = per_node[topology.node_of(current)];
        if node == topology.node_of(current) || owned as f64 <= params.min_relative_size * here as f64
        {
            return None;
        }
        best_worker_on_node(&frame.input_bytes(), node, topology)
    }
}

/// Push to the node minimizing input bytes weighted by transfer cost.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumaScore;

impl NumaScore {
    /// Cost of running on each node.
    pub fn node_costs(
        bytes: &[u64],
        topology: &Topology,
    ) -> Vec<f64> {
        let mut from_node = vec![0u64; topology.numa_nodes()];
        for (writer, &b) in bytes.iter().enumerate().take(topology.num_workers()) {
            from_node[topology.node_of(writer)] += b;
        }
        (0..topology.numa_nodes())
            .map(|dst| {
                from_node
                    .iter()
                    .enumerate()
                    .map(|(src, &b)| b as f64 * topology.transfer_cost(src, dst))
                    .sum()
            })
            .collect()
    }
}

impl PushStrategy for NumaScore {
    fn name(&self) -> &'static str {
        "numa_score"
    }

    fn target(
        &self,
        frame: &Frame,
        current: usize,
        topology: &Topology,
        params: &PushConfig,
    ) -> Option<usize> {
        let bytes = frame.input_bytes();
        let costs = Self::node_costs(&bytes, topology);
        let (best, best_cost) = costs
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        let here = topology.node_of(current);
        if best == here || costs[here] <= params.min_relative_size * best_cost {
            return None;
        }
        best_worker_on_node(&bytes, best, topology)
    }
}
