//! Machine topology as seen by the scheduler.
//!
//! Topology facts (core placement, NUMA membership, transfer costs) are
//! supplied from outside; this module only answers questions about them.
//!
//! Memory levels are numbered from the worker outward:
//!
//! ```text
//! level 0            the worker itself
//! level 1..=W        cache groups, one per entry of `level_widths`
//! level W + 1        NUMA node
//! level W + 2        whole machine
//! ```

use crate::util::config::{ConfigError, RuntimeConfig};

pub mod affinity;
pub mod numa;

pub use affinity::parse_cpu_list;
pub use numa::NumaNode;

const LOCAL_COST: f64 = 10.0;
const REMOTE_COST: f64 = 20.0;

/// Worker placement and memory hierarchy.
#[derive(Debug, Clone)]
pub struct Topology {
    worker_cpu: Vec<usize>,
    worker_node: Vec<usize>,
    numa_nodes: usize,
    level_widths: Vec<usize>,
    transfer_costs: Vec<Vec<f64>>,
    /// `siblings[worker][level]`: other workers sharing `level` with `worker`.
    siblings: Vec<Vec<Vec<usize>>>,
}

impl Topology {
    /// Build from explicit placement facts.
    ///
    /// `worker_cpu[w]` is the core running worker `w` and `worker_node[w]`
    /// its NUMA node.
    pub fn from_parts(
        worker_cpu: Vec<usize>,
        worker_node: Vec<usize>,
        numa_nodes: usize,
        level_widths: Vec<usize>,
        transfer_costs: Option<Vec<Vec<f64>>>,
    ) -> Result<Self, ConfigError> {
        if worker_cpu.is_empty() || worker_cpu.len() != worker_node.len() {
            return Err(ConfigError::Invalid(
                "topology needs one cpu and one node per worker".into(),
            ));
        }
        let numa_nodes = numa_nodes.max(1);
        if let Some(&node) = worker_node.iter().find(|&&node| node >= numa_nodes) {
            return Err(ConfigError::Invalid(format!(
                "worker placed on node {} but only {} nodes exist",
                node, numa_nodes
            )));
        }
        let transfer_costs = match transfer_costs {
            Some(costs) => {
                if costs.len() != numa_nodes || costs.iter().any(|row| row.len() != numa_nodes) {
                    return Err(ConfigError::Invalid(format!(
                        "transfer cost matrix must be {}x{}",
                        numa_nodes, numa_nodes
                    )));
                }
                costs
            },
            None => (0..numa_nodes)
                .map(|src| {
                    (0..numa_nodes)
                        .map(|dst| if src == dst { LOCAL_COST } else { REMOTE_COST })
                        .collect()
                })
                .collect(),
        };

        let mut topology = Self {
            worker_cpu,
            worker_node,
            numa_nodes,
            level_widths,
            transfer_costs,
            siblings: Vec::new(),
        };
        topology.siblings = (0..topology.num_workers())
            .map(|worker| {
                (0..topology.num_levels())
                    .map(|level| {
                        (0..topology.num_workers())
                            .filter(|&other| {
                                other != worker && topology.shares_level(worker, other, level)
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Ok(topology)
    }

    /// `num_workers` workers on consecutive cores, split evenly across
    /// `numa_nodes` nodes.
    pub fn uniform(
        num_workers: usize,
        numa_nodes: usize,
        level_widths: Vec<usize>,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let numa_nodes = numa_nodes.clamp(1, num_workers);
        let worker_node = (0..num_workers)
            .map(|w| w * numa_nodes / num_workers)
            .collect();
        match Self::from_parts(
            (0..num_workers).collect(),
            worker_node,
            numa_nodes,
            level_widths,
            None,
        ) {
            Ok(topology) => topology,
            Err(e) => unreachable!("uniform topology is always consistent: {}", e),
        }
    }

    /// Derive placement from the runtime configuration. Workers map onto the
    /// affinity list round-robin; cores are split evenly across nodes.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let cpus = match &config.cpu_affinity {
            Some(list) => parse_cpu_list(list)?,
            None => (0..config.num_workers).collect(),
        };
        if cpus.is_empty() {
            return Err(ConfigError::Invalid("cpu affinity list is empty".into()));
        }
        let worker_cpu: Vec<usize> = (0..config.num_workers)
            .map(|w| cpus[w % cpus.len()])
            .collect();

        let numa_nodes = config.topology.numa_nodes.max(1);
        let span = cpus.iter().copied().max().unwrap_or(0) + 1;
        let worker_node = worker_cpu
            .iter()
            .map(|&cpu| (cpu * numa_nodes / span).min(numa_nodes - 1))
            .collect();

        Self::from_parts(
            worker_cpu,
            worker_node,
            numa_nodes,
            config.topology.level_widths.clone(),
            config.topology.transfer_costs.clone(),
        )
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.worker_cpu.len()
    }

    #[inline]
    pub fn numa_nodes(&self) -> usize {
        self.numa_nodes
    }

    /// Number of memory levels, worker level included.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.level_widths.len() + 3
    }

    /// Level at which two workers share a NUMA node.
    #[inline]
    pub fn node_level(&self) -> usize {
        self.level_widths.len() + 1
    }

    #[inline]
    pub fn cpu_of(
        &self,
        worker: usize,
    ) -> usize {
        self.worker_cpu[worker]
    }

    #[inline]
    pub fn node_of(
        &self,
        worker: usize,
    ) -> usize {
        self.worker_node[worker]
    }

    fn shares_level(
        &self,
        a: usize,
        b: usize,
        level: usize,
    ) -> bool {
        if level == 0 {
            return a == b;
        }
        let cache_levels = self.level_widths.len();
        if level <= cache_levels {
            let width = self.level_widths[level - 1];
            return self.worker_node[a] == self.worker_node[b]
                && self.worker_cpu[a] / width == self.worker_cpu[b] / width;
        }
        if level == cache_levels + 1 {
            return self.worker_node[a] == self.worker_node[b];
        }
        true
    }

    /// Nearest level shared by two workers (0 when they are the same).
    pub fn lowest_common_level(
        &self,
        a: usize,
        b: usize,
    ) -> usize {
        (0..self.num_levels())
            .find(|&level| self.shares_level(a, b, level))
            .unwrap_or(self.num_levels() - 1)
    }

    /// Other workers sharing `level` with `worker`.
    #[inline]
    pub fn siblings_at_level(
        &self,
        worker: usize,
        level: usize,
    ) -> &[usize] {
        &self.siblings[worker][level]
    }

    /// Workers on NUMA node `node`, in id order.
    pub fn workers_on_node(
        &self,
        node: usize,
    ) -> Vec<usize> {
        (0..self.num_workers())
            .filter(|&w| self.worker_node[w] == node)
            .collect()
    }

    /// Relative cost of moving data from node `src` to node `dst`.
    #[inline]
    pub fn transfer_cost(
        &self,
        src: usize,
        dst: usize,
    ) -> f64 {
        self.transfer_costs[src][dst]
    }
}

#[cfg(test)]
mod tests;
