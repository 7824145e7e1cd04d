//! Runtime configuration
//!
//! Every knob of the runtime lives in [`RuntimeConfig`]. Values are merged
//! from several layers:
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments (applied by the caller)
//! 2. Environment variables (STREAMDF_NUM_WORKERS / OMP_NUM_THREADS,
//!    STREAMDF_CPU_AFFINITY)
//! 3. TOML file (explicit path or STREAMDF_CONFIG)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use streamdf::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_toml_str("num_workers = 2").unwrap();
//! assert_eq!(config.num_workers, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::runtime::topology::parse_cpu_list;

/// Environment variable naming a TOML configuration file.
pub const ENV_CONFIG: &str = "STREAMDF_CONFIG";
/// Environment variable overriding the worker count.
pub const ENV_NUM_WORKERS: &str = "STREAMDF_NUM_WORKERS";
/// Fallback worker-count variable understood for compatibility.
pub const ENV_OMP_NUM_THREADS: &str = "OMP_NUM_THREADS";
/// Environment variable holding a CPU affinity list.
pub const ENV_CPU_AFFINITY: &str = "STREAMDF_CPU_AFFINITY";

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// log2 of the initial work-stealing deque capacity
    #[serde(default = "default_deque_log_size")]
    pub deque_log_size: u32,
    /// Yield the thread when no work was found (spin otherwise)
    #[serde(default = "default_true")]
    pub yield_when_idle: bool,
    /// Allocate consumer buffers at first write instead of at resolution
    #[serde(default = "default_true")]
    pub deferred_alloc: bool,
    /// Pin each worker to a core
    #[serde(default)]
    pub pin_workers: bool,
    /// CPU list for workers, e.g. `"0-7:2,16"`
    #[serde(default)]
    pub cpu_affinity: Option<String>,
    /// Per-worker state log capacity (0 disables the log)
    #[serde(default)]
    pub max_trace_events: usize,
    /// Slab allocator settings
    #[serde(default)]
    pub slab: SlabConfig,
    /// Steal ladder settings
    #[serde(default)]
    pub steal: StealConfig,
    /// Proactive push settings
    #[serde(default)]
    pub push: PushConfig,
    /// Buffer reuse settings
    #[serde(default)]
    pub reuse: ReuseConfig,
    /// Machine topology facts
    #[serde(default)]
    pub topology: TopologyConfig,
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_deque_log_size() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            deque_log_size: default_deque_log_size(),
            yield_when_idle: true,
            deferred_alloc: true,
            pin_workers: false,
            cpu_affinity: None,
            max_trace_events: 0,
            slab: SlabConfig::default(),
            steal: StealConfig::default(),
            push: PushConfig::default(),
            reuse: ReuseConfig::default(),
            topology: TopologyConfig::default(),
        }
    }
}

/// Slab allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlabConfig {
    /// Smallest size class (log2 bytes, header included)
    #[serde(default = "default_min_class_log2")]
    pub min_class_log2: u32,
    /// Largest pooled size class; bigger blocks bypass the free lists
    #[serde(default = "default_max_class_log2")]
    pub max_class_log2: u32,
    /// Bytes carved from the bump region per refill (log2)
    #[serde(default = "default_refill_log2")]
    pub refill_log2: u32,
    /// Bytes requested from the system per bump region growth (log2)
    #[serde(default = "default_region_chunk_log2")]
    pub region_chunk_log2: u32,
}

fn default_min_class_log2() -> u32 {
    6
}

fn default_max_class_log2() -> u32 {
    20
}

fn default_refill_log2() -> u32 {
    21
}

fn default_region_chunk_log2() -> u32 {
    24
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            min_class_log2: 6,
            max_class_log2: 20,
            refill_log2: 21,
            region_chunk_log2: 24,
        }
    }
}

/// Steal ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealConfig {
    /// Random steal attempts per memory level, nearest first.
    /// The last entry applies to every deeper level.
    #[serde(default = "default_attempts_per_level")]
    pub attempts_per_level: Vec<usize>,
    /// Retry the last successful victim before walking the ladder
    #[serde(default = "default_true")]
    pub cache_last_victim: bool,
}

fn default_attempts_per_level() -> Vec<usize> {
    vec![2, 4, 8]
}

impl Default for StealConfig {
    fn default() -> Self {
        Self {
            attempts_per_level: default_attempts_per_level(),
            cache_last_victim: true,
        }
    }
}

impl StealConfig {
    /// Attempts allowed at a ladder step (0-based, nearest level first).
    pub fn attempts_at(
        &self,
        step: usize,
    ) -> usize {
        self.attempts_per_level
            .get(step)
            .or_else(|| self.attempts_per_level.last())
            .copied()
            .unwrap_or(1)
    }
}

/// Push target selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStrategyKind {
    /// Worker that wrote the most input bytes
    DominantWriter,
    /// Node currently holding most of the input buffers
    DataOwner,
    /// Node minimizing the transfer-cost weighted input bytes
    NumaScore,
}

impl std::str::FromStr for PushStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dominant_writer" | "max_writer" => Ok(PushStrategyKind::DominantWriter),
            "data_owner" | "owner" => Ok(PushStrategyKind::DataOwner),
            "numa_score" | "split_score_nodes" => Ok(PushStrategyKind::NumaScore),
            other => Err(ConfigError::Invalid(format!(
                "unknown push strategy `{}`",
                other
            ))),
        }
    }
}

/// Proactive push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Enable pushing ready frames to other workers
    #[serde(default)]
    pub enabled: bool,
    /// Target selection strategy
    #[serde(default = "default_push_strategy")]
    pub strategy: PushStrategyKind,
    /// Capacity of each worker's push inbox
    #[serde(default = "default_inbox_slots")]
    pub inbox_slots: usize,
    /// Frames with fewer input bytes are never pushed
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: u64,
    /// The target must beat the current placement by this factor
    #[serde(default = "default_min_relative_size")]
    pub min_relative_size: f64,
    /// Lowest memory level a push may cross; unset means the NUMA node level
    #[serde(default)]
    pub min_mem_level: Option<usize>,
}

fn default_push_strategy() -> PushStrategyKind {
    PushStrategyKind::DominantWriter
}

fn default_inbox_slots() -> usize {
    64
}

fn default_min_frame_bytes() -> u64 {
    64 * 1024
}

fn default_min_relative_size() -> f64 {
    1.3
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: default_push_strategy(),
            inbox_slots: default_inbox_slots(),
            min_frame_bytes: default_min_frame_bytes(),
            min_relative_size: default_min_relative_size(),
            min_mem_level: None,
        }
    }
}

/// Buffer reuse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReuseConfig {
    /// Copy a reused buffer into local memory when it lives on another node
    #[serde(default = "default_true")]
    pub copy_on_node_change: bool,
    /// Hand off without copying once a chain has been copied this often
    #[serde(default)]
    pub max_chain_length: Option<usize>,
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self {
            copy_on_node_change: true,
            max_chain_length: None,
        }
    }
}

/// Topology facts supplied from outside the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Number of NUMA nodes
    #[serde(default = "default_numa_nodes")]
    pub numa_nodes: usize,
    /// Cores sharing each cache level, nearest first
    #[serde(default = "default_level_widths")]
    pub level_widths: Vec<usize>,
    /// Node-to-node transfer costs (row = source, column = destination)
    #[serde(default)]
    pub transfer_costs: Option<Vec<Vec<f64>>>,
}

fn default_numa_nodes() -> usize {
    1
}

fn default_level_widths() -> Vec<usize> {
    vec![2, 8]
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            numa_nodes: default_numa_nodes(),
            level_widths: default_level_widths(),
            transfer_costs: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then the file named by `STREAMDF_CONFIG` (if any), then
    /// environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(ENV_CONFIG) {
            Ok(path) if !path.is_empty() => Self::load(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Malformed values are ignored with a
    /// warning.
    pub fn apply_env(&mut self) {
        let workers = std::env::var(ENV_NUM_WORKERS)
            .ok()
            .map(|v| (ENV_NUM_WORKERS, v))
            .or_else(|| {
                std::env::var(ENV_OMP_NUM_THREADS)
                    .ok()
                    .map(|v| (ENV_OMP_NUM_THREADS, v))
            });
        if let Some((name, value)) = workers {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.num_workers = n,
                _ => tracing::warn!("ignoring {}={:?}: expected a positive integer", name, value),
            }
        }

        if let Ok(list) = std::env::var(ENV_CPU_AFFINITY) {
            match parse_cpu_list(&list) {
                Ok(_) => self.cpu_affinity = Some(list),
                Err(e) => tracing::warn!("ignoring {}: {}", ENV_CPU_AFFINITY, e),
            }
        }
    }

    /// Check the configuration for values the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be at least 1".into()));
        }
        if self.deque_log_size == 0 || self.deque_log_size > 30 {
            return Err(ConfigError::Invalid(format!(
                "deque_log_size {} out of range 1..=30",
                self.deque_log_size
            )));
        }

        let slab = &self.slab;
        if slab.min_class_log2 < 6 || slab.min_class_log2 > slab.max_class_log2 {
            return Err(ConfigError::Invalid(format!(
                "slab classes must satisfy 6 <= min ({}) <= max ({})",
                slab.min_class_log2, slab.max_class_log2
            )));
        }
        if slab.refill_log2 < slab.max_class_log2 || slab.region_chunk_log2 < slab.refill_log2 {
            return Err(ConfigError::Invalid(
                "slab sizes must satisfy max_class <= refill <= region_chunk".into(),
            ));
        }
        if slab.region_chunk_log2 >= usize::BITS - 1 {
            return Err(ConfigError::Invalid("region_chunk_log2 too large".into()));
        }

        if self.steal.attempts_per_level.is_empty() {
            return Err(ConfigError::Invalid(
                "steal.attempts_per_level must not be empty".into(),
            ));
        }

        if self.push.inbox_slots == 0 {
            return Err(ConfigError::Invalid("push.inbox_slots must be at least 1".into()));
        }
        if !(self.push.min_relative_size >= 1.0) {
            return Err(ConfigError::Invalid(
                "push.min_relative_size must be >= 1.0".into(),
            ));
        }

        let topo = &self.topology;
        if topo.numa_nodes == 0 {
            return Err(ConfigError::Invalid("topology.numa_nodes must be at least 1".into()));
        }
        let mut previous = 1;
        for &width in &topo.level_widths {
            if width <= previous || width % previous != 0 {
                return Err(ConfigError::Invalid(format!(
                    "topology.level_widths must be strictly increasing multiples, got {:?}",
                    topo.level_widths
                )));
            }
            previous = width;
        }
        if let Some(costs) = &topo.transfer_costs {
            let n = topo.numa_nodes;
            if costs.len() != n || costs.iter().any(|row| row.len() != n) {
                return Err(ConfigError::Invalid(format!(
                    "topology.transfer_costs must be a {}x{} matrix",
                    n, n
                )));
            }
        }

        if let Some(list) = &self.cpu_affinity {
            parse_cpu_list(list)?;
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(toml::ser::Error),
    #[error("invalid cpu list `{list}`: {reason}")]
    Affinity { list: String, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests;
