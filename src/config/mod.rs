//! Configuration loading and the fatal-at-startup error kinds.
//!
//! Four JSON files configure a run: system (policies, algorithms, memory
//! bus), network (dimension shape + link parameters), remote memory and the
//! optional communicator groups. Unknown policy names fail deserialization.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::collective::AlgorithmKind;
use crate::scheduler::{
    InjectionPolicy, InterDimensionScheduling, IntraDimensionScheduling, SchedulingPolicy,
};
use crate::topo::DimensionKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workload file: {0} does not exist")]
    MissingTrace(String),
    #[error("workload file: {path} exists but is not readable: {source}")]
    UnreadableTrace {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid network configuration: {0}")]
    InvalidNetwork(String),
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// How a multi-dimension all-reduce decomposes into phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOptimization {
    #[default]
    Baseline,
    LocalBwAware,
}

fn default_impls() -> Vec<AlgorithmKind> {
    vec![AlgorithmKind::Ring]
}

fn default_peak_perf() -> f64 {
    1000.0
}

fn default_mem_bw() -> f64 {
    100.0
}

fn default_membus_fast() -> u64 {
    10
}

fn default_membus_usual() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub scheduling_policy: SchedulingPolicy,
    pub intra_dimension_scheduling: IntraDimensionScheduling,
    pub inter_dimension_scheduling: InterDimensionScheduling,
    pub injection_policy: InjectionPolicy,
    pub collective_optimization: CollectiveOptimization,
    /// Per-dimension algorithm choice; the last entry covers deeper dims.
    pub all_reduce_implementation: Vec<AlgorithmKind>,
    pub all_gather_implementation: Vec<AlgorithmKind>,
    pub reduce_scatter_implementation: Vec<AlgorithmKind>,
    pub all_to_all_implementation: Vec<AlgorithmKind>,
    pub replay_only: bool,
    pub roofline_enabled: bool,
    pub peak_perf_gflops: f64,
    pub local_mem_bw_gb_per_sec: f64,
    pub membus_fast_latency_ns: u64,
    pub membus_usual_latency_ns: u64,
    pub membus_bandwidth_gb_per_sec: Option<f64>,
    pub trace_enabled: bool,
    /// AllToAll 窗口大小；-1 表示 n-1。
    pub alltoall_window: i64,
    /// Prefix of per-rank collective traces for the trace-driven
    /// implementation.
    pub collective_trace: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            scheduling_policy: SchedulingPolicy::default(),
            intra_dimension_scheduling: IntraDimensionScheduling::default(),
            inter_dimension_scheduling: InterDimensionScheduling::default(),
            injection_policy: InjectionPolicy::default(),
            collective_optimization: CollectiveOptimization::default(),
            all_reduce_implementation: default_impls(),
            all_gather_implementation: default_impls(),
            reduce_scatter_implementation: default_impls(),
            all_to_all_implementation: default_impls(),
            replay_only: false,
            roofline_enabled: false,
            peak_perf_gflops: default_peak_perf(),
            local_mem_bw_gb_per_sec: default_mem_bw(),
            membus_fast_latency_ns: default_membus_fast(),
            membus_usual_latency_ns: default_membus_usual(),
            membus_bandwidth_gb_per_sec: None,
            trace_enabled: false,
            alltoall_window: -1,
            collective_trace: None,
        }
    }
}

impl SystemConfig {
    /// Algorithm for `com_type` on dimension `dim`.
    pub fn implementation_for(&self, impls: &[AlgorithmKind], dim: usize) -> AlgorithmKind {
        impls
            .get(dim)
            .or_else(|| impls.last())
            .copied()
            .unwrap_or(AlgorithmKind::Ring)
    }
}

fn default_dim_kind() -> DimensionKind {
    DimensionKind::Remote
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDimConfig {
    pub size: usize,
    pub bandwidth_gb_per_sec: f64,
    pub latency_ns: u64,
    #[serde(default = "default_dim_kind")]
    pub kind: DimensionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub dims: Vec<NetworkDimConfig>,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dims.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "at least one dimension required".into(),
            ));
        }
        if self.dims.iter().any(|d| d.size == 0) {
            return Err(ConfigError::InvalidNetwork(
                "dimension sizes must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn num_ranks(&self) -> usize {
        self.dims.iter().map(|d| d.size).product()
    }
}

fn default_remote_latency() -> u64 {
    500
}

fn default_remote_bw() -> f64 {
    50.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMemoryConfig {
    #[serde(default = "default_remote_latency")]
    pub latency_ns: u64,
    #[serde(default = "default_remote_bw")]
    pub bandwidth_gb_per_sec: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// tracing env-filter 表达式，如 "info" 或 "ccsim_rs=debug"。
    #[serde(default)]
    pub filter: Option<String>,
}
