//! Workload layer: execution-trace feeding, per-rank hardware exclusivity
//! and the roofline compute model.

pub mod comm_group;
pub mod hardware;
pub mod trace;

pub use comm_group::CommGroup;
pub use hardware::HardwareResource;
pub use trace::{CollectiveKind, EtFeeder, TraceFeeder, TraceNode, TraceNodeType};

/// Roofline model: attainable performance given an operational intensity.
#[derive(Debug, Clone, Copy)]
pub struct Roofline {
    /// 峰值算力（GFLOPS，即 ops/ns）。
    pub peak_perf_gflops: f64,
    /// 本地内存带宽（GB/s，即 bytes/ns）。
    pub mem_bw_gb_per_sec: f64,
}

impl Roofline {
    /// ops/ns at the given operational intensity (ops/byte).
    pub fn get_perf(&self, operational_intensity: f64) -> f64 {
        (self.mem_bw_gb_per_sec * operational_intensity).min(self.peak_perf_gflops)
    }
}
