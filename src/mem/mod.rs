//! 内存总线模型
//!
//! 模拟单个 rank 上 NPU 与内存加速器（MA）之间搬运一批数据的延迟。
//! 完成时以 General 事件按 FIFO 顺序回投给所属 stream。

use serde::{Deserialize, Serialize};

/// 传输类别：Local 维度用 Fast，其余用 Usual。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transmission {
    Fast,
    Usual,
}

/// 一次内存总线搬运的描述。
#[derive(Debug, Clone, Copy)]
pub struct PacketBundle {
    pub size: u64,
    pub transmission: Transmission,
    /// 是否在 NPU 上执行归约。
    pub processed: bool,
    /// 归约结果是否需要回传。
    pub send_back: bool,
}

/// 总线延迟参数。
#[derive(Debug, Clone, Copy)]
pub struct MemBusModel {
    pub fast_latency_ns: u64,
    pub usual_latency_ns: u64,
    /// 可选的带宽项（GB/s）；缺省时延迟与数据量无关。
    pub bandwidth_gb_per_sec: Option<f64>,
}

impl MemBusModel {
    pub fn latency_ns(&self, bundle: &PacketBundle) -> u64 {
        let base = match bundle.transmission {
            Transmission::Fast => self.fast_latency_ns,
            Transmission::Usual => self.usual_latency_ns,
        };
        match self.bandwidth_gb_per_sec {
            Some(bw) if bw > 0.0 => base.saturating_add((bundle.size as f64 / bw) as u64),
            _ => base,
        }
    }
}
