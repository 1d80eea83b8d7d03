//! Remote-memory oracle.
//!
//! Single-shot latency estimator for tensor fetches issued by MEM_LOAD /
//! MEM_STORE nodes. Completion is delivered back to the workload engine as
//! a handler event.

use crate::backend::Handler;
use crate::sim::Simulator;
use crate::system::events::HandlerEvent;

pub trait RemoteMemory: Send {
    fn issue(&mut self, sim: &mut Simulator, tensor_size: u64, on_done: Handler);
}

/// 解析模型：base 延迟 + 数据量 / 带宽。
#[derive(Debug, Clone, Copy)]
pub struct AnalyticalRemoteMemory {
    pub latency_ns: u64,
    pub bandwidth_gb_per_sec: f64,
}

impl RemoteMemory for AnalyticalRemoteMemory {
    fn issue(&mut self, sim: &mut Simulator, tensor_size: u64, on_done: Handler) {
        let tx = if self.bandwidth_gb_per_sec > 0.0 {
            (tensor_size as f64 / self.bandwidth_gb_per_sec) as u64
        } else {
            0
        };
        let at = sim.now().delayed_by(self.latency_ns.saturating_add(tx));
        sim.schedule(at, HandlerEvent::new(on_done));
    }
}
