//! Per-rank hardware resource exclusivity.
//!
//! Three mutex-like counters, each bounded to one: CPU ops, GPU compute and
//! GPU communication. GPU recv is passive and never occupies the comm slot.
//! Double occupancy is a simulator bug.

use tracing::info;

use super::trace::{TraceNode, TraceNodeType};

#[derive(Debug, Default)]
pub struct HardwareResource {
    pub num_in_flight_cpu_ops: u32,
    pub num_in_flight_gpu_comp_ops: u32,
    pub num_in_flight_gpu_comm_ops: u32,

    pub num_cpu_ops: u64,
    pub num_gpu_ops: u64,
    pub num_gpu_comms: u64,

    /// 各类任务累计占用的仿真时间（纳秒）。
    pub tics_cpu_ops: u64,
    pub tics_gpu_ops: u64,
    pub tics_gpu_comms: u64,
}

impl HardwareResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupy(&mut self, node: &TraceNode) {
        if node.is_cpu_op {
            assert!(
                self.num_in_flight_cpu_ops == 0,
                "cpu op double occupancy on node {}",
                node.id
            );
            self.num_in_flight_cpu_ops += 1;
            self.num_cpu_ops += 1;
        } else if node.node_type == TraceNodeType::Comp {
            assert!(
                self.num_in_flight_gpu_comp_ops == 0,
                "gpu compute double occupancy on node {}",
                node.id
            );
            self.num_in_flight_gpu_comp_ops += 1;
            self.num_gpu_ops += 1;
        } else {
            // 接收是被动的，不占用通信资源。
            if node.node_type == TraceNodeType::CommRecv {
                return;
            }
            assert!(
                self.num_in_flight_gpu_comm_ops == 0,
                "gpu comm double occupancy on node {}",
                node.id
            );
            self.num_in_flight_gpu_comm_ops += 1;
            self.num_gpu_comms += 1;
        }
    }

    pub fn release(&mut self, node: &TraceNode) {
        if node.is_cpu_op {
            self.num_in_flight_cpu_ops -= 1;
            assert!(self.num_in_flight_cpu_ops == 0);
        } else if node.node_type == TraceNodeType::Comp {
            self.num_in_flight_gpu_comp_ops -= 1;
            assert!(self.num_in_flight_gpu_comp_ops == 0);
        } else {
            if node.node_type == TraceNodeType::CommRecv {
                return;
            }
            self.num_in_flight_gpu_comm_ops -= 1;
            assert!(self.num_in_flight_gpu_comm_ops == 0);
        }
    }

    pub fn is_available(&self, node: &TraceNode) -> bool {
        if node.is_cpu_op {
            self.num_in_flight_cpu_ops == 0
        } else if node.node_type == TraceNodeType::Comp {
            self.num_in_flight_gpu_comp_ops == 0
        } else if node.node_type == TraceNodeType::CommRecv {
            true
        } else {
            self.num_in_flight_gpu_comm_ops == 0
        }
    }

    pub fn all_idle(&self) -> bool {
        self.num_in_flight_cpu_ops == 0
            && self.num_in_flight_gpu_comp_ops == 0
            && self.num_in_flight_gpu_comm_ops == 0
    }

    pub fn report(&self) {
        info!(
            num_cpu_ops = self.num_cpu_ops,
            num_gpu_ops = self.num_gpu_ops,
            num_gpu_comms = self.num_gpu_comms,
            tics_cpu_ops = self.tics_cpu_ops,
            tics_gpu_ops = self.tics_gpu_ops,
            tics_gpu_comms = self.tics_gpu_comms,
            "hardware resource usage"
        );
    }
}
