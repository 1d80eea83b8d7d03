//! Trace-driven collective.
//!
//! Walks a collective-specific DAG (COMM_SEND / COMM_RECV / COMP reduction
//! nodes, same schema as the workload trace) with the workload engine's
//! dep-free issue loop and hardware-exclusivity semantics. The stream exits
//! once the DAG has no more issuable nodes.

use crate::collective::algorithm::{AlgAction, AlgEvent, Algorithm};
use crate::stream::{Stream, StreamState};
use crate::workload::hardware::HardwareResource;
use crate::workload::trace::{EtFeeder, TraceFeeder, TraceNode, TraceNodeType};

pub struct TraceDrivenCollective {
    feeder: EtFeeder,
    hw: HardwareResource,
}

impl TraceDrivenCollective {
    pub fn new(trace: Vec<TraceNode>) -> Self {
        Self {
            feeder: EtFeeder::new(trace),
            hw: HardwareResource::new(),
        }
    }

    fn issue(&mut self, node: &TraceNode, out: &mut Vec<AlgAction>) {
        self.hw.occupy(node);
        match node.node_type {
            TraceNodeType::CommSend => out.push(AlgAction::Send {
                dst: crate::topo::RankId(node.comm_dst),
                size: node.comm_size,
                tag: node.comm_tag,
                notify: Some(node.id),
            }),
            TraceNodeType::CommRecv => out.push(AlgAction::Recv {
                src: crate::topo::RankId(node.comm_src),
                size: node.comm_size,
                tag: node.comm_tag,
                arg: node.id,
            }),
            TraceNodeType::Comp => out.push(AlgAction::Delay {
                ns: node.runtime_us.saturating_mul(1000).max(1),
                arg: node.id,
            }),
            other => panic!("unexpected node type {:?} in collective trace", other),
        }
    }

    fn issue_dep_free_nodes(&mut self, out: &mut Vec<AlgAction>) {
        let mut push_back = Vec::new();
        while let Some(node) = self.feeder.get_next_issuable_node() {
            if node.node_type == TraceNodeType::Invalid {
                self.feeder.free_children_nodes(node.id);
                self.feeder.remove_node(node.id);
                continue;
            }
            if self.hw.is_available(&node) {
                self.issue(&node, out);
            } else {
                push_back.push(node.id);
            }
        }
        for id in push_back {
            self.feeder.push_back_issuable_node(id);
        }
    }

    fn node_done(&mut self, node_id: u64, stream: &mut Stream, out: &mut Vec<AlgAction>) {
        let node = self
            .feeder
            .lookup_node(node_id)
            .unwrap_or_else(|| panic!("completed node {node_id} missing from collective trace"))
            .clone();
        self.hw.release(&node);
        self.feeder.free_children_nodes(node_id);
        self.issue_dep_free_nodes(out);
        self.feeder.remove_node(node_id);

        if !self.feeder.has_nodes_to_issue() && self.hw.all_idle() {
            stream.change_state(StreamState::Zombie);
            out.push(AlgAction::Exit);
        }
    }
}

impl Algorithm for TraceDrivenCollective {
    fn run(&mut self, event: AlgEvent, stream: &mut Stream, out: &mut Vec<AlgAction>) {
        match event {
            AlgEvent::StreamInit => {
                stream.change_state(StreamState::Executing);
                self.issue_dep_free_nodes(out);
                if !self.feeder.has_nodes_to_issue() && self.hw.all_idle() {
                    stream.change_state(StreamState::Zombie);
                    out.push(AlgAction::Exit);
                }
            }
            AlgEvent::General { arg }
            | AlgEvent::PacketReceived { arg }
            | AlgEvent::PacketSent { arg } => {
                self.node_done(arg, stream, out);
            }
        }
    }
}
