//! Ring-based collective algorithm.
//!
//! Serves All-Reduce, All-Gather, Reduce-Scatter and All-to-All on one ring
//! dimension. Chunk injection runs through two budgets: a zero-latency
//! budget dispatched through the memory accelerator on the fast bus class,
//! and a non-zero-latency budget on the usual class whose passes alternate
//! between plain transfers and reductions (the `toggle`). The All-to-All
//! variant additionally rotates the (sender, receiver) pair along the ring
//! after every released batch, skipping itself.

use std::collections::VecDeque;

use crate::collective::algorithm::{AlgAction, AlgEvent, Algorithm};
use crate::collective::ComType;
use crate::mem::{PacketBundle, Transmission};
use crate::scheduler::InjectionPolicy;
use crate::stream::{Stream, StreamState};
use crate::topo::{RankId, RingDirection, RingTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingVariant {
    Plain,
    AllToAll { middle_point: usize },
}

/// A chunk waiting to be issued: fixed (sender, receiver) pair at insertion
/// time.
#[derive(Debug, Clone, Copy)]
struct ChunkSlot {
    src: RankId,
    dst: RankId,
}

pub struct Ring {
    variant: RingVariant,
    com_type: ComType,
    id: RankId,
    topology: RingTopology,
    direction: RingDirection,
    nodes_in_ring: usize,
    curr_receiver: RankId,
    curr_sender: RankId,
    parallel_reduce: usize,
    pub total_packets_sent: usize,
    pub total_packets_received: usize,
    free_packets: usize,
    zero_latency_packets: usize,
    non_zero_latency_packets: usize,
    toggle: bool,
    stream_count: usize,
    max_count: usize,
    remained_packets_per_message: usize,
    remained_packets_per_max_count: usize,
    msg_size: u64,
    final_data_size: u64,
    transmission: Transmission,
    packets: VecDeque<ChunkSlot>,
    locked_packets: usize,
    processed: bool,
    send_back: bool,
    npu_to_ma: bool,
}

impl Ring {
    pub fn new(
        com_type: ComType,
        id: RankId,
        topology: RingTopology,
        data_size: u64,
        direction: RingDirection,
        injection_policy: InjectionPolicy,
    ) -> Self {
        let nodes_in_ring = topology.nodes_in_ring();
        let n = nodes_in_ring as u64;

        let mut parallel_reduce = 1;
        let stream_count = match com_type {
            ComType::AllReduce => 2 * nodes_in_ring.saturating_sub(1),
            ComType::AllToAll => {
                parallel_reduce = match injection_policy {
                    InjectionPolicy::Aggressive => nodes_in_ring.saturating_sub(1).max(1),
                    _ => 1,
                };
                nodes_in_ring.saturating_sub(1) * nodes_in_ring / 2
            }
            _ => nodes_in_ring.saturating_sub(1),
        };

        let max_count = match com_type {
            ComType::AllToAll | ComType::AllGather => 0,
            _ => nodes_in_ring.saturating_sub(1),
        };

        let (msg_size, final_data_size) = match com_type {
            ComType::AllReduce => (data_size / n.max(1), data_size),
            ComType::AllGather => (data_size, data_size.saturating_mul(n)),
            ComType::ReduceScatter => (data_size / n.max(1), data_size / n.max(1)),
            ComType::AllToAll => (data_size / n.max(1), data_size),
        };

        let transmission = if topology.is_local() {
            Transmission::Fast
        } else {
            Transmission::Usual
        };

        Self {
            variant: RingVariant::Plain,
            com_type,
            id,
            curr_receiver: topology.get_receiver(id, direction),
            curr_sender: topology.get_sender(id, direction),
            topology,
            direction,
            nodes_in_ring,
            parallel_reduce,
            total_packets_sent: 0,
            total_packets_received: 0,
            free_packets: 0,
            zero_latency_packets: 0,
            non_zero_latency_packets: 0,
            toggle: false,
            stream_count,
            max_count,
            remained_packets_per_message: 1,
            remained_packets_per_max_count: 1,
            msg_size,
            final_data_size,
            transmission,
            packets: VecDeque::new(),
            locked_packets: 0,
            processed: false,
            send_back: false,
            npu_to_ma: false,
        }
    }

    /// All-to-All variant: rotating neighbor pairs and a window bound on the
    /// number of in-flight reductions. `window == -1` means `n - 1`.
    pub fn new_all_to_all(
        com_type: ComType,
        window: i64,
        id: RankId,
        topology: RingTopology,
        data_size: u64,
        direction: RingDirection,
        injection_policy: InjectionPolicy,
    ) -> Self {
        let mut ring = Self::new(com_type, id, topology, data_size, direction, injection_policy);
        let n = ring.nodes_in_ring;
        ring.variant = RingVariant::AllToAll {
            middle_point: n.saturating_sub(1),
        };
        ring.parallel_reduce = if window < 0 {
            n.saturating_sub(1).max(1)
        } else {
            (window as usize).min(n.saturating_sub(1)).max(1)
        };
        if com_type == ComType::AllToAll {
            ring.stream_count = n.saturating_sub(1);
        }
        ring
    }

    pub fn final_data_size(&self) -> u64 {
        self.final_data_size
    }

    pub fn msg_size(&self) -> u64 {
        self.msg_size
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn parallel_reduce(&self) -> usize {
        self.parallel_reduce
    }

    fn get_non_zero_latency_packets(&self) -> usize {
        match self.variant {
            RingVariant::Plain => self.nodes_in_ring.saturating_sub(1) * self.parallel_reduce,
            RingVariant::AllToAll { .. } => {
                if !self.topology.is_local() {
                    self.parallel_reduce
                } else {
                    self.nodes_in_ring.saturating_sub(1) * self.parallel_reduce
                }
            }
        }
    }

    fn release_packets(&mut self, out: &mut Vec<AlgAction>) {
        debug_assert!(self.locked_packets > 0, "release without locked chunks");
        out.push(AlgAction::MemBus {
            bundle: PacketBundle {
                size: self.msg_size,
                transmission: self.transmission,
                processed: self.processed,
                send_back: self.send_back,
            },
            to_npu: !self.npu_to_ma,
        });
        self.locked_packets = 0;
    }

    fn process_stream_count(&mut self, stream: &mut Stream) {
        if self.remained_packets_per_message > 0 {
            self.remained_packets_per_message -= 1;
        }
        if self.remained_packets_per_message == 0 && self.stream_count > 0 {
            self.stream_count -= 1;
            if self.stream_count > 0 {
                self.remained_packets_per_message = 1;
            }
        }
        if self.remained_packets_per_message == 0
            && self.stream_count == 0
            && stream.state != StreamState::Dead
        {
            stream.change_state(StreamState::Zombie);
        }
    }

    fn process_max_count(&mut self, out: &mut Vec<AlgAction>) {
        if self.remained_packets_per_max_count > 0 {
            self.remained_packets_per_max_count -= 1;
        }
        if self.remained_packets_per_max_count == 0 {
            self.max_count = self.max_count.saturating_sub(1);
            self.release_packets(out);
            self.remained_packets_per_max_count = 1;

            if let RingVariant::AllToAll { .. } = self.variant {
                // 轮转目标；自身不参与，跳过。
                self.curr_receiver = self.topology.get_receiver(self.curr_receiver, self.direction);
                if self.curr_receiver == self.id {
                    self.curr_receiver =
                        self.topology.get_receiver(self.curr_receiver, self.direction);
                }
                self.curr_sender = self.topology.get_sender(self.curr_sender, self.direction);
                if self.curr_sender == self.id {
                    self.curr_sender = self.topology.get_sender(self.curr_sender, self.direction);
                }
            }
        }
    }

    fn reduce(&mut self, stream: &mut Stream) {
        self.process_stream_count(stream);
        self.packets.pop_front();
        self.free_packets -= 1;
        self.total_packets_sent += 1;
    }

    fn iteratable(&mut self, stream: &mut Stream, out: &mut Vec<AlgAction>) -> bool {
        if self.stream_count == 0 && self.free_packets == self.parallel_reduce {
            stream.change_state(StreamState::Zombie);
            out.push(AlgAction::Exit);
            return false;
        }
        true
    }

    fn insert_packet(&mut self, out: &mut Vec<AlgAction>) {
        if self.zero_latency_packets == 0 && self.non_zero_latency_packets == 0 {
            self.zero_latency_packets = self.parallel_reduce;
            self.non_zero_latency_packets = self.get_non_zero_latency_packets();
            self.toggle = !self.toggle;
        }

        if self.zero_latency_packets > 0 {
            self.packets.push_back(ChunkSlot {
                src: self.curr_sender,
                dst: self.curr_receiver,
            });
            self.locked_packets += 1;
            self.processed = false;
            self.send_back = false;
            self.npu_to_ma = true;
            self.process_max_count(out);
            self.zero_latency_packets -= 1;
            return;
        }
        if self.non_zero_latency_packets > 0 {
            self.packets.push_back(ChunkSlot {
                src: self.curr_sender,
                dst: self.curr_receiver,
            });
            self.locked_packets += 1;
            self.processed = self.com_type == ComType::ReduceScatter
                || (self.com_type == ComType::AllReduce && self.toggle);
            self.send_back = self.non_zero_latency_packets > self.parallel_reduce;
            self.npu_to_ma = false;
            self.process_max_count(out);
            self.non_zero_latency_packets -= 1;
            return;
        }
        panic!("ring algorithm asked to inject with both budgets exhausted");
    }

    fn ready(&mut self, stream: &mut Stream, out: &mut Vec<AlgAction>) -> bool {
        if matches!(stream.state, StreamState::Created | StreamState::Ready) {
            stream.change_state(StreamState::Executing);
        }
        if self.packets.is_empty() || self.stream_count == 0 || self.free_packets == 0 {
            return false;
        }
        let slot = *self.packets.front().expect("non-empty checked above");
        out.push(AlgAction::Send {
            dst: slot.dst,
            size: self.msg_size,
            tag: stream.stream_id,
            notify: None,
        });
        out.push(AlgAction::Recv {
            src: slot.src,
            size: self.msg_size,
            tag: stream.stream_id,
            arg: 0,
        });
        self.reduce(stream);
        true
    }
}

impl Algorithm for Ring {
    fn run(&mut self, event: AlgEvent, stream: &mut Stream, out: &mut Vec<AlgAction>) {
        match event {
            AlgEvent::General { .. } => {
                self.free_packets += 1;
                match self.variant {
                    RingVariant::AllToAll { middle_point }
                        if self.com_type == ComType::AllReduce
                            && self.stream_count <= middle_point =>
                    {
                        // 后半程的归约要等前半程至少 middle_point 个包到齐。
                        if self.total_packets_received < middle_point {
                            return;
                        }
                        for _ in 0..self.parallel_reduce {
                            self.ready(stream, out);
                        }
                        self.iteratable(stream, out);
                    }
                    _ => {
                        self.ready(stream, out);
                        self.iteratable(stream, out);
                    }
                }
            }
            AlgEvent::PacketReceived { .. } => {
                self.total_packets_received += 1;
                self.insert_packet(out);
            }
            AlgEvent::StreamInit => {
                for _ in 0..self.parallel_reduce {
                    self.insert_packet(out);
                }
            }
            AlgEvent::PacketSent { .. } => {}
        }
    }
}
