//! Congestion-unaware analytical backend.
//!
//! Chunk latency on a dimension is `link_latency + size / bandwidth`; there
//! is no queueing between chunks. Arrivals are delivered to the rendezvous
//! matcher as events; recv-after-finish fires at `now + 0`.

use tracing::{debug, info};

use super::api::{Handler, NetworkBackend};
use super::matcher::{CallbackTracker, ChunkIdGenerator, ChunkKey, FlowKey};
use crate::sim::Simulator;
use crate::stream::Chunk;
use crate::system::events::{ChunkArrivalEvent, HandlerEvent};
use crate::topo::RankId;

/// Per-dimension link parameters.
#[derive(Debug, Clone, Copy)]
pub struct LinkParams {
    /// GB/s，等价于 bytes/ns。
    pub bandwidth_gb_per_sec: f64,
    pub latency_ns: u64,
}

pub struct AnalyticalBackend {
    dims: Vec<LinkParams>,
    queues_per_dim: usize,
    injection_scale: f64,
    tracker: CallbackTracker,
    chunk_ids: ChunkIdGenerator,
    /// 包级（rendezvous）模式才做部分字节核算。
    packet_level: bool,
    finished_ranks: usize,
    total_ranks: usize,
}

impl AnalyticalBackend {
    pub fn new(
        dims: Vec<LinkParams>,
        queues_per_dim: usize,
        injection_scale: f64,
        packet_level: bool,
        total_ranks: usize,
    ) -> Self {
        assert!(!dims.is_empty(), "backend needs at least one dimension");
        assert!(queues_per_dim >= 1, "queues_per_dim must be >= 1");
        Self {
            dims,
            queues_per_dim,
            injection_scale,
            tracker: CallbackTracker::default(),
            chunk_ids: ChunkIdGenerator::default(),
            packet_level,
            finished_ranks: 0,
            total_ranks,
        }
    }

    pub fn tracker(&self) -> &CallbackTracker {
        &self.tracker
    }

    fn dim_of_vnet(&self, vnet: usize) -> usize {
        (vnet / self.queues_per_dim).min(self.dims.len() - 1)
    }

    fn latency_ns(&self, vnet: usize, size: u64) -> u64 {
        let link = self.dims[self.dim_of_vnet(vnet)];
        let tx = if link.bandwidth_gb_per_sec > 0.0 {
            (size as f64 / link.bandwidth_gb_per_sec * self.injection_scale) as u64
        } else {
            0
        };
        link.latency_ns.saturating_add(tx)
    }
}

impl NetworkBackend for AnalyticalBackend {
    fn sim_send(
        &mut self,
        sim: &mut Simulator,
        tag: u64,
        src: RankId,
        dst: RankId,
        size: u64,
        vnet: usize,
        on_send_done: Handler,
    ) -> u64 {
        let flow = FlowKey {
            tag,
            src,
            dst,
            size,
        };
        let chunk_id = self.chunk_ids.create_send_chunk_id(flow);
        let key = ChunkKey { flow, chunk_id };

        // recv 可能先到：get-or-create 拿到同一个条目，补登发送回调。
        let entry = self.tracker.create_new_entry(key);
        assert!(
            entry.send.is_none(),
            "duplicate send registration for {:?}",
            key
        );
        entry.send = Some(on_send_done);

        let chunk = Chunk {
            size,
            src,
            dst,
            tag,
            vnet,
            chunk_id,
        };
        let delta = self.latency_ns(vnet, size);
        debug!(?chunk, delta_ns = delta, "chunk handed to network");
        sim.schedule(
            sim.now().delayed_by(delta),
            ChunkArrivalEvent { chunk, bytes: size },
        );
        chunk_id
    }

    fn sim_recv(
        &mut self,
        sim: &mut Simulator,
        tag: u64,
        src: RankId,
        dst: RankId,
        size: u64,
        _vnet: usize,
        on_recv_done: Handler,
    ) -> u64 {
        let flow = FlowKey {
            tag,
            src,
            dst,
            size,
        };
        let chunk_id = self.chunk_ids.create_recv_chunk_id(flow);
        let key = ChunkKey { flow, chunk_id };

        let mut expected = size;
        if self.packet_level {
            // 先消费同流早到的字节。
            expected -= self.tracker.take_standby(flow, expected);
            if expected == 0 {
                sim.schedule(sim.now(), HandlerEvent::new(on_recv_done));
                return chunk_id;
            }
        }

        let (finished, arrived) = {
            let entry = self.tracker.create_new_entry(key);
            (entry.transmission_finished, entry.arrived_bytes)
        };

        if finished {
            if self.packet_level && arrived < expected {
                // 已标记结束但字节不足：继续等剩余字节。
                let entry = self.tracker.search_entry(key).expect("entry exists");
                entry.transmission_finished = false;
                entry.recv = Some(on_recv_done);
                entry.expected_bytes = expected - arrived;
                entry.arrived_bytes = 0;
            } else {
                let entry = self.tracker.pop_entry(key);
                debug_assert!(entry.recv.is_none());
                if self.packet_level {
                    self.tracker
                        .stash_standby(flow, arrived.saturating_sub(expected));
                }
                sim.schedule(sim.now(), HandlerEvent::new(on_recv_done));
            }
        } else {
            let entry = self.tracker.search_entry(key).expect("entry exists");
            assert!(
                entry.recv.is_none(),
                "duplicate recv registration for {:?}",
                key
            );
            entry.recv = Some(on_recv_done);
            entry.expected_bytes = expected;
        }
        chunk_id
    }

    fn sim_schedule(&mut self, sim: &mut Simulator, delta_ns: u64, handler: Handler) {
        sim.schedule(sim.now().delayed_by(delta_ns), HandlerEvent::new(handler));
    }

    fn sim_notify_finished(&mut self, sim: &Simulator, rank: RankId) {
        self.finished_ranks += 1;
        info!(
            rank = rank.0,
            finished = self.finished_ranks,
            total = self.total_ranks,
            now_ns = sim.now().as_nanos(),
            "rank notified finished"
        );
        if self.finished_ranks == self.total_ranks {
            info!(
                now_ns = sim.now().as_nanos(),
                "all ranks finished, halting backend"
            );
        }
    }

    fn get_bw_at_dimension(&self, dim: usize) -> Option<f64> {
        self.dims.get(dim).map(|d| d.bandwidth_gb_per_sec)
    }

    fn process_chunk_arrival(
        &mut self,
        _sim: &mut Simulator,
        chunk: &Chunk,
        bytes: u64,
    ) -> Vec<Handler> {
        let flow = FlowKey {
            tag: chunk.tag,
            src: chunk.src,
            dst: chunk.dst,
            size: chunk.size,
        };
        let key = ChunkKey {
            flow,
            chunk_id: chunk.chunk_id,
        };
        let mut fired = Vec::new();

        let entry = self
            .tracker
            .search_entry(key)
            .unwrap_or_else(|| panic!("matcher key absent at arrival: {:?}", key));

        // 发送端回调恰好触发一次。
        if let Some(send) = entry.send.take() {
            fired.push(send);
        }

        if !self.packet_level {
            if entry.recv.is_some() {
                let entry = self.tracker.pop_entry(key);
                fired.extend(entry.recv);
            } else {
                entry.transmission_finished = true;
                entry.arrived_bytes = bytes;
            }
            return fired;
        }

        // 包级核算：到达 k 字节、接收端还差 m 字节。
        if entry.recv.is_some() {
            let expected = entry.expected_bytes;
            if bytes >= expected {
                let entry = self.tracker.pop_entry(key);
                fired.extend(entry.recv);
                self.tracker.stash_standby(flow, bytes - expected);
            } else {
                entry.expected_bytes = expected - bytes;
            }
        } else {
            entry.transmission_finished = true;
            entry.arrived_bytes += bytes;
        }
        fired
    }

    fn all_ranks_finished(&self) -> bool {
        self.finished_ranks >= self.total_ranks
    }
}
