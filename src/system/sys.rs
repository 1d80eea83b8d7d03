//! Cluster world: per-rank systems plus the shared backend.
//!
//! Streams, datasets and workload state are arena-held per rank and
//! addressed by integer ids; events carry ids, never references. All
//! mutation happens inside event callbacks, serialized by the event queue.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Handler, NetworkBackend};
use crate::collective::algorithm::{AlgAction, AlgEvent, CollectiveDescriptor, CollectivePhase};
use crate::collective::{AlgorithmKind, ComType};
use crate::config::{CollectiveOptimization, SystemConfig};
use crate::mem::MemBusModel;
use crate::remote_mem::RemoteMemory;
use crate::scheduler::{order_dims, StreamScheduler};
use crate::sim::{SimTime, Simulator, World};
use crate::stream::{Stream, StreamState};
use crate::system::dataset::DataSet;
use crate::system::events::HandlerEvent;
use crate::topo::{LogicalDims, RankId, RingDirection};
use crate::workload::trace::{CollectiveKind, TraceFeeder, TraceNode, TraceNodeType};
use crate::workload::{CommGroup, HardwareResource, Roofline};

/// Per-rank system state.
pub struct NodeSys {
    pub id: RankId,
    pub feeder: Box<dyn TraceFeeder>,
    pub hw: HardwareResource,
    pub scheduler: StreamScheduler,
    pub streams: HashMap<u64, Stream>,
    pub datasets: HashMap<u64, DataSet>,
    pub comm_group: Option<CommGroup>,
    pub collective_trace: Option<Arc<Vec<TraceNode>>>,
    stream_counter: u64,
    dataset_counter: u64,
    collective_seq: u64,
    pub is_finished: bool,
    pub finished_at: Option<SimTime>,
}

/// Completion summary for one rank, printed by the driver.
#[derive(Debug, Clone)]
pub struct RankReport {
    pub rank: usize,
    pub finished_at_ns: u64,
    pub exposed_comm_ns: u64,
    pub num_cpu_ops: u64,
    pub num_gpu_ops: u64,
    pub num_gpu_comms: u64,
}

pub struct ClusterWorld {
    pub nodes: Vec<NodeSys>,
    pub backend: Box<dyn NetworkBackend>,
    pub remote_mem: Box<dyn RemoteMemory>,
    pub dims: LogicalDims,
    pub membus: MemBusModel,
    pub roofline: Roofline,
    config: SystemConfig,
    comm_scale: f64,
    compute_scale: f64,
}

impl World for ClusterWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ClusterWorld {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SystemConfig,
        dims: LogicalDims,
        queues_per_dim: usize,
        comm_scale: f64,
        compute_scale: f64,
        backend: Box<dyn NetworkBackend>,
        remote_mem: Box<dyn RemoteMemory>,
        feeders: Vec<Box<dyn TraceFeeder>>,
        comm_groups: Vec<Option<CommGroup>>,
        collective_traces: Vec<Option<Arc<Vec<TraceNode>>>>,
    ) -> Self {
        assert_eq!(feeders.len(), dims.num_ranks(), "one trace per rank");
        let membus = MemBusModel {
            fast_latency_ns: config.membus_fast_latency_ns,
            usual_latency_ns: config.membus_usual_latency_ns,
            bandwidth_gb_per_sec: config.membus_bandwidth_gb_per_sec,
        };
        let roofline = Roofline {
            peak_perf_gflops: config.peak_perf_gflops,
            mem_bw_gb_per_sec: config.local_mem_bw_gb_per_sec,
        };
        let num_dims = dims.num_dims();
        let mut comm_groups = comm_groups.into_iter();
        let mut collective_traces = collective_traces.into_iter();
        let nodes = feeders
            .into_iter()
            .enumerate()
            .map(|(r, feeder)| NodeSys {
                id: RankId(r),
                feeder,
                hw: HardwareResource::new(),
                scheduler: StreamScheduler::new(
                    num_dims,
                    queues_per_dim,
                    config.scheduling_policy,
                    config.intra_dimension_scheduling,
                ),
                streams: HashMap::new(),
                datasets: HashMap::new(),
                comm_group: comm_groups.next().flatten(),
                collective_trace: collective_traces.next().flatten(),
                stream_counter: 0,
                dataset_counter: 0,
                collective_seq: 0,
                is_finished: false,
                finished_at: None,
            })
            .collect();
        Self {
            nodes,
            backend,
            remote_mem,
            dims,
            membus,
            roofline,
            config,
            comm_scale,
            compute_scale,
        }
    }

    pub fn num_ranks(&self) -> usize {
        self.nodes.len()
    }

    pub fn all_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.is_finished)
    }

    pub fn reports(&self) -> Vec<RankReport> {
        self.nodes
            .iter()
            .map(|n| {
                let finished_at_ns = n.finished_at.map(|t| t.as_nanos()).unwrap_or(0);
                RankReport {
                    rank: n.id.0,
                    finished_at_ns,
                    exposed_comm_ns: finished_at_ns.saturating_sub(n.hw.tics_gpu_ops),
                    num_cpu_ops: n.hw.num_cpu_ops,
                    num_gpu_ops: n.hw.num_gpu_ops,
                    num_gpu_comms: n.hw.num_gpu_comms,
                }
            })
            .collect()
    }

    /// Route a fired handler to its target.
    pub fn dispatch(&mut self, sim: &mut Simulator, handler: Handler) {
        match handler {
            Handler::Noop => {}
            Handler::StreamInit { rank, stream_id } => {
                self.run_stream(sim, rank, stream_id, AlgEvent::StreamInit)
            }
            Handler::StreamGeneral {
                rank,
                stream_id,
                arg,
            } => self.run_stream(sim, rank, stream_id, AlgEvent::General { arg }),
            Handler::StreamPacketSent {
                rank,
                stream_id,
                arg,
            } => self.run_stream(sim, rank, stream_id, AlgEvent::PacketSent { arg }),
            Handler::StreamPacketReceived {
                rank,
                stream_id,
                arg,
            } => self.run_stream(sim, rank, stream_id, AlgEvent::PacketReceived { arg }),
            Handler::WorkloadGeneral { rank, node_id }
            | Handler::WorkloadPacketSent { rank, node_id }
            | Handler::WorkloadPacketReceived { rank, node_id } => {
                self.workload_node_done(sim, rank, node_id)
            }
            Handler::DatasetGeneral { rank, dataset_id } => {
                self.dataset_stream_finished(sim, rank, dataset_id)
            }
        }
    }

    // ---- workload engine -------------------------------------------------

    /// Fetch issuable nodes; park resource-blocked ones and replay them back
    /// into the feeder afterwards.
    pub fn issue_dep_free_nodes(&mut self, sim: &mut Simulator, rank: RankId) {
        let mut push_back = Vec::new();
        loop {
            let Some(node) = self.nodes[rank.0].feeder.get_next_issuable_node() else {
                break;
            };
            if self.nodes[rank.0].hw.is_available(&node) {
                self.issue(sim, rank, node);
            } else {
                push_back.push(node.id);
            }
        }
        for id in push_back {
            self.nodes[rank.0].feeder.push_back_issuable_node(id);
        }
    }

    fn issue(&mut self, sim: &mut Simulator, rank: RankId, node: TraceNode) {
        if self.config.replay_only {
            self.nodes[rank.0].hw.occupy(&node);
            self.issue_replay(sim, rank, &node);
            return;
        }
        match node.node_type {
            TraceNodeType::MemLoad | TraceNodeType::MemStore => {
                self.trace_issue(sim, rank, &node);
                self.issue_remote_mem(sim, rank, &node);
            }
            _ if node.is_cpu_op || node.node_type == TraceNodeType::Comp => {
                if node.runtime_us == 0 && node.num_ops == 0 {
                    self.skip_invalid(rank, &node);
                } else {
                    self.trace_issue(sim, rank, &node);
                    self.issue_comp(sim, rank, &node);
                }
            }
            TraceNodeType::CommColl | TraceNodeType::CommSend | TraceNodeType::CommRecv => {
                self.trace_issue(sim, rank, &node);
                self.issue_comm(sim, rank, &node);
            }
            TraceNodeType::Invalid => self.skip_invalid(rank, &node),
            other => panic!("unknown node type {:?} for node {}", other, node.id),
        }
    }

    fn trace_issue(&self, sim: &Simulator, rank: RankId, node: &TraceNode) {
        if self.config.trace_enabled {
            debug!(
                sys_id = rank.0,
                tick = sim.now().as_nanos(),
                node_id = node.id,
                node_name = %node.name,
                node_type = ?node.node_type,
                "issue"
            );
        }
    }

    fn replay_runtime_ns(&self, node: &TraceNode) -> u64 {
        let mut runtime = 1u64;
        if node.runtime_us != 0 {
            // 轨迹里的用时是微秒，转成纳秒。
            runtime = node.runtime_us.saturating_mul(1000);
        }
        ((runtime as f64) * self.compute_scale).max(1.0) as u64
    }

    fn issue_replay(&mut self, sim: &mut Simulator, rank: RankId, node: &TraceNode) {
        let runtime = self.replay_runtime_ns(node);
        let hw = &mut self.nodes[rank.0].hw;
        if node.is_cpu_op {
            hw.tics_cpu_ops += runtime;
        } else {
            hw.tics_gpu_ops += runtime;
        }
        sim.schedule(
            sim.now().delayed_by(runtime),
            HandlerEvent::new(Handler::WorkloadGeneral {
                rank,
                node_id: node.id,
            }),
        );
    }

    fn issue_comp(&mut self, sim: &mut Simulator, rank: RankId, node: &TraceNode) {
        self.nodes[rank.0].hw.occupy(node);
        if self.config.roofline_enabled && node.tensor_size > 0 {
            let operational_intensity = node.num_ops as f64 / node.tensor_size as f64;
            let perf = self.roofline.get_perf(operational_intensity);
            let runtime =
                ((node.num_ops as f64 / perf.max(f64::MIN_POSITIVE)) * self.compute_scale).max(1.0)
                    as u64;
            let hw = &mut self.nodes[rank.0].hw;
            if node.is_cpu_op {
                hw.tics_cpu_ops += runtime;
            } else {
                hw.tics_gpu_ops += runtime;
            }
            sim.schedule(
                sim.now().delayed_by(runtime),
                HandlerEvent::new(Handler::WorkloadGeneral {
                    rank,
                    node_id: node.id,
                }),
            );
        } else {
            self.issue_replay(sim, rank, node);
        }
    }

    fn issue_remote_mem(&mut self, sim: &mut Simulator, rank: RankId, node: &TraceNode) {
        self.nodes[rank.0].hw.occupy(node);
        self.remote_mem.issue(
            sim,
            node.tensor_size,
            Handler::WorkloadGeneral {
                rank,
                node_id: node.id,
            },
        );
    }

    fn issue_comm(&mut self, sim: &mut Simulator, rank: RankId, node: &TraceNode) {
        self.nodes[rank.0].hw.occupy(node);

        // involved_dim 缺省时默认四维全参与，再按实际维度数截断。
        let involved_dim = node
            .involved_dim
            .clone()
            .unwrap_or_else(|| vec![true, true, true, true]);

        if !node.is_cpu_op && node.node_type == TraceNodeType::CommColl {
            let size = ((node.comm_size as f64) * self.comm_scale).max(1.0) as u64;
            let kind = node
                .comm_type
                .unwrap_or_else(|| panic!("collective node {} lacks comm_type", node.id));
            match kind {
                CollectiveKind::AllReduce => self.generate_all_reduce(
                    sim,
                    rank,
                    size,
                    &involved_dim,
                    node.comm_priority,
                    node.id,
                ),
                CollectiveKind::AllGather => self.generate_all_gather(
                    sim,
                    rank,
                    size,
                    &involved_dim,
                    node.comm_priority,
                    node.id,
                ),
                CollectiveKind::ReduceScatter => self.generate_reduce_scatter(
                    sim,
                    rank,
                    size,
                    &involved_dim,
                    node.comm_priority,
                    node.id,
                ),
                CollectiveKind::AllToAll => self.generate_all_to_all(
                    sim,
                    rank,
                    size,
                    &involved_dim,
                    node.comm_priority,
                    node.id,
                ),
                CollectiveKind::Broadcast => {
                    // 没有算法模型，按记录的运行时间回放。
                    let runtime = self.replay_runtime_ns(node);
                    let dataset_id = self.new_dataset(sim, rank, Some(node.id));
                    sim.schedule(
                        sim.now().delayed_by(runtime),
                        HandlerEvent::new(Handler::DatasetGeneral {
                            rank,
                            dataset_id,
                        }),
                    );
                }
            }
        } else if node.node_type == TraceNodeType::CommSend {
            self.backend.sim_send(
                sim,
                node.comm_tag,
                rank,
                RankId(node.comm_dst),
                node.comm_size,
                0,
                Handler::WorkloadPacketSent {
                    rank,
                    node_id: node.id,
                },
            );
        } else if node.node_type == TraceNodeType::CommRecv {
            self.backend.sim_recv(
                sim,
                node.comm_tag,
                RankId(node.comm_src),
                rank,
                node.comm_size,
                0,
                Handler::WorkloadPacketReceived {
                    rank,
                    node_id: node.id,
                },
            );
        } else {
            panic!("unknown communication node type for node {}", node.id);
        }
    }

    fn skip_invalid(&mut self, rank: RankId, node: &TraceNode) {
        let feeder = &mut self.nodes[rank.0].feeder;
        feeder.free_children_nodes(node.id);
        feeder.remove_node(node.id);
    }

    /// Completion callback for a workload node: release the hardware class,
    /// free DAG children, reissue and remove the node.
    fn workload_node_done(&mut self, sim: &mut Simulator, rank: RankId, node_id: u64) {
        if self.nodes[rank.0].is_finished {
            return;
        }
        let node = self.nodes[rank.0]
            .feeder
            .lookup_node(node_id)
            .unwrap_or_else(|| panic!("callback for unknown node {node_id}"))
            .clone();
        if self.config.trace_enabled {
            debug!(
                sys_id = rank.0,
                tick = sim.now().as_nanos(),
                node_id = node.id,
                node_name = %node.name,
                node_type = ?node.node_type,
                "callback"
            );
        }
        self.nodes[rank.0].hw.release(&node);
        self.nodes[rank.0].feeder.free_children_nodes(node_id);
        self.issue_dep_free_nodes(sim, rank);
        self.nodes[rank.0].feeder.remove_node(node_id);
        self.check_workload_finished(sim, rank);
    }

    /// CollectiveCommunicationFinished for the trace node that generated the
    /// collective.
    fn collective_finished(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        node_id: u64,
        exec_ns: u64,
    ) {
        if self.nodes[rank.0].is_finished {
            return;
        }
        self.nodes[rank.0].hw.tics_gpu_comms += exec_ns;
        self.workload_node_done(sim, rank, node_id);
    }

    pub fn check_workload_finished(&mut self, sim: &mut Simulator, rank: RankId) {
        let node = &mut self.nodes[rank.0];
        if node.is_finished || node.feeder.has_nodes_to_issue() || !node.hw.all_idle() {
            return;
        }
        node.is_finished = true;
        node.finished_at = Some(sim.now());
        let tick = sim.now().as_nanos();
        info!(
            sys_id = rank.0,
            cycles = tick,
            exposed_comm = tick.saturating_sub(node.hw.tics_gpu_ops),
            "sys finished"
        );
        node.hw.report();
        self.backend.sim_notify_finished(sim, rank);
    }

    // ---- collective generation -------------------------------------------

    pub fn generate_all_reduce(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        size: u64,
        involved_dim: &[bool],
        priority: u64,
        node_id: u64,
    ) {
        self.generate_collective(sim, rank, ComType::AllReduce, size, involved_dim, priority, node_id)
    }

    pub fn generate_all_gather(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        size: u64,
        involved_dim: &[bool],
        priority: u64,
        node_id: u64,
    ) {
        self.generate_collective(sim, rank, ComType::AllGather, size, involved_dim, priority, node_id)
    }

    pub fn generate_reduce_scatter(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        size: u64,
        involved_dim: &[bool],
        priority: u64,
        node_id: u64,
    ) {
        self.generate_collective(
            sim,
            rank,
            ComType::ReduceScatter,
            size,
            involved_dim,
            priority,
            node_id,
        )
    }

    pub fn generate_all_to_all(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        size: u64,
        involved_dim: &[bool],
        priority: u64,
        node_id: u64,
    ) {
        self.generate_collective(sim, rank, ComType::AllToAll, size, involved_dim, priority, node_id)
    }

    fn new_dataset(&mut self, sim: &Simulator, rank: RankId, notifier: Option<u64>) -> u64 {
        let node = &mut self.nodes[rank.0];
        let dataset_id = node.dataset_counter;
        node.dataset_counter += 1;
        let mut ds = DataSet::new(dataset_id, 1, sim.now());
        ds.notifier_node = notifier;
        node.datasets.insert(dataset_id, ds);
        dataset_id
    }

    fn impls_for(&self, com_type: ComType) -> &[AlgorithmKind] {
        match com_type {
            ComType::AllReduce => &self.config.all_reduce_implementation,
            ComType::AllGather => &self.config.all_gather_implementation,
            ComType::ReduceScatter => &self.config.reduce_scatter_implementation,
            ComType::AllToAll => &self.config.all_to_all_implementation,
        }
    }

    fn phase_descriptor(
        &self,
        rank: RankId,
        com_type: ComType,
        dim: usize,
        members: Vec<RankId>,
        local: bool,
    ) -> CollectiveDescriptor {
        let kind = self
            .config
            .implementation_for(self.impls_for(com_type), dim);
        let trace_nodes = if kind == AlgorithmKind::TraceDriven {
            self.nodes[rank.0].collective_trace.clone()
        } else {
            None
        };
        CollectiveDescriptor {
            kind,
            com_type,
            members,
            dim_kind: if local {
                crate::topo::DimensionKind::Local
            } else {
                crate::topo::DimensionKind::Remote
            },
            direction: RingDirection::Clockwise,
            injection_policy: self.config.injection_policy,
            window: self.config.alltoall_window,
            trace_nodes,
        }
    }

    fn generate_collective(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        com_type: ComType,
        size: u64,
        involved_dim: &[bool],
        priority: u64,
        node_id: u64,
    ) {
        // 选出参与的维度：显式 involved 且维度规模 > 1。
        let group = self.nodes[rank.0].comm_group.clone();
        let ordered: Vec<usize> = if group.is_some() {
            vec![0]
        } else {
            let involved: Vec<usize> = (0..self.dims.num_dims())
                .filter(|d| {
                    involved_dim.get(*d).copied().unwrap_or(false) && self.dims.dim(*d).size > 1
                })
                .collect();
            let loads: Vec<usize> = (0..self.dims.num_dims())
                .map(|d| self.nodes[rank.0].scheduler.dim_load(d))
                .collect();
            let seq = self.nodes[rank.0].collective_seq;
            order_dims(
                self.config.inter_dimension_scheduling,
                &involved,
                seq,
                &loads,
            )
        };
        self.nodes[rank.0].collective_seq += 1;

        let member_count_ok = match &group {
            Some(g) => g.members.len() > 1,
            None => !ordered.is_empty(),
        };
        if !member_count_ok {
            // 没有可通信的维度：集合立即完成。
            let dataset_id = self.new_dataset(sim, rank, Some(node_id));
            sim.schedule(
                sim.now(),
                HandlerEvent::new(Handler::DatasetGeneral { rank, dataset_id }),
            );
            return;
        }

        // 组装阶段：多维 all-reduce 在带宽感知模式下拆成
        // reduce-scatter（升维）+ all-gather（降维）。
        let mut phase_specs: Vec<(ComType, usize)> = Vec::new();
        if com_type == ComType::AllReduce
            && self.config.collective_optimization == CollectiveOptimization::LocalBwAware
            && ordered.len() > 1
            && group.is_none()
        {
            for &d in &ordered {
                phase_specs.push((ComType::ReduceScatter, d));
            }
            for &d in ordered.iter().rev() {
                phase_specs.push((ComType::AllGather, d));
            }
        } else {
            for &d in &ordered {
                phase_specs.push((com_type, d));
            }
        }

        let mut phases = Vec::with_capacity(phase_specs.len());
        let mut cur_size = size;
        for (phase_type, dim) in phase_specs {
            let (members, local) = match &group {
                Some(g) => (g.members.clone(), false),
                None => (
                    self.dims.ring_members(rank, dim),
                    self.dims.dim(dim).kind == crate::topo::DimensionKind::Local,
                ),
            };
            let descriptor = self.phase_descriptor(rank, phase_type, dim, members, local);
            let vnet = self.nodes[rank.0].scheduler.pick_queue(dim);
            let next_size = descriptor.final_data_size(cur_size);
            phases.push(CollectivePhase {
                vnet,
                data_size: cur_size,
                descriptor,
            });
            cur_size = next_size;
        }

        let dataset_id = self.new_dataset(sim, rank, Some(node_id));
        let node = &mut self.nodes[rank.0];
        let stream_id = node.stream_counter;
        node.stream_counter += 1;

        let first = phases[0].clone();
        let algorithm = first.descriptor.instantiate(rank, first.data_size);
        let stream = Stream {
            stream_id,
            owner: rank,
            dataset_id,
            current_queue_id: first.vnet,
            state: StreamState::Created,
            initial_data_size: first.data_size,
            final_data_size: first.descriptor.final_data_size(first.data_size),
            phases,
            current_phase: 0,
            algorithm: Some(algorithm),
            creation_time: sim.now(),
            priority,
        };
        let vnet = stream.current_queue_id;
        node.streams.insert(stream_id, stream);
        node.scheduler.enqueue(vnet, stream_id, priority);
        self.activate_vnet(sim, rank, vnet);
    }

    // ---- stream lifecycle ------------------------------------------------

    fn activate_vnet(&mut self, sim: &mut Simulator, rank: RankId, vnet: usize) {
        let node = &mut self.nodes[rank.0];
        if let Some(stream_id) = node.scheduler.try_activate(vnet, &node.streams) {
            if let Some(stream) = node.streams.get_mut(&stream_id) {
                if stream.state == StreamState::Created {
                    stream.change_state(StreamState::Ready);
                }
            }
            sim.schedule(
                sim.now(),
                HandlerEvent::new(Handler::StreamInit {
                    rank,
                    stream_id,
                }),
            );
        }
    }

    fn run_stream(&mut self, sim: &mut Simulator, rank: RankId, stream_id: u64, event: AlgEvent) {
        let mut actions = Vec::new();
        {
            let node = &mut self.nodes[rank.0];
            let Some(stream) = node.streams.get_mut(&stream_id) else {
                return;
            };
            let Some(mut algorithm) = stream.algorithm.take() else {
                return;
            };
            algorithm.run(event, stream, &mut actions);
            stream.algorithm = Some(algorithm);
        }
        self.apply_actions(sim, rank, stream_id, actions);
    }

    fn apply_actions(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        stream_id: u64,
        actions: Vec<AlgAction>,
    ) {
        for action in actions {
            match action {
                AlgAction::MemBus { bundle, to_npu: _ } => {
                    let delay = self.membus.latency_ns(&bundle);
                    sim.schedule(
                        sim.now().delayed_by(delay),
                        HandlerEvent::new(Handler::StreamGeneral {
                            rank,
                            stream_id,
                            arg: 0,
                        }),
                    );
                }
                AlgAction::Send {
                    dst,
                    size,
                    tag,
                    notify,
                } => {
                    let vnet = self.stream_vnet(rank, stream_id);
                    let handler = match notify {
                        Some(arg) => Handler::StreamPacketSent {
                            rank,
                            stream_id,
                            arg,
                        },
                        None => Handler::Noop,
                    };
                    self.backend.sim_send(sim, tag, rank, dst, size, vnet, handler);
                }
                AlgAction::Recv { src, size, tag, arg } => {
                    let vnet = self.stream_vnet(rank, stream_id);
                    self.backend.sim_recv(
                        sim,
                        tag,
                        src,
                        rank,
                        size,
                        vnet,
                        Handler::StreamPacketReceived {
                            rank,
                            stream_id,
                            arg,
                        },
                    );
                }
                AlgAction::Delay { ns, arg } => {
                    sim.schedule(
                        sim.now().delayed_by(ns),
                        HandlerEvent::new(Handler::StreamGeneral {
                            rank,
                            stream_id,
                            arg,
                        }),
                    );
                }
                AlgAction::Exit => self.proceed_to_next_vnet_baseline(sim, rank, stream_id),
            }
        }
    }

    fn stream_vnet(&self, rank: RankId, stream_id: u64) -> usize {
        self.nodes[rank.0]
            .streams
            .get(&stream_id)
            .map(|s| s.current_queue_id)
            .unwrap_or(0)
    }

    /// A stream has left its vnet: advance it to the next phase, or retire it
    /// and settle its dataset. Either way the vacated queue gets a chance to
    /// start its next stream.
    fn proceed_to_next_vnet_baseline(
        &mut self,
        sim: &mut Simulator,
        rank: RankId,
        stream_id: u64,
    ) {
        enum Outcome {
            NextPhase { vnet: usize },
            Retired { dataset_id: u64 },
        }

        let (old_vnet, outcome) = {
            let node = &mut self.nodes[rank.0];
            let Some(stream) = node.streams.get_mut(&stream_id) else {
                return;
            };
            let old_vnet = stream.current_queue_id;
            node.scheduler.stream_departed(old_vnet, stream_id);
            stream.current_phase += 1;
            if stream.current_phase < stream.phases.len() {
                let phase = stream.phases[stream.current_phase].clone();
                stream.current_queue_id = phase.vnet;
                stream.initial_data_size = phase.data_size;
                stream.final_data_size = phase.descriptor.final_data_size(phase.data_size);
                stream.change_state(StreamState::Ready);
                stream.algorithm = Some(phase.descriptor.instantiate(rank, phase.data_size));
                let priority = stream.priority;
                node.scheduler.enqueue(phase.vnet, stream_id, priority);
                (old_vnet, Outcome::NextPhase { vnet: phase.vnet })
            } else {
                stream.change_state(StreamState::Dead);
                let dataset_id = stream.dataset_id;
                node.streams.remove(&stream_id);
                (old_vnet, Outcome::Retired { dataset_id })
            }
        };

        match outcome {
            Outcome::NextPhase { vnet } => {
                self.activate_vnet(sim, rank, vnet);
                self.activate_vnet(sim, rank, old_vnet);
            }
            Outcome::Retired { dataset_id } => {
                self.activate_vnet(sim, rank, old_vnet);
                self.dataset_stream_finished(sim, rank, dataset_id);
            }
        }
    }

    /// One of a dataset's streams is done; on the last one, notify the
    /// workload node that generated the collective.
    fn dataset_stream_finished(&mut self, sim: &mut Simulator, rank: RankId, dataset_id: u64) {
        let done = {
            let node = &mut self.nodes[rank.0];
            let Some(ds) = node.datasets.get_mut(&dataset_id) else {
                return;
            };
            if ds.stream_finished() {
                let ds = node.datasets.remove(&dataset_id).expect("dataset exists");
                Some((ds.creation_time, ds.notifier_node))
            } else {
                None
            }
        };
        if let Some((creation, notifier)) = done {
            if let Some(node_id) = notifier {
                let exec_ns = sim.now().as_nanos().saturating_sub(creation.as_nanos());
                self.collective_finished(sim, rank, node_id, exec_ns);
            }
        }
    }
}
