use std::sync::{Arc, Mutex};

use crate::backend::{AnalyticalBackend, Handler, LinkParams, NetworkBackend};
use crate::config::{CollectiveOptimization, SystemConfig};
use crate::remote_mem::AnalyticalRemoteMemory;
use crate::sim::{SimTime, Simulator};
use crate::stream::Chunk;
use crate::system::events::StartWorkloads;
use crate::system::ClusterWorld;
use crate::topo::{DimensionKind, LogicalDim, LogicalDims, RankId};
use crate::workload::trace::{CollectiveKind, EtFeeder, TraceFeeder, TraceNode, TraceNodeType};
use crate::workload::CommGroup;

#[derive(Debug, Default)]
struct TrafficCounts {
    sends: Vec<(u64, usize, usize, u64)>,
    recv_posts: usize,
    arrivals: usize,
}

/// Backend double: delegates to the analytical backend and records traffic.
struct RecordingBackend {
    inner: AnalyticalBackend,
    counts: Arc<Mutex<TrafficCounts>>,
}

impl NetworkBackend for RecordingBackend {
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
        self.counts
            .lock()
            .expect("counts lock")
            .sends
            .push((tag, src.0, dst.0, size));
        self.inner
            .sim_send(sim, tag, src, dst, size, vnet, on_send_done)
    }

    fn sim_recv(
        &mut self,
        sim: &mut Simulator,
        tag: u64,
        src: RankId,
        dst: RankId,
        size: u64,
        vnet: usize,
        on_recv_done: Handler,
    ) -> u64 {
        self.counts.lock().expect("counts lock").recv_posts += 1;
        self.inner
            .sim_recv(sim, tag, src, dst, size, vnet, on_recv_done)
    }

    fn sim_schedule(&mut self, sim: &mut Simulator, delta_ns: u64, handler: Handler) {
        self.inner.sim_schedule(sim, delta_ns, handler)
    }

    fn sim_notify_finished(&mut self, sim: &Simulator, rank: RankId) {
        self.inner.sim_notify_finished(sim, rank)
    }

    fn get_bw_at_dimension(&self, dim: usize) -> Option<f64> {
        self.inner.get_bw_at_dimension(dim)
    }

    fn process_chunk_arrival(
        &mut self,
        sim: &mut Simulator,
        chunk: &Chunk,
        bytes: u64,
    ) -> Vec<Handler> {
        self.counts.lock().expect("counts lock").arrivals += 1;
        self.inner.process_chunk_arrival(sim, chunk, bytes)
    }

    fn all_ranks_finished(&self) -> bool {
        self.inner.all_ranks_finished()
    }
}

fn coll_node(id: u64, kind: CollectiveKind, size: u64) -> TraceNode {
    TraceNode {
        id,
        name: format!("coll{id}"),
        node_type: TraceNodeType::CommColl,
        is_cpu_op: false,
        runtime_us: 0,
        num_ops: 0,
        tensor_size: 0,
        comm_type: Some(kind),
        comm_src: 0,
        comm_dst: 0,
        comm_tag: 0,
        comm_size: size,
        comm_priority: 0,
        involved_dim: None,
        deps: vec![],
    }
}

fn comp_node(id: u64, runtime_us: u64, is_cpu_op: bool, deps: Vec<u64>) -> TraceNode {
    TraceNode {
        id,
        name: format!("comp{id}"),
        node_type: TraceNodeType::Comp,
        is_cpu_op,
        runtime_us,
        num_ops: 0,
        tensor_size: 0,
        comm_type: None,
        comm_src: 0,
        comm_dst: 0,
        comm_tag: 0,
        comm_size: 0,
        comm_priority: 0,
        involved_dim: None,
        deps,
    }
}

fn send_node(id: u64, dst: usize, tag: u64, size: u64, deps: Vec<u64>) -> TraceNode {
    TraceNode {
        id,
        name: format!("send{id}"),
        node_type: TraceNodeType::CommSend,
        is_cpu_op: false,
        runtime_us: 0,
        num_ops: 0,
        tensor_size: 0,
        comm_type: None,
        comm_src: 0,
        comm_dst: dst,
        comm_tag: tag,
        comm_size: size,
        comm_priority: 0,
        involved_dim: None,
        deps,
    }
}

fn recv_node(id: u64, src: usize, tag: u64, size: u64) -> TraceNode {
    TraceNode {
        id,
        name: format!("recv{id}"),
        node_type: TraceNodeType::CommRecv,
        is_cpu_op: false,
        runtime_us: 0,
        num_ops: 0,
        tensor_size: 0,
        comm_type: None,
        comm_src: src,
        comm_dst: 0,
        comm_tag: tag,
        comm_size: size,
        comm_priority: 0,
        involved_dim: None,
        deps: vec![],
    }
}

fn mem_node(id: u64, tensor_size: u64) -> TraceNode {
    TraceNode {
        id,
        name: format!("load{id}"),
        node_type: TraceNodeType::MemLoad,
        is_cpu_op: false,
        runtime_us: 0,
        num_ops: 0,
        tensor_size,
        comm_type: None,
        comm_src: 0,
        comm_dst: 0,
        comm_tag: 0,
        comm_size: 0,
        comm_priority: 0,
        involved_dim: None,
        deps: vec![],
    }
}

#[allow(clippy::type_complexity)]
fn build_world(
    dim_sizes: &[usize],
    traces: Vec<Vec<TraceNode>>,
    config: SystemConfig,
    comm_groups: Option<Vec<Option<CommGroup>>>,
) -> (Simulator, ClusterWorld, Arc<Mutex<TrafficCounts>>) {
    let dims = LogicalDims::new(
        dim_sizes
            .iter()
            .map(|&size| LogicalDim {
                size,
                kind: DimensionKind::Remote,
            })
            .collect(),
    );
    let n = dims.num_ranks();
    assert_eq!(traces.len(), n);

    let counts = Arc::new(Mutex::new(TrafficCounts::default()));
    let backend = RecordingBackend {
        inner: AnalyticalBackend::new(
            dim_sizes
                .iter()
                .map(|_| LinkParams {
                    bandwidth_gb_per_sec: 1.0,
                    latency_ns: 500,
                })
                .collect(),
            1,
            1.0,
            false,
            n,
        ),
        counts: Arc::clone(&counts),
    };
    let remote_mem = AnalyticalRemoteMemory {
        latency_ns: 500,
        bandwidth_gb_per_sec: 1.0,
    };

    let feeders: Vec<Box<dyn TraceFeeder>> = traces
        .into_iter()
        .map(|t| Box::new(EtFeeder::new(t)) as Box<dyn TraceFeeder>)
        .collect();
    let comm_groups = comm_groups.unwrap_or_else(|| vec![None; n]);
    let collective_traces = vec![None; n];

    let world = ClusterWorld::new(
        config,
        dims,
        1,
        1.0,
        1.0,
        Box::new(backend),
        Box::new(remote_mem),
        feeders,
        comm_groups,
        collective_traces,
    );
    (Simulator::default(), world, counts)
}

fn run(sim: &mut Simulator, world: &mut ClusterWorld) {
    sim.schedule(SimTime::ZERO, StartWorkloads);
    sim.run(world);
}

#[test]
fn two_rank_ring_all_reduce_matches_hand_computed_schedule() {
    let traces = vec![
        vec![coll_node(1, CollectiveKind::AllReduce, 1024)],
        vec![coll_node(1, CollectiveKind::AllReduce, 1024)],
    ];
    let (mut sim, mut world, counts) =
        build_world(&[2], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 4, "two chunks per rank");
    assert!(counts.sends.iter().all(|(_, _, _, size)| *size == 512));
    assert_eq!(counts.recv_posts, 4);
    assert_eq!(counts.arrivals, 4);

    // 每条 chunk 的网络时间 tx = 500 + 512/1.0；两次传输加三次内存总线
    // （初始 pass、归约 pass、收尾 pass，各 100ns）。
    let tx: u64 = 500 + 512;
    let expected = 2 * tx + 3 * 100;
    for report in world.reports() {
        assert_eq!(report.finished_at_ns, expected, "rank {}", report.rank);
    }
}

#[test]
fn four_rank_reduce_scatter_sends_three_shards_per_rank() {
    let traces = (0..4)
        .map(|_| vec![coll_node(1, CollectiveKind::ReduceScatter, 4096)])
        .collect();
    let (mut sim, mut world, counts) =
        build_world(&[4], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 12);
    assert!(counts.sends.iter().all(|(_, _, _, size)| *size == 1024));
    for rank in 0..4 {
        let per_rank = counts.sends.iter().filter(|(_, src, _, _)| *src == rank).count();
        assert_eq!(per_rank, 3, "rank {rank}");
    }
    assert_eq!(counts.recv_posts, counts.sends.len());
    assert_eq!(counts.arrivals, counts.sends.len());
}

#[test]
fn four_rank_all_gather_sends_full_payload_chunks() {
    let traces = (0..4)
        .map(|_| vec![coll_node(1, CollectiveKind::AllGather, 1024)])
        .collect();
    let (mut sim, mut world, counts) =
        build_world(&[4], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 12);
    assert!(counts.sends.iter().all(|(_, _, _, size)| *size == 1024));
}

#[test]
fn gpu_compute_nodes_never_overlap_on_one_rank() {
    let traces = vec![vec![
        comp_node(1, 5, false, vec![]),
        comp_node(2, 5, false, vec![]),
    ]];
    let (mut sim, mut world, _counts) =
        build_world(&[1], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 10_000);
}

#[test]
fn cpu_and_gpu_compute_overlap_across_classes() {
    let traces = vec![vec![
        comp_node(1, 5, true, vec![]),
        comp_node(2, 7, false, vec![]),
    ]];
    let (mut sim, mut world, _counts) =
        build_world(&[1], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 7_000);
}

#[test]
fn double_binary_tree_all_reduce_posts_two_n_minus_one_recvs() {
    let config: SystemConfig = serde_json::from_str(
        r#"{ "all_reduce_implementation": ["double_binary_tree"] }"#,
    )
    .expect("config parses");
    let traces = (0..3)
        .map(|_| vec![coll_node(1, CollectiveKind::AllReduce, 1024)])
        .collect();
    let (mut sim, mut world, counts) = build_world(&[3], traces, config, None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.recv_posts, 4, "2*(N-1) recvs");
    assert_eq!(counts.sends.len(), 4);
    assert_eq!(counts.arrivals, 4);
}

#[test]
fn out_of_order_send_recv_pair_completes_both_ranks() {
    let traces = vec![
        vec![
            comp_node(1, 2, false, vec![]),
            send_node(2, 1, 9, 64, vec![1]),
        ],
        vec![recv_node(1, 0, 9, 64)],
    ];
    let (mut sim, mut world, counts) =
        build_world(&[2], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 1);
    assert_eq!(counts.recv_posts, 1);
    assert_eq!(counts.arrivals, 1);

    // send 在 2us 的计算后发出，到达时两端同时完成。
    let expected: u64 = 2_000 + 500 + 64;
    for report in world.reports() {
        assert_eq!(report.finished_at_ns, expected, "rank {}", report.rank);
    }
}

#[test]
fn comm_group_collective_spans_group_members_only() {
    let group = CommGroup {
        name: "dp".to_string(),
        members: vec![RankId(0), RankId(1)],
    };
    let comm_groups = vec![Some(group.clone()), Some(group), None, None];
    let traces = vec![
        vec![coll_node(1, CollectiveKind::AllReduce, 512)],
        vec![coll_node(1, CollectiveKind::AllReduce, 512)],
        vec![],
        vec![],
    ];
    let (mut sim, mut world, counts) =
        build_world(&[4], traces, SystemConfig::default(), Some(comm_groups));
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 4, "ring of two, two chunks each");
    assert!(counts.sends.iter().all(|(_, src, dst, size)| {
        *size == 256 && *src < 2 && *dst < 2
    }));
}

#[test]
fn local_bw_aware_all_reduce_decomposes_into_rs_and_ag_phases() {
    let config: SystemConfig =
        serde_json::from_str(r#"{ "collective_optimization": "local_bw_aware" }"#)
            .expect("config parses");
    assert_eq!(
        config.collective_optimization,
        CollectiveOptimization::LocalBwAware
    );
    let traces = (0..4)
        .map(|_| vec![coll_node(1, CollectiveKind::AllReduce, 4096)])
        .collect();
    let (mut sim, mut world, counts) = build_world(&[2, 2], traces, config, None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    assert_eq!(counts.sends.len(), 16);
    for rank in 0..4 {
        let mut sizes: Vec<u64> = counts
            .sends
            .iter()
            .filter(|(_, src, _, _)| *src == rank)
            .map(|(_, _, _, size)| *size)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1024, 1024, 2048, 2048], "rank {rank}");
    }
}

#[test]
fn baseline_all_reduce_runs_one_phase_per_involved_dim() {
    let traces = (0..4)
        .map(|_| vec![coll_node(1, CollectiveKind::AllReduce, 4096)])
        .collect();
    let (mut sim, mut world, counts) =
        build_world(&[2, 2], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    let counts = counts.lock().expect("counts lock");
    // 每个维度一个 all-reduce 阶段：2 节点环上各发两条 2048B 的 chunk。
    assert_eq!(counts.sends.len(), 16);
    assert!(counts.sends.iter().all(|(_, _, _, size)| *size == 2048));
}

#[test]
fn remote_memory_latency_gates_mem_nodes() {
    let traces = vec![vec![mem_node(1, 1000)]];
    let (mut sim, mut world, _counts) =
        build_world(&[1], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 1_500);
}

#[test]
fn roofline_model_drives_compute_runtime() {
    let config: SystemConfig = serde_json::from_str(
        r#"{ "roofline_enabled": true, "peak_perf_gflops": 100.0, "local_mem_bw_gb_per_sec": 5.0 }"#,
    )
    .expect("config parses");
    let mut comp = comp_node(1, 0, false, vec![]);
    comp.num_ops = 1000;
    comp.tensor_size = 100;
    let (mut sim, mut world, _counts) = build_world(&[1], vec![vec![comp]], config, None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    // OI = 10 ops/byte → perf = min(100, 50) = 50 ops/ns → 20ns
    assert_eq!(world.reports()[0].finished_at_ns, 20);
}

#[test]
fn replay_only_mode_replays_collectives_by_runtime() {
    let config: SystemConfig =
        serde_json::from_str(r#"{ "replay_only": true }"#).expect("config parses");
    let mut coll = coll_node(1, CollectiveKind::AllReduce, 4096);
    coll.runtime_us = 3;
    let (mut sim, mut world, counts) = build_world(&[1], vec![vec![coll]], config, None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 3_000);
    assert!(counts.lock().expect("counts lock").sends.is_empty());
}

#[test]
fn broadcast_has_no_algorithmic_model_and_replays() {
    let mut coll = coll_node(1, CollectiveKind::Broadcast, 4096);
    coll.runtime_us = 4;
    let (mut sim, mut world, counts) =
        build_world(&[1], vec![vec![coll]], SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 4_000);
    assert!(counts.lock().expect("counts lock").sends.is_empty());
}

#[test]
fn invalid_nodes_are_skipped_and_children_freed() {
    let invalid = TraceNode {
        node_type: TraceNodeType::Invalid,
        ..comp_node(1, 0, false, vec![])
    };
    let traces = vec![vec![invalid, comp_node(2, 5, false, vec![1])]];
    let (mut sim, mut world, _counts) =
        build_world(&[1], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert_eq!(world.reports()[0].finished_at_ns, 5_000);
}

#[test]
fn single_rank_collective_finishes_without_traffic() {
    let traces = vec![vec![coll_node(1, CollectiveKind::AllReduce, 1024)]];
    let (mut sim, mut world, counts) =
        build_world(&[1], traces, SystemConfig::default(), None);
    run(&mut sim, &mut world);

    assert!(world.all_finished());
    assert!(counts.lock().expect("counts lock").sends.is_empty());
    assert_eq!(world.reports()[0].finished_at_ns, 0);
}
