use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use ccsim_rs::backend::{AnalyticalBackend, LinkParams};
use ccsim_rs::config::{
    load_json, ConfigError, LoggingConfig, NetworkConfig, RemoteMemoryConfig, SystemConfig,
};
use ccsim_rs::remote_mem::AnalyticalRemoteMemory;
use ccsim_rs::sim::{SimTime, Simulator};
use ccsim_rs::system::events::StartWorkloads;
use ccsim_rs::system::{ClusterWorld, RankReport};
use ccsim_rs::topo::{LogicalDim, LogicalDims, RankId};
use ccsim_rs::workload::comm_group::load_comm_group;
use ccsim_rs::workload::trace::{EtFeeder, TraceFeeder, TraceNode};
use ccsim_rs::workload::CommGroup;

#[derive(Debug, Parser)]
#[command(
    name = "cluster-sim",
    about = "Replay per-rank execution traces over an analytical cluster network model"
)]
struct Args {
    /// Prefix of the per-rank execution traces (<prefix>.<rank>.et)
    #[arg(long)]
    workload_configuration: String,

    /// System configuration JSON (policies, algorithms, memory bus)
    #[arg(long)]
    system_configuration: PathBuf,

    /// Network configuration JSON (dimension shape and link parameters)
    #[arg(long)]
    network_configuration: PathBuf,

    /// Remote memory configuration JSON
    #[arg(long)]
    remote_memory_configuration: PathBuf,

    /// Communicator group JSON; "empty" means no groups
    #[arg(long, default_value = "empty")]
    comm_group_configuration: String,

    /// Logging configuration JSON (tracing env-filter)
    #[arg(long)]
    logging_configuration: Option<PathBuf>,

    /// Work queues per topology dimension
    #[arg(long, default_value_t = 1)]
    num_queues_per_dim: usize,

    /// Multiplier applied to collective communication sizes
    #[arg(long, default_value_t = 1.0)]
    comm_scale: f64,

    /// Multiplier applied to compute runtimes
    #[arg(long, default_value_t = 1.0)]
    compute_scale: f64,

    /// Multiplier applied to network serialization time
    #[arg(long, default_value_t = 1.0)]
    injection_scale: f64,

    /// Enable packet-level rendezvous accounting
    #[arg(long, default_value_t = false)]
    rendezvous_protocol: bool,
}

fn init_logging(config: Option<&PathBuf>) {
    let filter = config
        .and_then(|path| load_json::<LoggingConfig>(path).ok())
        .and_then(|c| c.filter)
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
}

fn run(args: &Args) -> Result<Vec<RankReport>, ConfigError> {
    let system: SystemConfig = load_json(&args.system_configuration)?;
    let network: NetworkConfig = load_json(&args.network_configuration)?;
    network.validate()?;
    let remote: RemoteMemoryConfig = load_json(&args.remote_memory_configuration)?;

    let dims = LogicalDims::new(
        network
            .dims
            .iter()
            .map(|d| LogicalDim {
                size: d.size,
                kind: d.kind,
            })
            .collect(),
    );
    let num_ranks = dims.num_ranks();

    let mut feeders: Vec<Box<dyn TraceFeeder>> = Vec::with_capacity(num_ranks);
    let mut comm_groups: Vec<Option<CommGroup>> = Vec::with_capacity(num_ranks);
    let mut collective_traces: Vec<Option<Arc<Vec<TraceNode>>>> = Vec::with_capacity(num_ranks);
    for rank in 0..num_ranks {
        feeders.push(Box::new(EtFeeder::from_file(
            &args.workload_configuration,
            rank,
        )?));
        comm_groups.push(load_comm_group(
            &args.comm_group_configuration,
            RankId(rank),
        )?);
        collective_traces.push(match &system.collective_trace {
            Some(prefix) => {
                let path = format!("{prefix}.{rank}.et");
                let trace: Vec<TraceNode> = load_json(std::path::Path::new(&path))?;
                Some(Arc::new(trace))
            }
            None => None,
        });
    }

    let backend = AnalyticalBackend::new(
        network
            .dims
            .iter()
            .map(|d| LinkParams {
                bandwidth_gb_per_sec: d.bandwidth_gb_per_sec,
                latency_ns: d.latency_ns,
            })
            .collect(),
        args.num_queues_per_dim,
        args.injection_scale,
        args.rendezvous_protocol,
        num_ranks,
    );
    let remote_mem = AnalyticalRemoteMemory {
        latency_ns: remote.latency_ns,
        bandwidth_gb_per_sec: remote.bandwidth_gb_per_sec,
    };

    let mut world = ClusterWorld::new(
        system,
        dims,
        args.num_queues_per_dim,
        args.comm_scale,
        args.compute_scale,
        Box::new(backend),
        Box::new(remote_mem),
        feeders,
        comm_groups,
        collective_traces,
    );

    let mut sim = Simulator::default();
    sim.schedule(SimTime::ZERO, StartWorkloads);
    sim.run(&mut world);

    if !world.all_finished() {
        eprintln!("warning: event queue drained before every rank finished");
    }
    Ok(world.reports())
}

fn main() {
    let args = Args::parse();
    init_logging(args.logging_configuration.as_ref());

    match run(&args) {
        Ok(reports) => {
            for r in reports {
                println!(
                    "rank_report rank={} finished_at_ns={} exposed_comm_ns={} cpu_ops={} gpu_ops={} gpu_comms={}",
                    r.rank,
                    r.finished_at_ns,
                    r.exposed_comm_ns,
                    r.num_cpu_ops,
                    r.num_gpu_ops,
                    r.num_gpu_comms
                );
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
