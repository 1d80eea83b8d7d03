//! Network-facing API used by the system layer.
//!
//! A backend implements exactly five operations (send, recv, schedule, time,
//! finished-notification). Completion callbacks are value-typed handler
//! tokens; the cluster world dispatches them when they fire. This keeps the
//! matcher free of closures and the replay deterministic.

use crate::sim::{SimTime, Simulator};
use crate::stream::Chunk;
use crate::topo::RankId;

/// Completion callback token. Dispatched by the cluster world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// 配对计数需要它，但触发时什么也不做（集合类发送完成）。
    Noop,
    /// Wake a stream's algorithm with StreamInit.
    StreamInit { rank: RankId, stream_id: u64 },
    /// Memory-bus or explicit-delay completion for a stream.
    StreamGeneral { rank: RankId, stream_id: u64, arg: u64 },
    /// A chunk sent by a stream has left the rank.
    StreamPacketSent { rank: RankId, stream_id: u64, arg: u64 },
    /// A chunk a stream was waiting for has arrived.
    StreamPacketReceived { rank: RankId, stream_id: u64, arg: u64 },
    /// Compute/replay/remote-memory completion for a workload node.
    WorkloadGeneral { rank: RankId, node_id: u64 },
    /// Native point-to-point send completion for a workload node.
    WorkloadPacketSent { rank: RankId, node_id: u64 },
    /// Native point-to-point recv completion for a workload node.
    WorkloadPacketReceived { rank: RankId, node_id: u64 },
    /// Replay-timer completion for a whole collective (e.g. Broadcast).
    DatasetGeneral { rank: RankId, dataset_id: u64 },
}

/// Minimal network contract the system layer issues work against.
///
/// `sim_send` allocates the chunk id, registers the send handler with the
/// rendezvous matcher and schedules the arrival; `sim_recv` only talks to
/// the matcher. Both return the allocated chunk id.
pub trait NetworkBackend: Send {
    fn sim_send(
        &mut self,
        sim: &mut Simulator,
        tag: u64,
        src: RankId,
        dst: RankId,
        size: u64,
        vnet: usize,
        on_send_done: Handler,
    ) -> u64;

    fn sim_recv(
        &mut self,
        sim: &mut Simulator,
        tag: u64,
        src: RankId,
        dst: RankId,
        size: u64,
        vnet: usize,
        on_recv_done: Handler,
    ) -> u64;

    /// Enqueue `handler` at `now + delta_ns`.
    fn sim_schedule(&mut self, sim: &mut Simulator, delta_ns: u64, handler: Handler);

    /// Core requires nanoseconds.
    fn sim_get_time(&self, sim: &Simulator) -> SimTime {
        sim.now()
    }

    /// A rank's workload has drained. The backend halts once every rank
    /// has reported in.
    fn sim_notify_finished(&mut self, sim: &Simulator, rank: RankId);

    fn get_bw_at_dimension(&self, _dim: usize) -> Option<f64> {
        None
    }

    /// Consume the arrival of a chunk previously handed out by `sim_send`
    /// and return the handlers to fire, send handler first.
    fn process_chunk_arrival(
        &mut self,
        sim: &mut Simulator,
        chunk: &Chunk,
        bytes: u64,
    ) -> Vec<Handler>;

    fn all_ranks_finished(&self) -> bool;
}
