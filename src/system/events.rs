//! 系统层事件
//!
//! 所有回调都以小事件对象进入全局队列，执行时向下转型到 ClusterWorld。

use crate::backend::Handler;
use crate::sim::{Event, Simulator, World};
use crate::stream::Chunk;
use crate::topo::RankId;

use super::ClusterWorld;

fn cluster(world: &mut dyn World) -> &mut ClusterWorld {
    world
        .as_any_mut()
        .downcast_mut::<ClusterWorld>()
        .expect("world must be ClusterWorld")
}

/// Fire a single completion handler.
pub struct HandlerEvent {
    handler: Handler,
}

impl HandlerEvent {
    pub fn new(handler: Handler) -> Self {
        Self { handler }
    }
}

impl Event for HandlerEvent {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = cluster(world);
        w.dispatch(sim, self.handler);
    }
}

/// A chunk has reached its destination rank.
pub struct ChunkArrivalEvent {
    pub chunk: Chunk,
    pub bytes: u64,
}

impl Event for ChunkArrivalEvent {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = cluster(world);
        let fired = w.backend.process_chunk_arrival(sim, &self.chunk, self.bytes);
        // 发送端回调先于接收端。
        for handler in fired {
            w.dispatch(sim, handler);
        }
    }
}

/// Kick every rank's dep-free issue loop at simulation start.
pub struct StartWorkloads;

impl Event for StartWorkloads {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = cluster(world);
        for r in 0..w.num_ranks() {
            w.issue_dep_free_nodes(sim, RankId(r));
            w.check_workload_finished(sim, RankId(r));
        }
    }
}
