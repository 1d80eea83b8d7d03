//! Stream & chunk model.
//!
//! A stream is one rank's view of one phase of one collective: a
//! finite-lifetime state machine that owns its algorithm instance and is
//! multiplexed onto a vnet work queue. Chunks are the transport unit handed
//! to the network backend.

use crate::collective::algorithm::CollectivePhase;
use crate::collective::Algorithm;
use crate::sim::SimTime;
use crate::topo::RankId;

/// Stream lifecycle. A stream turns Zombie once its chunk accounting reaches
/// zero and Dead when it has left its last vnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Ready,
    Executing,
    Zombie,
    Dead,
}

/// One phase of one collective on one rank.
pub struct Stream {
    pub stream_id: u64,
    pub owner: RankId,
    pub dataset_id: u64,
    /// vnet（虚拟通道）编号：dim * queues_per_dim + queue offset。
    pub current_queue_id: usize,
    pub state: StreamState,
    pub initial_data_size: u64,
    pub final_data_size: u64,
    pub phases: Vec<CollectivePhase>,
    pub current_phase: usize,
    pub algorithm: Option<Box<dyn Algorithm>>,
    pub creation_time: SimTime,
    pub priority: u64,
}

impl Stream {
    pub fn change_state(&mut self, state: StreamState) {
        self.state = state;
    }

    /// Phases still ahead of this stream (including the current one).
    pub fn remaining_phases(&self) -> usize {
        self.phases.len().saturating_sub(self.current_phase)
    }
}

/// A message fragment as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub size: u64,
    pub src: RankId,
    pub dst: RankId,
    pub tag: u64,
    pub vnet: usize,
    pub chunk_id: u64,
}
