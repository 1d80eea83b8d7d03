//! Per-rank stream scheduling.
//!
//! Each topology dimension owns K work queues (vnets); a stream occupies one
//! queue at a time and at most one stream per queue is executing. Policy
//! knobs pick the next waiting stream (intra-dimension), the dimension order
//! of multi-phase collectives (inter-dimension) and where new streams enter
//! their queue (scheduling policy).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    Lifo,
    #[default]
    Fifo,
    Explicit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntraDimensionScheduling {
    #[default]
    Fifo,
    RoundRobinGreedy,
    SmallestFirst,
    LessRemainingPhaseFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterDimensionScheduling {
    #[default]
    Ascending,
    OnlineGreedy,
    RoundRobin,
    OfflineGreedy,
    OfflineGreedyFlex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPolicy {
    Infinite,
    Aggressive,
    SemiAggressive,
    ExtraAggressive,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Copy)]
struct QueuedStream {
    stream_id: u64,
    priority: u64,
}

/// Per-rank vnet queues.
pub struct StreamScheduler {
    queues: Vec<VecDeque<QueuedStream>>,
    running: Vec<Option<u64>>,
    next_queue_in_dim: Vec<usize>,
    queues_per_dim: usize,
    policy: SchedulingPolicy,
    intra: IntraDimensionScheduling,
}

impl StreamScheduler {
    pub fn new(
        num_dims: usize,
        queues_per_dim: usize,
        policy: SchedulingPolicy,
        intra: IntraDimensionScheduling,
    ) -> Self {
        assert!(queues_per_dim >= 1, "queues_per_dim must be >= 1");
        let vnets = num_dims * queues_per_dim;
        Self {
            queues: (0..vnets).map(|_| VecDeque::new()).collect(),
            running: vec![None; vnets],
            next_queue_in_dim: vec![0; num_dims],
            queues_per_dim,
            policy,
            intra,
        }
    }

    pub fn num_vnets(&self) -> usize {
        self.queues.len()
    }

    /// Round-robin queue assignment within a dimension; returns the vnet id.
    pub fn pick_queue(&mut self, dim: usize) -> usize {
        let offset = self.next_queue_in_dim[dim];
        self.next_queue_in_dim[dim] = (offset + 1) % self.queues_per_dim;
        dim * self.queues_per_dim + offset
    }

    /// Waiting streams in a dimension's queues (used by greedy ordering).
    pub fn dim_load(&self, dim: usize) -> usize {
        let lo = dim * self.queues_per_dim;
        (lo..lo + self.queues_per_dim)
            .map(|v| self.queues[v].len() + usize::from(self.running[v].is_some()))
            .sum()
    }

    pub fn enqueue(&mut self, vnet: usize, stream_id: u64, priority: u64) {
        let entry = QueuedStream {
            stream_id,
            priority,
        };
        match self.policy {
            SchedulingPolicy::Lifo => self.queues[vnet].push_front(entry),
            SchedulingPolicy::Explicit => {
                // 高优先级靠前；同优先级保持插入顺序。
                let pos = self.queues[vnet]
                    .iter()
                    .position(|q| q.priority < priority)
                    .unwrap_or(self.queues[vnet].len());
                self.queues[vnet].insert(pos, entry);
            }
            _ => self.queues[vnet].push_back(entry),
        }
    }

    /// Pick the next stream to initialize on `vnet`, if the queue slot is
    /// free. Ties break by insertion order.
    pub fn try_activate(
        &mut self,
        vnet: usize,
        streams: &HashMap<u64, Stream>,
    ) -> Option<u64> {
        if self.running[vnet].is_some() || self.queues[vnet].is_empty() {
            return None;
        }
        let idx = match self.intra {
            IntraDimensionScheduling::Fifo | IntraDimensionScheduling::RoundRobinGreedy => 0,
            IntraDimensionScheduling::SmallestFirst => {
                self.index_of_min(vnet, streams, |s| s.initial_data_size)
            }
            IntraDimensionScheduling::LessRemainingPhaseFirst => {
                self.index_of_min(vnet, streams, |s| s.remaining_phases() as u64)
            }
        };
        let entry = self.queues[vnet].remove(idx)?;
        self.running[vnet] = Some(entry.stream_id);
        Some(entry.stream_id)
    }

    fn index_of_min<F: Fn(&Stream) -> u64>(
        &self,
        vnet: usize,
        streams: &HashMap<u64, Stream>,
        key: F,
    ) -> usize {
        // 对不在表里的 stream（不应发生）按最大值处理，保持稳定序。
        let mut best = 0;
        let mut best_key = u64::MAX;
        for (i, entry) in self.queues[vnet].iter().enumerate() {
            let k = streams.get(&entry.stream_id).map(&key).unwrap_or(u64::MAX);
            if k < best_key {
                best_key = k;
                best = i;
            }
        }
        best
    }

    pub fn running_stream(&self, vnet: usize) -> Option<u64> {
        self.running[vnet]
    }

    pub fn stream_departed(&mut self, vnet: usize, stream_id: u64) {
        if self.running[vnet] == Some(stream_id) {
            self.running[vnet] = None;
        }
    }
}

/// Dimension order for a multi-phase collective.
pub fn order_dims(
    inter: InterDimensionScheduling,
    involved: &[usize],
    collective_seq: u64,
    dim_load: &[usize],
) -> Vec<usize> {
    let mut dims = involved.to_vec();
    match inter {
        InterDimensionScheduling::Ascending => dims,
        InterDimensionScheduling::RoundRobin => {
            if dims.is_empty() {
                return dims;
            }
            let rot = (collective_seq as usize) % dims.len();
            dims.rotate_left(rot);
            dims
        }
        InterDimensionScheduling::OnlineGreedy
        | InterDimensionScheduling::OfflineGreedy
        | InterDimensionScheduling::OfflineGreedyFlex => {
            // 贪心：负载轻的维度先走；稳定排序保持插入顺序破平。
            dims.sort_by_key(|d| dim_load.get(*d).copied().unwrap_or(0));
            dims
        }
    }
}
