//! Collective bookkeeping.
//!
//! A dataset tracks one collective generated by a workload node: how many
//! streams it decomposed into, how many have died, and which trace node to
//! notify on completion. It is owned by the originating rank and destroyed
//! by the matching completion callback.

use crate::sim::SimTime;

#[derive(Debug, Clone)]
pub struct DataSet {
    pub dataset_id: u64,
    pub total_streams: usize,
    pub finished_streams: usize,
    pub creation_time: SimTime,
    /// Trace node to wake with CollectiveCommunicationFinished.
    pub notifier_node: Option<u64>,
}

impl DataSet {
    pub fn new(dataset_id: u64, total_streams: usize, creation_time: SimTime) -> Self {
        Self {
            dataset_id,
            total_streams,
            finished_streams: 0,
            creation_time,
            notifier_node: None,
        }
    }

    /// Record one finished stream; true when the whole collective is done.
    pub fn stream_finished(&mut self) -> bool {
        self.finished_streams += 1;
        self.finished_streams >= self.total_streams
    }
}
