//! Rendezvous matcher: pairs sender and receiver callbacks for each
//! (tag, src, dst, size, chunk_id) tuple with either order of arrival.
//!
//! Chunk ids are allocated per (tag, src, dst, size) by a pair of monotone
//! counters, so many identical-shape messages in flight still pair FIFO.

use std::collections::HashMap;

use super::api::Handler;
use crate::topo::RankId;

/// Key of a message flow: every chunk of the flow shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub tag: u64,
    pub src: RankId,
    pub dst: RankId,
    pub size: u64,
}

/// Key of a single chunk within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub flow: FlowKey,
    pub chunk_id: u64,
}

/// One rendezvous entry. Destroyed once both handlers have fired.
#[derive(Debug, Default)]
pub struct CallbackEntry {
    pub send: Option<Handler>,
    pub recv: Option<Handler>,
    pub transmission_finished: bool,
    /// Bytes the registered recv still waits for (packet-level accounting).
    pub expected_bytes: u64,
    /// Bytes that arrived before any recv was registered (packet-level).
    pub arrived_bytes: u64,
}

impl CallbackEntry {
    pub fn both_callbacks_registered(&self) -> bool {
        self.send.is_some() && self.recv.is_some()
    }
}

/// 回调条目表 + 提前到达字节的暂存区。
#[derive(Debug, Default)]
pub struct CallbackTracker {
    entries: HashMap<ChunkKey, CallbackEntry>,
    standby_arrivals: HashMap<FlowKey, u64>,
}

impl CallbackTracker {
    pub fn search_entry(&mut self, key: ChunkKey) -> Option<&mut CallbackEntry> {
        self.entries.get_mut(&key)
    }

    pub fn create_new_entry(&mut self, key: ChunkKey) -> &mut CallbackEntry {
        self.entries.entry(key).or_default()
    }

    pub fn pop_entry(&mut self, key: ChunkKey) -> CallbackEntry {
        self.entries
            .remove(&key)
            .unwrap_or_else(|| panic!("matcher key absent: {:?}", key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Claim up to `want` early-arrived bytes for `flow`.
    pub fn take_standby(&mut self, flow: FlowKey, want: u64) -> u64 {
        let Some(avail) = self.standby_arrivals.get_mut(&flow) else {
            return 0;
        };
        let taken = want.min(*avail);
        *avail -= taken;
        if *avail == 0 {
            self.standby_arrivals.remove(&flow);
        }
        taken
    }

    pub fn stash_standby(&mut self, flow: FlowKey, bytes: u64) {
        if bytes > 0 {
            *self.standby_arrivals.entry(flow).or_insert(0) += bytes;
        }
    }

    pub fn standby_bytes(&self, flow: FlowKey) -> u64 {
        self.standby_arrivals.get(&flow).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct ChunkIdGeneratorEntry {
    send_id: i64,
    recv_id: i64,
}

impl Default for ChunkIdGeneratorEntry {
    fn default() -> Self {
        // -1 表示尚未分配；第一次递增后得到 0。
        Self {
            send_id: -1,
            recv_id: -1,
        }
    }
}

/// Per-flow chunk id allocator.
#[derive(Debug, Default)]
pub struct ChunkIdGenerator {
    counters: HashMap<FlowKey, ChunkIdGeneratorEntry>,
}

impl ChunkIdGenerator {
    pub fn create_send_chunk_id(&mut self, flow: FlowKey) -> u64 {
        let entry = self.counters.entry(flow).or_default();
        entry.send_id += 1;
        entry.send_id as u64
    }

    pub fn create_recv_chunk_id(&mut self, flow: FlowKey) -> u64 {
        let entry = self.counters.entry(flow).or_default();
        entry.recv_id += 1;
        entry.recv_id as u64
    }
}
