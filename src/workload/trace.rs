//! Execution-trace reading.
//!
//! A per-rank trace file `<base>.<rank>.et` holds a topologically-ordered
//! JSON array of DAG nodes. The feeder exposes the dep-free iteration
//! contract the workload engine issues against; dependencies are counted
//! down as parents complete.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// 节点类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceNodeType {
    Comp,
    MemLoad,
    MemStore,
    CommSend,
    CommRecv,
    CommColl,
    Invalid,
}

/// Collective kinds a trace node may request. Broadcast has no algorithmic
/// model and is replayed by runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveKind {
    AllReduce,
    AllGather,
    ReduceScatter,
    AllToAll,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceNode {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: TraceNodeType,
    #[serde(default)]
    pub is_cpu_op: bool,
    /// 回放用时（微秒）。
    #[serde(default)]
    pub runtime_us: u64,
    #[serde(default)]
    pub num_ops: u64,
    #[serde(default)]
    pub tensor_size: u64,
    #[serde(default)]
    pub comm_type: Option<CollectiveKind>,
    #[serde(default)]
    pub comm_src: usize,
    #[serde(default)]
    pub comm_dst: usize,
    #[serde(default)]
    pub comm_tag: u64,
    #[serde(default)]
    pub comm_size: u64,
    #[serde(default)]
    pub comm_priority: u64,
    #[serde(default)]
    pub involved_dim: Option<Vec<bool>>,
    /// Parent node ids this node depends on.
    #[serde(default)]
    pub deps: Vec<u64>,
}

/// Iterator contract the engine reads the trace through.
pub trait TraceFeeder: Send {
    fn get_next_issuable_node(&mut self) -> Option<TraceNode>;
    fn push_back_issuable_node(&mut self, node_id: u64);
    fn free_children_nodes(&mut self, node_id: u64);
    fn lookup_node(&self, node_id: u64) -> Option<&TraceNode>;
    fn remove_node(&mut self, node_id: u64);
    fn has_nodes_to_issue(&self) -> bool;
}

/// In-memory feeder over a parsed trace.
#[derive(Debug)]
pub struct EtFeeder {
    nodes: HashMap<u64, TraceNode>,
    children: HashMap<u64, Vec<u64>>,
    pending_deps: HashMap<u64, usize>,
    ready: VecDeque<u64>,
}

impl EtFeeder {
    pub fn new(trace: Vec<TraceNode>) -> Self {
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut pending_deps = HashMap::new();
        let mut ready = VecDeque::new();
        for node in &trace {
            pending_deps.insert(node.id, node.deps.len());
            for dep in &node.deps {
                children.entry(*dep).or_default().push(node.id);
            }
            if node.deps.is_empty() {
                ready.push_back(node.id);
            }
        }
        let nodes = trace.into_iter().map(|n| (n.id, n)).collect();
        Self {
            nodes,
            children,
            pending_deps,
            ready,
        }
    }

    /// Load `<base>.<rank>.et`.
    pub fn from_file(base: &str, rank: usize) -> Result<Self, ConfigError> {
        let path = format!("{base}.{rank}.et");
        Self::from_path(Path::new(&path))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingTrace(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::UnreadableTrace {
            path: path.display().to_string(),
            source,
        })?;
        let trace: Vec<TraceNode> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(trace))
    }
}

impl TraceFeeder for EtFeeder {
    fn get_next_issuable_node(&mut self) -> Option<TraceNode> {
        let id = self.ready.pop_front()?;
        Some(
            self.nodes
                .get(&id)
                .unwrap_or_else(|| panic!("ready node {id} missing from trace"))
                .clone(),
        )
    }

    fn push_back_issuable_node(&mut self, node_id: u64) {
        self.ready.push_back(node_id);
    }

    fn free_children_nodes(&mut self, node_id: u64) {
        let Some(children) = self.children.remove(&node_id) else {
            return;
        };
        for child in children {
            let pending = self
                .pending_deps
                .get_mut(&child)
                .unwrap_or_else(|| panic!("child node {child} missing from trace"));
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                self.ready.push_back(child);
            }
        }
    }

    fn lookup_node(&self, node_id: u64) -> Option<&TraceNode> {
        self.nodes.get(&node_id)
    }

    fn remove_node(&mut self, node_id: u64) {
        self.nodes.remove(&node_id);
        self.pending_deps.remove(&node_id);
    }

    fn has_nodes_to_issue(&self) -> bool {
        !self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(id: u64, deps: Vec<u64>) -> TraceNode {
        TraceNode {
            id,
            name: format!("comp{id}"),
            node_type: TraceNodeType::Comp,
            is_cpu_op: false,
            runtime_us: 1,
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

    #[test]
    fn dep_free_nodes_come_out_in_trace_order() {
        let mut feeder = EtFeeder::new(vec![comp(1, vec![]), comp(2, vec![]), comp(3, vec![1, 2])]);
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), Some(1));
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), Some(2));
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), None);
    }

    #[test]
    fn children_become_issuable_once_all_parents_complete() {
        let mut feeder = EtFeeder::new(vec![comp(1, vec![]), comp(2, vec![]), comp(3, vec![1, 2])]);
        feeder.get_next_issuable_node();
        feeder.get_next_issuable_node();

        feeder.free_children_nodes(1);
        feeder.remove_node(1);
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), None);

        feeder.free_children_nodes(2);
        feeder.remove_node(2);
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), Some(3));

        feeder.free_children_nodes(3);
        feeder.remove_node(3);
        assert!(!feeder.has_nodes_to_issue());
    }

    #[test]
    fn pushed_back_nodes_are_offered_again() {
        let mut feeder = EtFeeder::new(vec![comp(1, vec![]), comp(2, vec![])]);
        let first = feeder.get_next_issuable_node().expect("node 1");
        feeder.push_back_issuable_node(first.id);
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), Some(2));
        assert_eq!(feeder.get_next_issuable_node().map(|n| n.id), Some(1));
    }

    #[test]
    fn missing_trace_file_is_a_config_error() {
        let err = EtFeeder::from_file("/nonexistent/trace", 0).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
