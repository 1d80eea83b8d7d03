//! Algorithm contract and collective descriptors.
//!
//! Algorithms do not touch the backend directly: they emit actions which the
//! system layer applies after the state machine returns. This keeps the
//! borrow surface small and makes algorithms unit-testable in isolation.

use std::sync::Arc;

use tracing::warn;

use super::{
    AlgorithmKind, ComType, DoubleBinaryTreeAllReduce, HalvingDoubling, Ring,
    TraceDrivenCollective,
};
use crate::mem::PacketBundle;
use crate::scheduler::InjectionPolicy;
use crate::stream::Stream;
use crate::topo::{BinaryTree, DimensionKind, RankId, RingDirection, RingTopology};
use crate::workload::trace::TraceNode;

/// Events an algorithm reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgEvent {
    StreamInit,
    /// Memory-bus completion or explicit delay expiry.
    General { arg: u64 },
    PacketReceived { arg: u64 },
    PacketSent { arg: u64 },
}

/// Work an algorithm asks the system layer to perform.
#[derive(Debug, Clone)]
pub enum AlgAction {
    /// Run the bundle over the memory bus; a General event comes back.
    MemBus { bundle: PacketBundle, to_npu: bool },
    /// Collective-class send. `notify` routes a PacketSent event back with
    /// the given argument; `None` means fire-and-forget.
    Send {
        dst: RankId,
        size: u64,
        tag: u64,
        notify: Option<u64>,
    },
    /// Collective-class recv registration; PacketReceived comes back with
    /// `arg` once the matching chunk arrives.
    Recv {
        src: RankId,
        size: u64,
        tag: u64,
        arg: u64,
    },
    /// Schedule a General event for this stream at `now + ns`.
    Delay { ns: u64, arg: u64 },
    /// The stream leaves its vnet.
    Exit,
}

/// A collective-phase state machine bound to one stream.
pub trait Algorithm: Send {
    fn run(&mut self, event: AlgEvent, stream: &mut Stream, out: &mut Vec<AlgAction>);
}

/// Value-typed spec for one phase; `instantiate` is the factory that builds
/// the algorithm instance for the owning rank.
#[derive(Debug, Clone)]
pub struct CollectiveDescriptor {
    pub kind: AlgorithmKind,
    pub com_type: ComType,
    /// Ring-ordered members of the dimension this phase runs on.
    pub members: Vec<RankId>,
    pub dim_kind: DimensionKind,
    pub direction: RingDirection,
    pub injection_policy: InjectionPolicy,
    /// AllToAll window: -1 means unbounded (`n - 1`).
    pub window: i64,
    /// Pre-loaded collective trace for the trace-driven implementation.
    pub trace_nodes: Option<Arc<Vec<TraceNode>>>,
}

impl CollectiveDescriptor {
    /// Final per-rank payload after this phase, per the collective type.
    pub fn final_data_size(&self, data_size: u64) -> u64 {
        let n = self.members.len() as u64;
        match self.com_type {
            ComType::AllReduce | ComType::AllToAll => data_size,
            ComType::AllGather => data_size.saturating_mul(n),
            ComType::ReduceScatter => data_size / n.max(1),
        }
    }

    pub fn instantiate(&self, owner: RankId, data_size: u64) -> Box<dyn Algorithm> {
        let ring = || RingTopology::new(self.members.clone(), self.dim_kind);
        match self.kind {
            AlgorithmKind::Ring => Box::new(Ring::new(
                self.com_type,
                owner,
                ring(),
                data_size,
                self.direction,
                self.injection_policy,
            )),
            AlgorithmKind::AllToAll => Box::new(Ring::new_all_to_all(
                self.com_type,
                self.window,
                owner,
                ring(),
                data_size,
                self.direction,
                self.injection_policy,
            )),
            AlgorithmKind::DoubleBinaryTree => {
                if self.com_type != ComType::AllReduce {
                    warn!(
                        com_type = ?self.com_type,
                        "double binary tree only serves all-reduce, falling back to ring"
                    );
                    return Box::new(Ring::new(
                        self.com_type,
                        owner,
                        ring(),
                        data_size,
                        self.direction,
                        self.injection_policy,
                    ));
                }
                let tree = BinaryTree::new(self.members.clone());
                Box::new(DoubleBinaryTreeAllReduce::new(owner, &tree, data_size))
            }
            AlgorithmKind::HalvingDoubling => {
                if !self.members.len().is_power_of_two() || self.com_type != ComType::AllReduce {
                    warn!(
                        members = self.members.len(),
                        com_type = ?self.com_type,
                        "halving-doubling needs a power-of-two all-reduce, falling back to ring"
                    );
                    return Box::new(Ring::new(
                        self.com_type,
                        owner,
                        ring(),
                        data_size,
                        self.direction,
                        self.injection_policy,
                    ));
                }
                Box::new(HalvingDoubling::new(
                    owner,
                    self.members.clone(),
                    data_size,
                    self.dim_kind,
                ))
            }
            AlgorithmKind::TraceDriven => match &self.trace_nodes {
                Some(nodes) => Box::new(TraceDrivenCollective::new(nodes.as_ref().clone())),
                None => {
                    warn!("trace-driven collective has no trace, falling back to ring");
                    Box::new(Ring::new(
                        self.com_type,
                        owner,
                        ring(),
                        data_size,
                        self.direction,
                        self.injection_policy,
                    ))
                }
            },
        }
    }
}

/// One scheduled phase of a multi-phase collective.
#[derive(Debug, Clone)]
pub struct CollectivePhase {
    pub vnet: usize,
    pub data_size: u64,
    pub descriptor: CollectiveDescriptor,
}
